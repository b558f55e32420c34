//! Lua literal values as serialized by the remote debugger.
//!
//! The remote side dumps values with a table-constructor syntax
//! (`do local _={...};return _;end`). [`parse`] turns that text into a
//! [`LuaValue`] tree and [`format`] goes the other way for JSON-like values
//! that need to be sent back over `EXEC`.

mod format;
mod lexer;
mod parser;

use std::fmt;
use std::hash::{Hash, Hasher};

use indexmap::IndexMap;
use thiserror::Error;

pub use format::{format, format_key, is_identifier, FormatOptions, Indent};
pub(crate) use format::{format_value, quote};
pub use parser::{parse, parse_with_options, ParseOptions};

/// Map type used for keyed Lua tables. Entries keep their source order.
pub type LuaTable = IndexMap<LuaValue, LuaValue>;

#[derive(Clone, Debug)]
pub enum LuaValue {
    Nil,
    Bool(bool),
    Number(f64),
    Str(String),
    Array(Vec<LuaValue>),
    Table(LuaTable),
}

impl LuaValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[LuaValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&LuaTable> {
        match self {
            Self::Table(table) => Some(table),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Looks up a string key in a keyed table.
    pub fn get(&self, key: &str) -> Option<&LuaValue> {
        self.as_table()?.get(&LuaValue::Str(key.to_owned()))
    }

    /// Renders the value the way a debugger UI shows it: strings verbatim,
    /// integral numbers without a fraction, tables as compact constructors.
    pub fn render(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Formats a number like Lua's `tostring` does for the common cases.
pub(crate) fn render_number(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_owned();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf" } else { "-inf" }.to_owned();
    }
    if n.fract() == 0.0 && n.abs() < 1e15 {
        return format!("{}", n as i64);
    }
    n.to_string()
}

impl fmt::Display for LuaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => f.write_str("nil"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => f.write_str(&render_number(*n)),
            Self::Str(s) => f.write_str(&quote(s, false)),
            Self::Array(items) => {
                f.write_str("{")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("}")
            }
            Self::Table(table) => {
                f.write_str("{")?;
                for (idx, (key, value)) in table.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    match key {
                        Self::Str(name) if is_identifier(name) => write!(f, "{name}={value}")?,
                        other => write!(f, "[{other}]={value}")?,
                    }
                }
                f.write_str("}")
            }
        }
    }
}

// Numbers compare by bit pattern so values can act as map keys.
impl PartialEq for LuaValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Nil, Self::Nil) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Table(a), Self::Table(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for LuaValue {}

impl Hash for LuaValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Nil => {}
            Self::Bool(b) => b.hash(state),
            Self::Number(n) => n.to_bits().hash(state),
            Self::Str(s) => s.hash(state),
            Self::Array(items) => items.hash(state),
            // Table equality ignores entry order, so only the size is hashed.
            Self::Table(table) => table.len().hash(state),
        }
    }
}

impl From<&str> for LuaValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<f64> for LuaValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for LuaValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("lua parse error at byte {offset}: {message}")]
pub struct ParseError {
    pub offset: usize,
    pub message: String,
}

impl ParseError {
    pub(crate) fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integral_numbers_render_without_fraction() {
        assert_eq!(LuaValue::Number(10.0).render(), "10");
        assert_eq!(LuaValue::Number(-3.0).render(), "-3");
        assert_eq!(LuaValue::Number(1.5).render(), "1.5");
        assert_eq!(LuaValue::Number(f64::INFINITY).render(), "inf");
    }

    #[test]
    fn strings_render_verbatim_but_display_quoted() {
        let value = LuaValue::from("main.lua");
        assert_eq!(value.render(), "main.lua");
        assert_eq!(value.to_string(), "\"main.lua\"");
    }

    #[test]
    fn strings_display_as_lua_literals() {
        let value = LuaValue::from("a\"b\\c\n\t\u{1b}[0m'");
        let shown = value.to_string();
        assert_eq!(shown, "\"a\\\"b\\\\c\\n\\t\\027[0m'\"");
        assert_eq!(parse(&format!("return {shown}")).unwrap(), value);
    }

    #[test]
    fn tables_display_compactly() {
        let mut table = LuaTable::new();
        table.insert("a".into(), 1.0.into());
        table.insert(LuaValue::Number(2.0), true.into());
        let value = LuaValue::Table(table);
        assert_eq!(value.to_string(), "{a=1, [2]=true}");
        assert_eq!(value.get("a"), Some(&LuaValue::Number(1.0)));
    }
}
