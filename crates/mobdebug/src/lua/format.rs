use serde_json::Value;

use super::lexer::keyword;

/// Indentation used by [`format`] for nested tables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Indent {
    /// Everything on one line with no padding.
    None,
    Spaces(usize),
    Str(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormatOptions {
    pub eol: String,
    pub single_quote: bool,
    pub indent: Indent,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            eol: "\n".to_owned(),
            single_quote: true,
            indent: Indent::Spaces(2),
        }
    }
}

impl FormatOptions {
    /// Single-line output, suitable for embedding into an `EXEC` command.
    pub fn compact() -> Self {
        Self {
            eol: String::new(),
            single_quote: false,
            indent: Indent::None,
        }
    }

    fn pad(&self, depth: usize) -> Option<String> {
        match &self.indent {
            Indent::None | Indent::Spaces(0) => None,
            Indent::Spaces(n) => Some(" ".repeat(n * depth)),
            Indent::Str(s) if s.is_empty() => None,
            Indent::Str(s) => Some(s.repeat(depth)),
        }
    }
}

/// Returns true when `name` can be written as a bare Lua identifier.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && keyword(name).is_none()
}

/// Quotes `s` as a Lua short string. ASCII control characters without a
/// mnemonic escape become `\ddd`.
pub(crate) fn quote(s: &str, single_quote: bool) -> String {
    let delim = if single_quote { '\'' } else { '"' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(delim);
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_ascii_control() => out.push_str(&format!("\\{:03}", c as u32)),
            c if c == delim => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(delim);
    out
}

/// Formats an object key: bare when it is an identifier, bracketed otherwise.
pub fn format_key(key: &str, single_quote: bool) -> String {
    match key {
        "true" | "false" => format!("[{key}]"),
        "null" => "[nil]".to_owned(),
        _ if is_identifier(key) => key.to_owned(),
        _ => format!("[{}]", quote(key, single_quote)),
    }
}

/// Serializes a JSON-like value as a Lua `return` chunk.
pub fn format(value: &Value, options: &FormatOptions) -> String {
    let separator = if options.pad(1).is_some() { " " } else { "" };
    format!("return{separator}{}", format_value(value, options, 0))
}

/// Serializes a JSON-like value as a bare Lua expression.
pub(crate) fn format_value(value: &Value, options: &FormatOptions, depth: usize) -> String {
    match value {
        Value::Null => "nil".to_owned(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote(s, options.single_quote),
        Value::Array(items) if items.is_empty() => "{}".to_owned(),
        Value::Object(map) if map.is_empty() => "{}".to_owned(),
        Value::Array(items) => {
            let entries = items
                .iter()
                .map(|item| format_value(item, options, depth + 1))
                .collect::<Vec<_>>();
            wrap(entries, options, depth)
        }
        Value::Object(map) => {
            let assign = if options.pad(1).is_some() { " = " } else { "=" };
            let entries = map
                .iter()
                .map(|(key, item)| {
                    format!(
                        "{}{assign}{}",
                        format_key(key, options.single_quote),
                        format_value(item, options, depth + 1)
                    )
                })
                .collect::<Vec<_>>();
            wrap(entries, options, depth)
        }
    }
}

fn wrap(entries: Vec<String>, options: &FormatOptions, depth: usize) -> String {
    match (options.pad(depth + 1), options.pad(depth)) {
        (Some(indent), Some(outdent)) => {
            let eol = &options.eol;
            let body = entries
                .iter()
                .map(|entry| format!("{indent}{entry},"))
                .collect::<Vec<_>>()
                .join(eol);
            format!("{{{eol}{body}{eol}{outdent}}}")
        }
        _ => {
            let body = entries
                .iter()
                .map(|entry| format!("{entry},"))
                .collect::<String>();
            format!("{{{body}}}")
        }
    }
}
