//! Decoding of `STACK` replies.
//!
//! The remote dumps the call stack as a list of `{meta, params, fields}`
//! triples. `meta` is positional: function name, short source, first line,
//! current line, kind, name kind and full source path. `params` and `fields`
//! map names to either a scalar or a `{value, "repr"}` pair.

use indexmap::IndexMap;

use crate::{
    lua::{self, LuaValue, ParseOptions},
    wire::reply::{strip_dump_wrapper, OK_PREFIX},
    Result,
};

/// Placeholder substituted for bare `nil` tokens while decoding.
pub const NIL_PLACEHOLDER: &str = "nil";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StackFrame {
    pub meta: Vec<String>,
    pub params: IndexMap<String, String>,
    pub fields: IndexMap<String, String>,
}

impl StackFrame {
    fn meta(&self, idx: usize) -> &str {
        self.meta.get(idx).map(String::as_str).unwrap_or("")
    }

    pub fn function_name(&self) -> &str {
        match self.meta(0) {
            NIL_PLACEHOLDER => "no name",
            name => name,
        }
    }

    pub fn short_path(&self) -> &str {
        self.meta(1)
    }

    pub fn start_line(&self) -> Option<u32> {
        parse_line(self.meta(2))
    }

    pub fn end_line(&self) -> Option<u32> {
        parse_line(self.meta(3))
    }

    pub fn full_path(&self) -> &str {
        self.meta(6)
    }

    /// File name component of [`full_path`](Self::full_path).
    pub fn source_name(&self) -> &str {
        let full = self.full_path();
        full.rsplit(['/', '\\']).next().unwrap_or(full)
    }
}

fn parse_line(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    raw.parse::<u32>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().filter(|n| *n >= 0.0).map(|n| n as u32))
}

/// Decodes the payload of a `STACK` reply into frames, innermost first.
///
/// Accepts the text after `200 OK`, with or without the `200 OK ` prefix and
/// the dump wrapper. Triples whose `meta` is not a list are skipped.
pub fn decode(payload: &str) -> Result<Vec<StackFrame>> {
    let payload = payload.trim();
    let payload = payload
        .strip_prefix(OK_PREFIX)
        .map(str::trim_start)
        .unwrap_or(payload);
    let body = strip_dump_wrapper(payload);

    let options = ParseOptions {
        nil_placeholder: Some(NIL_PLACEHOLDER.to_owned()),
    };
    let parsed = lua::parse_with_options(&format!("return {{{body}}}"), &options)?;
    let entries = match parsed {
        LuaValue::Array(entries) => entries,
        other => {
            tracing::warn!(target: "mobdebug.stack", value = %other, "stack dump is not a list");
            return Ok(Vec::new());
        }
    };

    let mut frames = Vec::with_capacity(entries.len());
    for (idx, entry) in entries.iter().enumerate() {
        let parts = entry.as_array().unwrap_or_default();
        let Some(meta) = parts.first().and_then(LuaValue::as_array) else {
            tracing::warn!(
                target: "mobdebug.stack",
                index = idx,
                entry = %entry,
                "skipping malformed frame"
            );
            continue;
        };
        frames.push(StackFrame {
            meta: meta.iter().map(LuaValue::render).collect(),
            params: render_entries(parts.get(1)),
            fields: render_entries(parts.get(2)),
        });
    }
    Ok(frames)
}

fn render_entries(value: Option<&LuaValue>) -> IndexMap<String, String> {
    let Some(LuaValue::Table(table)) = value else {
        return IndexMap::new();
    };
    table
        .iter()
        .map(|(name, value)| (name.render(), render_entry(value)))
        .collect()
}

fn render_entry(value: &LuaValue) -> String {
    match value.as_array() {
        Some([_, LuaValue::Str(repr)]) => repr.clone(),
        _ => value.render(),
    }
}
