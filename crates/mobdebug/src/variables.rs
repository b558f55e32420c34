//! Reference-indexed variable tree.
//!
//! Every expandable node gets an `i64` reference that a UI can hand back to
//! ask for its children. References come from a monotonically increasing
//! counter and are never reused within a session, even across
//! [`VariableStore::reset`].

use std::{collections::HashMap, sync::OnceLock};

use regex::Regex;
use serde_json::{Map, Number, Value};

use crate::lua::{is_identifier, render_number};

/// Prefix of Lua's `tostring` for tables.
pub const TABLE_PREFIX: &str = "table: ";

/// Key the remote `transform` helper uses to wrap nested tables.
pub const NESTED_TABLE_KEY: &str = "Nested Table";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VariableNode {
    pub name: String,
    /// Rendered value; empty for tables, which are shown through their children.
    pub value: String,
    /// `0` for leaves.
    pub reference: i64,
    pub child_count: Option<usize>,
    /// Lua expression that evaluates to this node.
    pub evaluate_name: String,
}

impl VariableNode {
    pub fn is_expandable(&self) -> bool {
        self.reference != 0
    }
}

#[derive(Debug)]
pub struct VariableStore {
    next_reference: i64,
    nodes: HashMap<i64, VariableNode>,
    children: HashMap<i64, Vec<VariableNode>>,
}

impl Default for VariableStore {
    fn default() -> Self {
        Self {
            next_reference: 1,
            nodes: HashMap::new(),
            children: HashMap::new(),
        }
    }
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets every node. The reference counter keeps counting.
    pub fn reset(&mut self) {
        self.nodes.clear();
        self.children.clear();
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn allocate(&mut self) -> i64 {
        let reference = self.next_reference;
        self.next_reference += 1;
        reference
    }

    /// Registers a node. Expandable nodes get a fresh reference and can later
    /// be looked up with [`node`](Self::node).
    pub fn register(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        evaluate_name: impl Into<String>,
        expandable: bool,
    ) -> VariableNode {
        let reference = if expandable { self.allocate() } else { 0 };
        let node = VariableNode {
            name: name.into(),
            value: value.into(),
            reference,
            child_count: None,
            evaluate_name: evaluate_name.into(),
        };
        if expandable {
            self.nodes.insert(reference, node.clone());
        }
        node
    }

    /// Registers a scope root whose children are already known.
    pub fn register_scope(&mut self, name: &str, entries: &[(String, String)]) -> VariableNode {
        let mut scope = self.register(name, "", "", true);
        let children = entries
            .iter()
            .map(|(child, rendered)| {
                let expandable = rendered.starts_with(TABLE_PREFIX);
                let value = if expandable { "" } else { rendered.as_str() };
                self.register(child.as_str(), value, child.as_str(), expandable)
            })
            .collect::<Vec<_>>();
        scope.child_count = Some(children.len());
        self.set_children(scope.reference, children);
        scope
    }

    pub fn node(&self, reference: i64) -> Option<&VariableNode> {
        self.nodes.get(&reference)
    }

    pub fn children(&self, reference: i64) -> Option<&[VariableNode]> {
        self.children.get(&reference).map(Vec::as_slice)
    }

    pub fn set_children(&mut self, reference: i64, children: Vec<VariableNode>) {
        if let Some(node) = self.nodes.get_mut(&reference) {
            node.child_count = Some(children.len());
        }
        self.children.insert(reference, children);
    }

    /// Drops the cached children of `reference` so the next expansion asks
    /// the remote again.
    pub fn invalidate(&mut self, reference: i64) {
        self.children.remove(&reference);
        if let Some(node) = self.nodes.get_mut(&reference) {
            node.child_count = None;
        }
    }

    /// Replaces the rendered value of the cached child `name` of `reference`.
    pub fn update_child(&mut self, reference: i64, name: &str, value: &str) {
        let Some(children) = self.children.get_mut(&reference) else {
            return;
        };
        if let Some(child) = children.iter_mut().find(|child| child.name == name) {
            if !child.is_expandable() {
                child.value = value.to_owned();
            } else if !value.starts_with(TABLE_PREFIX) {
                self.nodes.remove(&child.reference);
                child.value = value.to_owned();
                child.reference = 0;
                child.child_count = None;
            }
        }
    }

    /// Registers the fields of a decoded table dump as children of the node
    /// at `parent_path`, recursing into nested objects and arrays.
    pub fn register_json(&mut self, parent_path: &str, value: &Value) -> Vec<VariableNode> {
        let entries: Vec<(String, String, &Value)> = match value {
            Value::Object(map) => map
                .iter()
                .map(|(key, item)| (key.clone(), child_path(parent_path, key), item))
                .collect(),
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(idx, item)| {
                    let key = (idx + 1).to_string();
                    let path = child_path(parent_path, &key);
                    (key, path, item)
                })
                .collect(),
            scalar => {
                return vec![self.register(parent_path, render_json(scalar), parent_path, false)]
            }
        };

        entries
            .into_iter()
            .map(|(name, path, item)| match item {
                Value::Object(_) | Value::Array(_) => {
                    let node = self.register(name, "", path.clone(), true);
                    let children = self.register_json(&path, item);
                    self.set_children(node.reference, children);
                    VariableNode {
                        child_count: self.node(node.reference).and_then(|n| n.child_count),
                        ..node
                    }
                }
                scalar => self.register(name, render_json(scalar), path, false),
            })
            .collect()
    }
}

fn render_json(value: &Value) -> String {
    match value {
        Value::Null => "nil".to_owned(),
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() => render_number(f),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

/// Builds the Lua path of `key` inside `parent`.
///
/// Identifier keys use dot syntax, integer keys `[N]` and everything else a
/// quoted subscript. An empty parent makes `key` a root name.
pub fn child_path(parent: &str, key: &str) -> String {
    let is_integer = !key.is_empty() && key.bytes().all(|b| b.is_ascii_digit());
    match (parent.is_empty(), is_integer) {
        (true, _) if is_identifier(key) => key.to_owned(),
        (_, true) => format!("{parent}[{key}]"),
        (false, false) if is_identifier(key) => format!("{parent}.{key}"),
        _ => format!("{parent}[{}]", serde_json::Value::from(key)),
    }
}

/// Rewrites `.N` segments of a user-supplied path into `[N]`.
pub fn normalize_path(path: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"([A-Za-z_]\w*|\])\.(\d+)\b").expect("valid regex"));
    // Overlapping segments (`a.1.2`) need a second pass.
    let mut current = path.to_owned();
    loop {
        let next = re.replace_all(&current, "$1[$2]").into_owned();
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Moves the entries of synthetic `"Nested Table"` objects into their parent.
pub fn flatten_nested(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, item) in map {
                match (key.as_str(), flatten_nested(item)) {
                    (NESTED_TABLE_KEY, Value::Object(inner)) => out.extend(inner),
                    (_, item) => {
                        out.insert(key, item);
                    }
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(flatten_nested).collect()),
        other => other,
    }
}

/// Guesses the JSON shape of a rendered Lua value.
pub fn classify(rendered: &str) -> Value {
    match rendered {
        "nil" => return Value::Null,
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    let trimmed = rendered.trim();
    if let Ok(int) = trimmed.parse::<i64>() {
        return Value::Number(int.into());
    }
    if let Some(number) = trimmed.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(number);
    }
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        if let Ok(value @ (Value::Array(_) | Value::Object(_))) =
            serde_json::from_str::<Value>(trimmed)
        {
            return value;
        }
    }
    Value::String(rendered.to_owned())
}

/// Lua type name for a classified value.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "nil",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(s) if s.starts_with(TABLE_PREFIX) => "table",
        Value::String(s) if s.starts_with("function") => "function",
        Value::String(_) => "string",
        Value::Array(_) | Value::Object(_) => "table",
    }
}
