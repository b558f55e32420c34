use serde_json::Value;

use crate::{
    lua::{self, FormatOptions, LuaValue},
    stack::StackFrame,
    variables::{
        child_path, flatten_nested, normalize_path, VariableNode, VariableStore, TABLE_PREFIX,
    },
    wire::MobDebugSession,
    ProtocolError, Result,
};

/// Names of the Lua helpers the debuggee provides for dumping tables.
///
/// Variable expansion runs `return <encode>(<transform>(<path>))` remotely
/// and expects a JSON string back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteHelpers {
    pub encode: String,
    pub transform: String,
}

impl Default for RemoteHelpers {
    fn default() -> Self {
        Self {
            encode: "json.encode".to_owned(),
            transform: "transform".to_owned(),
        }
    }
}

/// Scope returned by [`Inspector::scopes`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Scope {
    pub name: &'static str,
    pub reference: i64,
    pub child_count: usize,
}

/// Stack and variable inspection on top of a [`MobDebugSession`].
///
/// Owns the session's [`VariableStore`]: [`stack`](Self::stack) starts a new
/// generation of variables, and expanded tables are cached until then.
pub struct Inspector {
    session: MobDebugSession,
    helpers: RemoteHelpers,
    store: VariableStore,
    frames: Vec<StackFrame>,
}

impl Inspector {
    pub fn new(session: MobDebugSession) -> Self {
        Self::with_helpers(session, RemoteHelpers::default())
    }

    pub fn with_helpers(session: MobDebugSession, helpers: RemoteHelpers) -> Self {
        Self {
            session,
            helpers,
            store: VariableStore::new(),
            frames: Vec::new(),
        }
    }

    pub fn session(&self) -> &MobDebugSession {
        &self.session
    }

    pub fn store(&self) -> &VariableStore {
        &self.store
    }

    /// Frames from the last [`stack`](Self::stack) call.
    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    /// Fetches the call stack and resets the variable store.
    pub async fn stack(&mut self) -> Result<&[StackFrame]> {
        let frames = self.session.stack().await?;
        self.store.reset();
        self.frames = frames;
        Ok(&self.frames)
    }

    /// Registers the `Params` and `Fields` scopes of frame `frame`.
    pub fn scopes(&mut self, frame: usize) -> Result<[Scope; 2]> {
        let Some(frame) = self.frames.get(frame) else {
            return Err(ProtocolError::UnknownReference(frame as i64));
        };
        let params: Vec<(String, String)> = frame.params.clone().into_iter().collect();
        let fields: Vec<(String, String)> = frame.fields.clone().into_iter().collect();

        let params = self.store.register_scope("Params", &params);
        let fields = self.store.register_scope("Fields", &fields);
        Ok([
            Scope {
                name: "Params",
                reference: params.reference,
                child_count: params.child_count.unwrap_or_default(),
            },
            Scope {
                name: "Fields",
                reference: fields.reference,
                child_count: fields.child_count.unwrap_or_default(),
            },
        ])
    }

    /// Children of `reference`, asking the remote only the first time.
    pub async fn variables(&mut self, reference: i64) -> Result<Vec<VariableNode>> {
        if let Some(children) = self.store.children(reference) {
            return Ok(children.to_vec());
        }
        let node = self
            .store
            .node(reference)
            .cloned()
            .ok_or(ProtocolError::UnknownReference(reference))?;

        let path = normalize_path(&node.evaluate_name);
        let rendered = self.tostring(&path).await?;
        let children = if rendered.starts_with(TABLE_PREFIX) {
            let dump = self.dump_table(&path).await?;
            self.store.register_json(&path, &dump)
        } else {
            vec![self.store.register(node.name.as_str(), rendered, path.as_str(), false)]
        };

        tracing::debug!(
            target: "mobdebug.stack",
            reference,
            path = %path,
            children = children.len(),
            "expanded variable"
        );
        self.store.set_children(reference, children.clone());
        Ok(children)
    }

    /// Assigns `value` to the child `name` of `reference` and returns the Lua
    /// literal that was sent.
    pub async fn set_variable(
        &mut self,
        reference: i64,
        name: &str,
        value: &Value,
    ) -> Result<String> {
        let parent = self
            .store
            .node(reference)
            .ok_or(ProtocolError::UnknownReference(reference))?;
        let path = self
            .store
            .children(reference)
            .and_then(|children| children.iter().find(|child| child.name == name))
            .map(|child| child.evaluate_name.clone())
            .unwrap_or_else(|| child_path(&parent.evaluate_name, name));

        let is_scope = parent.evaluate_name.is_empty();

        let literal = lua::format_value(value, &FormatOptions::compact(), 0);
        self.session
            .exec(&format!("{} = {literal}", normalize_path(&path)))
            .await?;

        // Scope roots have no Lua path to re-query, so their entry is patched.
        if is_scope {
            self.store.update_child(reference, name, &literal);
        } else {
            self.store.invalidate(reference);
        }
        Ok(literal)
    }

    /// Evaluates an arbitrary expression in the paused debuggee.
    pub async fn evaluate(&mut self, expression: &str) -> Result<Vec<LuaValue>> {
        self.session.evaluate(&normalize_path(expression)).await
    }

    async fn tostring(&self, path: &str) -> Result<String> {
        let values = self.session.evaluate(&format!("tostring({path})")).await?;
        Ok(values.first().map(LuaValue::render).unwrap_or_else(|| "nil".to_owned()))
    }

    async fn dump_table(&self, path: &str) -> Result<Value> {
        let RemoteHelpers { encode, transform } = &self.helpers;
        let values = self
            .session
            .evaluate(&format!("{encode}({transform}({path}))"))
            .await?;
        let json = match values.first() {
            Some(LuaValue::Str(json)) => json.as_str(),
            other => {
                return Err(ProtocolError::Failure(format!(
                    "expected a JSON string from {encode}, got {}",
                    other.map(LuaValue::to_string).unwrap_or_else(|| "nothing".to_owned())
                )))
            }
        };
        Ok(flatten_nested(serde_json::from_str(json)?))
    }
}
