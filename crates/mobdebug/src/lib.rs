//! Client for the MobDebug remote Lua debugging protocol.
//!
//! A Lua program running `mobdebug.start()` connects to the IDE over TCP and
//! then waits for line-oriented commands (`RUN`, `STEP`, `SETB`, `EXEC`, ...).
//! The same socket also carries unsolicited notifications such as
//! `202 Paused <file> <line>`.
//!
//! - [`wire`] speaks the protocol: command encoding, reply demultiplexing, the
//!   async [`wire::MobDebugSession`] and the listening [`wire::DebugServer`].
//! - [`lua`] parses and formats the Lua literals the remote side uses for
//!   values.
//! - [`stack`], [`variables`] and [`inspect`] turn `STACK` and `EXEC` replies
//!   into frames and a lazily expanded variable tree.

pub mod inspect;
pub mod lua;
pub mod stack;
pub mod variables;
pub mod wire;

use thiserror::Error;

pub use inspect::Inspector;
pub use lua::{LuaValue, ParseError};
pub use stack::StackFrame;
pub use variables::{VariableNode, VariableStore};
pub use wire::{
    Command, DebugServer, Event, ListenerId, MobDebugSession, Reply, SessionConfig,
    DEFAULT_PORT,
};

pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("remote rejected the command (400 Bad Request)")]
    BadRequest,
    #[error("error in expression: {0}")]
    ExpressionError(String),
    #[error("unexpected reply: {0:?}")]
    Failure(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("timed out waiting for a reply")]
    Timeout,
    #[error("connection to the debuggee is closed")]
    ConnectionClosed,
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("malformed table dump: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown variables reference {0}")]
    UnknownReference(i64),
}

impl ProtocolError {
    /// Errors after which no further command can succeed on the session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ConnectionClosed)
    }
}
