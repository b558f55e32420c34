//! Wire-level MobDebug implementation.
//!
//! Commands are single text lines; replies start with a three digit status.
//! Anything else arriving on the socket is an event. The session keeps
//! exactly one command in flight and feeds all inbound bytes through the
//! [`demux::Demux`] state machine.

pub mod command;
pub mod demux;
pub mod reply;
mod server;
mod session;

pub use command::{Command, CommandKind, STACK_OPTIONS};
pub use reply::{Event, Reply, ReplyStatus};
pub use server::{DebugServer, DEFAULT_PORT};
pub use session::{ListenerId, MobDebugSession, SessionConfig};

// The scripted remote is compiled for this crate's own tests and, behind the
// `test-support` feature, for downstream integration suites.
#[cfg(any(test, feature = "test-support"))]
pub mod mock;
