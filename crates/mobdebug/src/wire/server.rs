use std::net::SocketAddr;

use tokio::net::{TcpListener, ToSocketAddrs};
use tokio_util::sync::CancellationToken;

use super::session::{MobDebugSession, SessionConfig};
use crate::{ProtocolError, Result};

/// Port `mobdebug.start()` connects to when none is given.
pub const DEFAULT_PORT: u16 = 8172;

/// Listens for debuggees.
///
/// With MobDebug the Lua side dials out to the IDE, so the IDE end is the TCP
/// server. Every accepted connection becomes its own [`MobDebugSession`].
#[derive(Debug)]
pub struct DebugServer {
    listener: TcpListener,
    config: SessionConfig,
    shutdown: CancellationToken,
}

impl DebugServer {
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        Self::bind_with_config(addr, SessionConfig::default()).await
    }

    pub async fn bind_with_config(addr: impl ToSocketAddrs, config: SessionConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(
            target: "mobdebug.server",
            addr = ?listener.local_addr().ok(),
            "waiting for debuggee connections"
        );
        Ok(Self {
            listener,
            config,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Stops any pending and future [`accept`](Self::accept) calls.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Waits for the next debuggee.
    ///
    /// Fails with [`ProtocolError::ConnectionClosed`] once the server has been
    /// shut down.
    pub async fn accept(&self) -> Result<MobDebugSession> {
        let (stream, peer) = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(ProtocolError::ConnectionClosed),
            accepted = self.listener.accept() => accepted?,
        };
        tracing::info!(target: "mobdebug.server", peer = %peer, "debuggee connected");
        Ok(MobDebugSession::from_stream(stream, self.config.clone()))
    }
}
