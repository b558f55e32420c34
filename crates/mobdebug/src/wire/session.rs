use std::{
    fmt, io,
    net::SocketAddr,
    panic::{catch_unwind, AssertUnwindSafe},
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, MutexGuard,
    },
    time::Duration,
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::{broadcast, mpsc, oneshot, watch, Mutex},
};
use tokio_util::sync::CancellationToken;

use super::{
    command::{Command, CommandKind},
    demux::{Demux, Output},
    reply::{Event, Reply},
};
use crate::{
    lua::{self, LuaValue},
    stack::{self, StackFrame},
    ProtocolError, Result,
};

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long a command may go without any inbound bytes before it fails
    /// with [`ProtocolError::Timeout`].
    pub reply_timeout: Duration,
    pub event_channel_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_secs(5),
            event_channel_size: 64,
        }
    }
}

/// Handle returned by [`MobDebugSession::add_event_listener`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

type Listener = Arc<dyn Fn(&Event) -> std::result::Result<(), String> + Send + Sync>;

enum Control {
    Expect {
        kind: CommandKind,
        reply: oneshot::Sender<Reply>,
    },
    Abandon,
}

struct Inner {
    writer: Mutex<OwnedWriteHalf>,
    /// Held for the whole round trip of a command.
    gate: Mutex<()>,
    control: mpsc::UnboundedSender<Control>,
    listeners: std::sync::Mutex<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
    events: broadcast::Sender<Event>,
    /// Total inbound bytes; every change restarts the reply watchdog.
    activity: watch::Sender<u64>,
    shutdown: CancellationToken,
    peer: Option<SocketAddr>,
    config: SessionConfig,
}

impl Inner {
    /// The listener list, recovered if a listener panicked while it was held.
    fn listeners(&self, context: &'static str) -> MutexGuard<'_, Vec<(ListenerId, Listener)>> {
        self.listeners.lock().unwrap_or_else(|err| {
            tracing::error!(
                target: "mobdebug.session",
                context,
                "listener registry poisoned; continuing with recovered guard"
            );
            err.into_inner()
        })
    }
}

/// One connection to a debuggee.
///
/// Cloning is cheap and every clone drives the same connection. Commands are
/// serialized: a second caller waits until the first command's reply (or
/// failure) before anything is written.
#[derive(Clone)]
pub struct MobDebugSession {
    inner: Arc<Inner>,
}

impl fmt::Debug for MobDebugSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MobDebugSession")
            .field("peer", &self.inner.peer)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl MobDebugSession {
    /// Connects to a remote that is listening for the IDE.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        Self::connect_with_config(addr, SessionConfig::default()).await
    }

    pub async fn connect_with_config(addr: SocketAddr, config: SessionConfig) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::from_stream(stream, config))
    }

    /// Wraps an already established connection and starts its read task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_stream(stream: TcpStream, config: SessionConfig) -> Self {
        let _ = stream.set_nodelay(true);
        let peer = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();
        let (events, _) = broadcast::channel(config.event_channel_size.max(1));
        let (control, control_rx) = mpsc::unbounded_channel();
        let (activity, _) = watch::channel(0);

        let inner = Arc::new(Inner {
            writer: Mutex::new(writer),
            gate: Mutex::new(()),
            control,
            listeners: std::sync::Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            events,
            activity,
            shutdown: CancellationToken::new(),
            peer,
            config,
        });

        tokio::spawn(read_loop(reader, inner.clone(), control_rx));
        tracing::debug!(target: "mobdebug.session", peer = ?peer, "session started");

        Self { inner }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// A token cancelled once the session is closed, by [`close`](Self::close)
    /// or because the debuggee went away.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Closes the connection. A command in flight fails with
    /// [`ProtocolError::ConnectionClosed`], as does every later command.
    ///
    /// Returns without waiting for a command that is stuck writing; that
    /// command notices the cancellation and shuts the write half itself.
    pub async fn close(&self) {
        self.inner.shutdown.cancel();
        if let Ok(mut writer) = self.inner.writer.try_lock() {
            let _ = writer.shutdown().await;
        }
    }

    /// Registers a callback for every unsolicited line from the debuggee.
    ///
    /// Listeners run on the read task, in registration order. One that returns
    /// an error or panics is logged and skipped; the others still run.
    pub fn add_event_listener<F, E>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Event) -> std::result::Result<(), E> + Send + Sync + 'static,
        E: fmt::Display,
    {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        let boxed: Listener =
            Arc::new(move |event: &Event| listener(event).map_err(|err| err.to_string()));
        self.inner.listeners("add_event_listener").push((id, boxed));
        id
    }

    /// Returns false if `id` was not registered.
    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners("remove_event_listener");
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.inner.events.subscribe()
    }

    /// Sends a raw command and returns its classified reply.
    ///
    /// Only transport problems are errors here; a `400 Bad Request` comes back
    /// as [`Reply::BadRequest`].
    pub async fn send(&self, command: Command) -> Result<Reply> {
        command.validate().map_err(ProtocolError::InvalidCommand)?;

        let _gate = tokio::select! {
            _ = self.inner.shutdown.cancelled() => return Err(ProtocolError::ConnectionClosed),
            gate = self.inner.gate.lock() => gate,
        };
        if self.is_closed() {
            return Err(ProtocolError::ConnectionClosed);
        }

        tracing::debug!(target: "mobdebug.session", command = %command, "sending command");

        let (tx, rx) = oneshot::channel();
        let mut activity = self.inner.activity.subscribe();
        self.inner
            .control
            .send(Control::Expect {
                kind: command.kind(),
                reply: tx,
            })
            .map_err(|_| ProtocolError::ConnectionClosed)?;

        if let Err(err) = self.write_command(&command.encode()).await {
            let _ = self.inner.control.send(Control::Abandon);
            let err = match err {
                ProtocolError::Io(_) if self.is_closed() => ProtocolError::ConnectionClosed,
                other => other,
            };
            tracing::warn!(
                target: "mobdebug.session",
                command = %command,
                error = %err,
                "failed to write command"
            );
            return Err(err);
        }

        let reply = self.await_reply(rx, &mut activity).await;
        match &reply {
            Ok(reply) => tracing::debug!(
                target: "mobdebug.session",
                command = %command,
                reply = ?reply,
                "command finished"
            ),
            Err(err) => tracing::debug!(
                target: "mobdebug.session",
                command = %command,
                error = %err,
                "command failed"
            ),
        }
        reply
    }

    /// Writes one encoded command.
    ///
    /// Each write races the shutdown token and the watchdog, which restarts
    /// whenever the peer accepts more bytes. A stall after part of the command
    /// went out leaves the stream unframed, so the session is closed.
    async fn write_command(&self, bytes: &[u8]) -> Result<()> {
        let shutdown = &self.inner.shutdown;
        let timeout = self.inner.config.reply_timeout;

        let mut writer = tokio::select! {
            _ = shutdown.cancelled() => return Err(ProtocolError::ConnectionClosed),
            writer = self.inner.writer.lock() => writer,
        };

        let mut written = 0;
        while written < bytes.len() {
            let step = tokio::select! {
                _ = shutdown.cancelled() => Err(ProtocolError::ConnectionClosed),
                _ = tokio::time::sleep(timeout) => Err(ProtocolError::Timeout),
                n = writer.write(&bytes[written..]) => match n {
                    Ok(0) => Err(ProtocolError::Io(io::ErrorKind::WriteZero.into())),
                    Ok(n) => Ok(n),
                    Err(err) => Err(ProtocolError::Io(err)),
                },
            };
            match step {
                Ok(n) => written += n,
                Err(err) => {
                    if written > 0 || shutdown.is_cancelled() {
                        shutdown.cancel();
                        let _ = writer.shutdown().await;
                    }
                    return Err(err);
                }
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => Err(ProtocolError::ConnectionClosed),
            flushed = writer.flush() => flushed.map_err(ProtocolError::Io),
        }
    }

    async fn await_reply(
        &self,
        mut rx: oneshot::Receiver<Reply>,
        activity: &mut watch::Receiver<u64>,
    ) -> Result<Reply> {
        let timeout = self.inner.config.reply_timeout;
        let mut watching = true;
        loop {
            tokio::select! {
                reply = &mut rx => {
                    return reply.map_err(|_| ProtocolError::ConnectionClosed);
                }
                changed = activity.changed(), if watching => {
                    // The read task is gone; `rx` resolves as closed next.
                    if changed.is_err() {
                        watching = false;
                    }
                }
                _ = tokio::time::sleep(timeout) => {
                    let _ = self.inner.control.send(Control::Abandon);
                    tracing::warn!(
                        target: "mobdebug.session",
                        timeout_ms = timeout.as_millis() as u64,
                        "no reply before the watchdog expired"
                    );
                    return Err(ProtocolError::Timeout);
                }
            }
        }
    }

    /// Sends `command` and requires a `200 OK`, returning whatever followed it.
    async fn send_ok(&self, command: Command) -> Result<String> {
        match self.send(command).await? {
            Reply::Ok(payload) => Ok(payload),
            Reply::BadRequest => Err(ProtocolError::BadRequest),
            Reply::ErrorInExpression(detail) => Err(ProtocolError::ExpressionError(detail)),
            Reply::Failure(line) => Err(ProtocolError::Failure(line)),
        }
    }

    pub async fn run(&self) -> Result<()> {
        self.send_ok(Command::Run).await.map(drop)
    }

    pub async fn exit(&self) -> Result<()> {
        self.send_ok(Command::Exit).await.map(drop)
    }

    pub async fn step(&self) -> Result<()> {
        self.send_ok(Command::Step).await.map(drop)
    }

    pub async fn step_over(&self) -> Result<()> {
        self.send_ok(Command::StepOver).await.map(drop)
    }

    pub async fn step_out(&self) -> Result<()> {
        self.send_ok(Command::StepOut).await.map(drop)
    }

    pub async fn suspend(&self) -> Result<()> {
        self.send_ok(Command::Suspend).await.map(drop)
    }

    pub async fn set_breakpoint(&self, file: &str, line: u32) -> Result<()> {
        self.send_ok(Command::SetBreakpoint {
            file: file.to_owned(),
            line,
        })
        .await
        .map(drop)
    }

    pub async fn remove_breakpoint(&self, file: &str, line: u32) -> Result<()> {
        self.send_ok(Command::RemoveBreakpoint {
            file: file.to_owned(),
            line,
        })
        .await
        .map(drop)
    }

    pub async fn set_base_dir(&self, path: &str) -> Result<()> {
        self.send_ok(Command::BaseDir {
            path: path.to_owned(),
        })
        .await
        .map(drop)
    }

    /// Sends a chunk for the remote to load and run under `file`'s name.
    pub async fn load(&self, file: &str, content: impl Into<Vec<u8>>) -> Result<()> {
        self.send_ok(Command::load(file, content)).await.map(drop)
    }

    /// Reads `path` from disk and loads it under the name `file`.
    pub async fn load_file(&self, file: &str, path: impl AsRef<Path>) -> Result<()> {
        let content = tokio::fs::read(path.as_ref()).await?;
        self.load(file, content).await
    }

    /// Executes a statement remotely. Returns the serialized results with the
    /// dump wrapper removed, e.g. `"table: 0x5580",2` for `return t, 2`.
    pub async fn exec(&self, statement: &str) -> Result<String> {
        self.send_ok(Command::exec(statement)).await
    }

    /// Evaluates `expression` and parses each returned value.
    pub async fn evaluate(&self, expression: &str) -> Result<Vec<LuaValue>> {
        let payload = self.exec(&format!("return {expression}")).await?;
        parse_results(&payload)
    }

    /// Fetches and decodes the call stack of the paused debuggee.
    pub async fn stack(&self) -> Result<Vec<StackFrame>> {
        let payload = self.send_ok(Command::Stack).await?;
        stack::decode(&payload)
    }
}

/// Parses the comma-separated values of an `EXEC` payload.
pub(crate) fn parse_results(payload: &str) -> Result<Vec<LuaValue>> {
    if payload.trim().is_empty() {
        return Ok(Vec::new());
    }
    match lua::parse(&format!("return {{{payload}}}"))? {
        LuaValue::Array(values) => Ok(values),
        other => Ok(vec![other]),
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    inner: Arc<Inner>,
    mut control: mpsc::UnboundedReceiver<Control>,
) {
    let mut demux = Demux::new();
    let mut pending: Option<oneshot::Sender<Reply>> = None;
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        tokio::select! {
            // Control messages go first so a command is registered with the
            // demux before any byte of its reply is looked at.
            biased;
            _ = inner.shutdown.cancelled() => break,
            msg = control.recv() => match msg {
                Some(Control::Expect { kind, reply }) => {
                    demux.expect_reply(kind);
                    pending = Some(reply);
                }
                Some(Control::Abandon) => {
                    demux.reset();
                    pending = None;
                }
                None => break,
            },
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    tracing::debug!(target: "mobdebug.session", "debuggee closed the connection");
                    break;
                }
                Ok(n) => {
                    inner.activity.send_modify(|total| *total += n as u64);
                    for output in demux.feed(&buf[..n]) {
                        match output {
                            Output::Event(event) => dispatch_event(&inner, event),
                            Output::Reply(reply) => {
                                if let Some(tx) = pending.take() {
                                    let _ = tx.send(reply);
                                }
                            }
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(target: "mobdebug.session", error = %err, "read failed");
                    break;
                }
            },
        }
    }

    demux.close();
    inner.shutdown.cancel();
    // Dropping the sender fails the command in flight with `ConnectionClosed`.
    drop(pending);
    tracing::debug!(target: "mobdebug.session", peer = ?inner.peer, "session closed");
}

fn dispatch_event(inner: &Inner, event: Event) {
    tracing::trace!(target: "mobdebug.session", event = %event, "event");

    let listeners: Vec<(ListenerId, Listener)> = inner.listeners("dispatch_event").clone();
    for (id, listener) in listeners {
        match catch_unwind(AssertUnwindSafe(|| listener(&event))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!(
                target: "mobdebug.session",
                listener = %id,
                error = %err,
                "event listener failed"
            ),
            Err(_) => tracing::error!(
                target: "mobdebug.session",
                listener = %id,
                "event listener panicked"
            ),
        }
    }

    // No receivers is fine.
    let _ = inner.events.send(event);
}
