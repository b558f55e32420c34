use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{tcp::OwnedWriteHalf, TcpListener},
    sync::Mutex,
};
use tokio_util::sync::CancellationToken;

/// A scripted MobDebug remote used for unit and integration testing.
///
/// It accepts a single connection and answers commands the way
/// `mobdebug.lua` does, without needing a Lua interpreter. Replies and events
/// can be split into small writes to exercise reassembly on the client side.
pub struct MockMobDebugServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<State>,
}

/// Result of an `EXEC` statement known to the mock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MockExec {
    /// Serialized return values, written inside the dump wrapper.
    Results(String),
    /// Message sent with `401 Error in Expression`.
    Error(String),
}

#[derive(Clone, Debug, Default)]
pub struct MockMobDebugServerConfig {
    /// `(keyword, line)` pairs written before the reply to a matching command.
    pub events_before_reply: Vec<(String, String)>,
    /// `(keyword, line)` pairs written after the reply to a matching command.
    pub events_after_reply: Vec<(String, String)>,
    /// Frame list returned by `STACK`, without the dump wrapper.
    pub stack: String,
    /// `EXEC` statement to result. Unknown statements fail with a 401.
    pub exec: HashMap<String, MockExec>,
    /// Keywords answered with `400 Bad Request`.
    pub bad_requests: Vec<String>,
    /// Number of leading commands that never get a reply.
    pub unanswered: usize,
    /// When set, every response is written in pieces of this many bytes.
    pub chunk_size: Option<usize>,
}

impl MockMobDebugServerConfig {
    pub fn with_exec(mut self, statement: &str, result: MockExec) -> Self {
        self.exec.insert(statement.to_owned(), result);
        self
    }

    pub fn with_event_before(mut self, keyword: &str, line: &str) -> Self {
        self.events_before_reply
            .push((keyword.to_owned(), line.to_owned()));
        self
    }

    pub fn with_event_after(mut self, keyword: &str, line: &str) -> Self {
        self.events_after_reply
            .push((keyword.to_owned(), line.to_owned()));
        self
    }
}

/// A `LOAD` received by the mock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadCall {
    pub file: String,
    pub content: Vec<u8>,
}

struct State {
    config: MockMobDebugServerConfig,
    commands: Mutex<Vec<String>>,
    loads: Mutex<Vec<LoadCall>>,
    exec_calls: AtomicUsize,
    received: AtomicUsize,
}

impl MockMobDebugServer {
    pub async fn spawn() -> std::io::Result<Self> {
        Self::spawn_with_config(MockMobDebugServerConfig::default()).await
    }

    pub async fn spawn_with_config(config: MockMobDebugServerConfig) -> std::io::Result<Self> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();

        let state = Arc::new(State {
            config,
            commands: Mutex::new(Vec::new()),
            loads: Mutex::new(Vec::new()),
            exec_calls: AtomicUsize::new(0),
            received: AtomicUsize::new(0),
        });
        let task_shutdown = shutdown.clone();
        let task_state = state.clone();

        tokio::spawn(async move {
            let _ = run(listener, task_state, task_shutdown).await;
        });

        Ok(Self {
            addr,
            shutdown,
            state,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Command lines received so far, without `LOAD` bodies.
    pub async fn commands(&self) -> Vec<String> {
        self.state.commands.lock().await.clone()
    }

    pub async fn loads(&self) -> Vec<LoadCall> {
        self.state.loads.lock().await.clone()
    }

    pub fn exec_calls(&self) -> usize {
        self.state.exec_calls.load(Ordering::SeqCst)
    }

    /// Drops the connection as if the debuggee had exited.
    pub fn disconnect(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for MockMobDebugServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run(
    listener: TcpListener,
    state: Arc<State>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let (socket, _) = tokio::select! {
        _ = shutdown.cancelled() => return Ok(()),
        accept = listener.accept() => accept?,
    };
    let (reader, mut writer) = socket.into_split();
    let mut reader = BufReader::new(reader);

    loop {
        let mut raw = Vec::new();
        let read = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            read = reader.read_until(b'\n', &mut raw) => read?,
        };
        if read == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&raw).trim_end_matches(['\r', '\n']).to_owned();
        state.commands.lock().await.push(line.clone());

        let (keyword, rest) = line.split_once(' ').unwrap_or((line.as_str(), ""));
        if keyword == "LOAD" {
            let (size, file) = rest.split_once(' ').unwrap_or((rest, ""));
            let mut content = vec![0u8; size.parse().unwrap_or(0)];
            reader.read_exact(&mut content).await?;
            state.loads.lock().await.push(LoadCall {
                file: file.to_owned(),
                content,
            });
        }

        if state.received.fetch_add(1, Ordering::SeqCst) < state.config.unanswered {
            continue;
        }

        let mut out = Vec::new();
        for (kw, event) in &state.config.events_before_reply {
            if kw == keyword {
                push_line(&mut out, event);
            }
        }
        out.extend(reply_for(&state, keyword, rest));
        for (kw, event) in &state.config.events_after_reply {
            if kw == keyword {
                push_line(&mut out, event);
            }
        }
        write_out(&mut writer, &out, state.config.chunk_size).await?;

        if keyword == "EXIT" {
            return Ok(());
        }
    }
}

fn push_line(out: &mut Vec<u8>, line: &str) {
    out.extend_from_slice(line.as_bytes());
    out.push(b'\n');
}

fn reply_for(state: &State, keyword: &str, rest: &str) -> Vec<u8> {
    if state.config.bad_requests.iter().any(|kw| kw == keyword) {
        return b"400 Bad Request\n".to_vec();
    }
    match keyword {
        "RUN" | "STEP" | "OVER" | "OUT" | "SUSPEND" | "SETB" | "DELB" | "BASEDIR" | "LOAD"
        | "EXIT" => b"200 OK\n".to_vec(),
        "STACK" => format!(
            "200 OK do local _={{{}}};return _;end\n",
            state.config.stack
        )
        .into_bytes(),
        "EXEC" => {
            state.exec_calls.fetch_add(1, Ordering::SeqCst);
            let result = state.config.exec.get(rest).cloned().unwrap_or_else(|| {
                MockExec::Error(format!("[string \"{rest}\"]:1: attempt to call a nil value"))
            });
            match result {
                MockExec::Results(results) => {
                    let payload = format!("do local _={{{results}}};return _;end");
                    format!("200 OK {}\n{payload}", payload.len()).into_bytes()
                }
                MockExec::Error(message) => {
                    format!("401 Error in Expression {}\n{message}", message.len()).into_bytes()
                }
            }
        }
        _ => b"400 Bad Request\n".to_vec(),
    }
}

async fn write_out(
    writer: &mut OwnedWriteHalf,
    bytes: &[u8],
    chunk_size: Option<usize>,
) -> std::io::Result<()> {
    match chunk_size {
        Some(size) if size > 0 => {
            for chunk in bytes.chunks(size) {
                writer.write_all(chunk).await?;
                writer.flush().await?;
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        }
        _ => writer.write_all(bytes).await?,
    }
    writer.flush().await
}
