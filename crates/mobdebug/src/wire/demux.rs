//! Sans-I/O demultiplexer for the MobDebug receive stream.
//!
//! The remote side writes command replies and unsolicited notifications onto
//! the same socket with no framing beyond newlines. [`Demux`] is fed raw byte
//! chunks as they arrive and yields, in arrival order, the event lines and at
//! most one reply for the command currently in flight.

use super::{
    command::CommandKind,
    reply::{payload_length, strip_dump_wrapper, Event, Reply, ReplyStatus},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DemuxState {
    Idle,
    AwaitingReply { kind: CommandKind },
    /// An EXEC header announced `expected` bytes of payload.
    AwaitingPayload { status: ReplyStatus, expected: usize },
    Closed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Output {
    Event(Event),
    Reply(Reply),
}

#[derive(Debug)]
pub struct Demux {
    state: DemuxState,
    buffer: Vec<u8>,
}

impl Default for Demux {
    fn default() -> Self {
        Self::new()
    }
}

impl Demux {
    pub fn new() -> Self {
        Self {
            state: DemuxState::Idle,
            buffer: Vec::new(),
        }
    }

    pub fn state(&self) -> DemuxState {
        self.state
    }

    /// Bytes received but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Marks `kind` as the command in flight. The next reply line resolves it.
    pub fn expect_reply(&mut self, kind: CommandKind) {
        if self.state != DemuxState::Closed {
            self.state = DemuxState::AwaitingReply { kind };
        }
    }

    /// Abandons the command in flight.
    ///
    /// A partially received EXEC payload is discarded along with it; buffered
    /// line data is kept so that pending events are not lost.
    pub fn reset(&mut self) {
        match self.state {
            DemuxState::Closed => {}
            DemuxState::AwaitingPayload { .. } => {
                self.buffer.clear();
                self.state = DemuxState::Idle;
            }
            _ => self.state = DemuxState::Idle,
        }
    }

    pub fn close(&mut self) {
        self.state = DemuxState::Closed;
        self.buffer.clear();
    }

    /// Appends `chunk` and returns everything that became complete.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Output> {
        let mut out = Vec::new();
        if self.state == DemuxState::Closed {
            return out;
        }
        self.buffer.extend_from_slice(chunk);

        loop {
            if let DemuxState::AwaitingPayload { status, expected } = self.state {
                if self.buffer.len() < expected {
                    break;
                }
                let payload: Vec<u8> = self.buffer.drain(..expected).collect();
                let payload = String::from_utf8_lossy(&payload);
                let payload = strip_dump_wrapper(&payload).to_owned();
                self.state = DemuxState::Idle;
                out.push(Output::Reply(Reply::from_status(status, payload)));
                continue;
            }

            let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') else {
                break;
            };
            let raw: Vec<u8> = self.buffer.drain(..=newline).collect();
            let mut raw = &raw[..raw.len() - 1];
            if let Some(stripped) = raw.strip_suffix(b"\r") {
                raw = stripped;
            }
            if raw.is_empty() {
                continue;
            }
            let line = String::from_utf8_lossy(raw).into_owned();
            self.handle_line(line, &mut out);
        }

        out
    }

    fn handle_line(&mut self, line: String, out: &mut Vec<Output>) {
        let Some(status) = ReplyStatus::of_line(&line) else {
            tracing::trace!(target: "mobdebug.demux", line = %line, "event line");
            out.push(Output::Event(Event(line)));
            return;
        };

        let DemuxState::AwaitingReply { kind } = self.state else {
            tracing::warn!(
                target: "mobdebug.demux",
                line = %line,
                state = ?self.state,
                "reply with no command in flight; dropping"
            );
            return;
        };

        if kind == CommandKind::Exec && status != ReplyStatus::BadRequest {
            if let Some(expected) = payload_length(status, &line) {
                self.state = DemuxState::AwaitingPayload { status, expected };
                return;
            }
        }

        self.state = DemuxState::Idle;
        let reply = match status {
            ReplyStatus::Ok | ReplyStatus::ErrorInExpression => {
                Reply::from_status(status, status.rest_of(&line).to_owned())
            }
            ReplyStatus::BadRequest => Reply::BadRequest,
        };
        out.push(Output::Reply(reply));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(line: &str) -> Output {
        Output::Event(Event(line.to_owned()))
    }

    fn ok(payload: &str) -> Output {
        Output::Reply(Reply::Ok(payload.to_owned()))
    }

    #[test]
    fn events_precede_the_reply_in_a_single_chunk() {
        let mut demux = Demux::new();
        demux.expect_reply(CommandKind::Run);
        let out = demux.feed(b"204 Output stdout 3\n202 Paused main.lua 4\n200 OK\n");
        assert_eq!(
            out,
            vec![
                event("204 Output stdout 3"),
                event("202 Paused main.lua 4"),
                ok("")
            ]
        );
        assert_eq!(demux.state(), DemuxState::Idle);
    }

    #[test]
    fn lines_split_across_chunks_are_reassembled() {
        let mut demux = Demux::new();
        demux.expect_reply(CommandKind::Step);
        let input = b"event one\nevent two\n200 OK\n";
        let mut out = Vec::new();
        for chunk in input.chunks(3) {
            out.extend(demux.feed(chunk));
        }
        assert_eq!(out, vec![event("event one"), event("event two"), ok("")]);
    }

    #[test]
    fn carriage_returns_and_blank_lines_are_ignored() {
        let mut demux = Demux::new();
        demux.expect_reply(CommandKind::SetBreakpoint);
        let out = demux.feed(b"\r\n\n400 Bad Request\r\n");
        assert_eq!(out, vec![Output::Reply(Reply::BadRequest)]);
    }

    #[test]
    fn exec_payload_is_read_by_byte_count() {
        let mut demux = Demux::new();
        demux.expect_reply(CommandKind::Exec);
        let payload = b"do local _={x=1};return _;end";
        assert_eq!(payload.len(), 29);

        assert!(demux.feed(b"200 OK 29\n").is_empty());
        assert_eq!(
            demux.state(),
            DemuxState::AwaitingPayload {
                status: ReplyStatus::Ok,
                expected: 29
            }
        );
        assert!(demux.feed(&payload[..10]).is_empty());
        assert_eq!(demux.feed(&payload[10..]), vec![ok("x=1")]);
        assert_eq!(demux.state(), DemuxState::Idle);
    }

    #[test]
    fn exec_payload_may_contain_newlines() {
        let mut demux = Demux::new();
        demux.expect_reply(CommandKind::Exec);
        let payload = "do local _={\"a\\\nb\"};return _;end";
        let header = format!("200 OK {}\n", payload.len());
        let mut bytes = header.into_bytes();
        bytes.extend_from_slice(payload.as_bytes());
        bytes.extend_from_slice(b"202 Paused main.lua 9\n");

        let out = demux.feed(&bytes);
        assert_eq!(out, vec![ok("\"a\\\nb\""), event("202 Paused main.lua 9")]);
    }

    #[test]
    fn exec_without_length_resolves_immediately() {
        let mut demux = Demux::new();
        demux.expect_reply(CommandKind::Exec);
        assert_eq!(demux.feed(b"200 OK\n"), vec![ok("")]);
    }

    #[test]
    fn expression_errors_carry_their_payload() {
        let mut demux = Demux::new();
        demux.expect_reply(CommandKind::Exec);
        let out = demux.feed(b"401 Error in Expression 5\noops!");
        assert_eq!(
            out,
            vec![Output::Reply(Reply::ErrorInExpression("oops!".to_owned()))]
        );
    }

    #[test]
    fn length_suffix_is_not_special_outside_exec() {
        let mut demux = Demux::new();
        demux.expect_reply(CommandKind::Load);
        assert_eq!(demux.feed(b"200 OK 12\n"), vec![ok("12")]);
    }

    #[test]
    fn replies_while_idle_are_dropped() {
        let mut demux = Demux::new();
        let out = demux.feed(b"200 OK\nsome event\n");
        assert_eq!(out, vec![event("some event")]);
    }

    #[test]
    fn reset_discards_partial_payload() {
        let mut demux = Demux::new();
        demux.expect_reply(CommandKind::Exec);
        demux.feed(b"200 OK 100\npartial");
        demux.reset();
        assert_eq!(demux.state(), DemuxState::Idle);
        assert_eq!(demux.buffered(), 0);

        demux.expect_reply(CommandKind::Run);
        assert_eq!(demux.feed(b"200 OK\n"), vec![ok("")]);
    }

    #[test]
    fn closed_demux_ignores_input() {
        let mut demux = Demux::new();
        demux.close();
        demux.expect_reply(CommandKind::Run);
        assert!(demux.feed(b"200 OK\n").is_empty());
        assert_eq!(demux.state(), DemuxState::Closed);
    }
}
