pub const OK_PREFIX: &str = "200 OK";
pub const BAD_REQUEST_PREFIX: &str = "400 Bad Request";
pub const EXPRESSION_ERROR_PREFIX: &str = "401 Error in Expression";
pub const PAUSED_PREFIX: &str = "202 Paused";

const DUMP_HEAD: &str = "do local _={";
const DUMP_TAIL: &str = "};return _;end";

/// Status part of a reply line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyStatus {
    Ok,
    BadRequest,
    ErrorInExpression,
}

impl ReplyStatus {
    /// Classifies a line by its fixed prefix. `None` means the line is an event.
    pub fn of_line(line: &str) -> Option<Self> {
        if line.starts_with(OK_PREFIX) {
            Some(Self::Ok)
        } else if line.starts_with(BAD_REQUEST_PREFIX) {
            Some(Self::BadRequest)
        } else if line.starts_with(EXPRESSION_ERROR_PREFIX) {
            Some(Self::ErrorInExpression)
        } else {
            None
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            Self::Ok => OK_PREFIX,
            Self::BadRequest => BAD_REQUEST_PREFIX,
            Self::ErrorInExpression => EXPRESSION_ERROR_PREFIX,
        }
    }

    /// Text after the status prefix, without the separating space.
    pub fn rest_of<'a>(self, line: &'a str) -> &'a str {
        let rest = line.get(self.prefix().len()..).unwrap_or("");
        rest.strip_prefix(' ').unwrap_or(rest)
    }
}

/// Outcome of a command, as classified from its reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    /// `200 OK`, carrying whatever followed the prefix (or the EXEC payload).
    Ok(String),
    BadRequest,
    /// `401 Error in Expression`, carrying the remote detail when present.
    ErrorInExpression(String),
    /// Anything that does not start with a known reply prefix.
    Failure(String),
}

impl Reply {
    pub fn classify(line: &str) -> Self {
        match ReplyStatus::of_line(line) {
            Some(ReplyStatus::Ok) => Self::Ok(ReplyStatus::Ok.rest_of(line).to_owned()),
            Some(ReplyStatus::BadRequest) => Self::BadRequest,
            Some(ReplyStatus::ErrorInExpression) => Self::ErrorInExpression(
                ReplyStatus::ErrorInExpression.rest_of(line).to_owned(),
            ),
            None => Self::Failure(line.to_owned()),
        }
    }

    pub(crate) fn from_status(status: ReplyStatus, payload: String) -> Self {
        match status {
            ReplyStatus::Ok => Self::Ok(payload),
            ReplyStatus::BadRequest => Self::BadRequest,
            ReplyStatus::ErrorInExpression => Self::ErrorInExpression(payload),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }
}

/// Parses the byte length announced by an EXEC reply header (`200 OK 42`).
pub fn payload_length(status: ReplyStatus, line: &str) -> Option<usize> {
    let rest = status.rest_of(line).trim();
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}

/// Strips the `do local _={` / `};return _;end` dump wrapper, if present.
pub fn strip_dump_wrapper(payload: &str) -> &str {
    match payload
        .strip_prefix(DUMP_HEAD)
        .and_then(|inner| inner.strip_suffix(DUMP_TAIL))
    {
        Some(inner) => inner,
        None => payload,
    }
}

/// An unsolicited line from the debuggee.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event(pub String);

impl Event {
    pub fn line(&self) -> &str {
        &self.0
    }

    /// Location of a `202 Paused <file> <line>` notification.
    pub fn paused(&self) -> Option<(&str, u32)> {
        let rest = self.0.strip_prefix(PAUSED_PREFIX)?.trim();
        let (file, line) = rest.rsplit_once(' ')?;
        let line = line.trim().parse().ok()?;
        Some((file.trim(), line))
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
