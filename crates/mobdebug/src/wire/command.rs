use std::fmt;

/// Options sent with `STACK`. Matches what the remote side needs to produce a
/// single-line, code-free dump of every frame.
pub const STACK_OPTIONS: &str = "{nocode=true,compact=true,sparse=true,maxlevel=0}";

/// Outbound MobDebug commands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Run,
    Exit,
    Step,
    StepOver,
    StepOut,
    Suspend,
    SetBreakpoint { file: String, line: u32 },
    RemoveBreakpoint { file: String, line: u32 },
    BaseDir { path: String },
    Load { size: usize, file: String, content: Vec<u8> },
    Exec { statement: String },
    Stack,
}

/// Discriminant of a [`Command`], used by the demultiplexer to pick the reply framing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandKind {
    Run,
    Exit,
    Step,
    StepOver,
    StepOut,
    Suspend,
    SetBreakpoint,
    RemoveBreakpoint,
    BaseDir,
    Load,
    Exec,
    Stack,
}

impl Command {
    /// Builds a `LOAD` command whose declared size is the content length.
    pub fn load(file: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        let content = content.into();
        Self::Load {
            size: content.len(),
            file: file.into(),
            content,
        }
    }

    pub fn exec(statement: impl Into<String>) -> Self {
        Self::Exec {
            statement: statement.into(),
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Run => CommandKind::Run,
            Self::Exit => CommandKind::Exit,
            Self::Step => CommandKind::Step,
            Self::StepOver => CommandKind::StepOver,
            Self::StepOut => CommandKind::StepOut,
            Self::Suspend => CommandKind::Suspend,
            Self::SetBreakpoint { .. } => CommandKind::SetBreakpoint,
            Self::RemoveBreakpoint { .. } => CommandKind::RemoveBreakpoint,
            Self::BaseDir { .. } => CommandKind::BaseDir,
            Self::Load { .. } => CommandKind::Load,
            Self::Exec { .. } => CommandKind::Exec,
            Self::Stack => CommandKind::Stack,
        }
    }

    /// Renders the exact bytes written to the socket.
    pub fn encode(&self) -> Vec<u8> {
        let line = match self {
            Self::Run => "RUN".to_owned(),
            Self::Exit => "EXIT".to_owned(),
            Self::Step => "STEP".to_owned(),
            Self::StepOver => "OVER".to_owned(),
            Self::StepOut => "OUT".to_owned(),
            Self::Suspend => "SUSPEND".to_owned(),
            Self::SetBreakpoint { file, line } => format!("SETB {file} {line}"),
            Self::RemoveBreakpoint { file, line } => format!("DELB {file}:{line}"),
            Self::BaseDir { path } => format!("BASEDIR {}", path.replace('\\', "/")),
            Self::Load { size, file, .. } => format!("LOAD {size} {file}"),
            Self::Exec { statement } => format!("EXEC {statement}"),
            Self::Stack => format!("STACK {STACK_OPTIONS}"),
        };

        let mut out = line.into_bytes();
        out.push(b'\n');
        if let Self::Load { content, .. } = self {
            out.extend_from_slice(content);
        }
        out
    }

    /// Checks that the command can be framed on the wire.
    ///
    /// Line parameters must not contain newlines, and a `LOAD` body must be
    /// exactly as long as its declared size.
    pub fn validate(&self) -> Result<(), String> {
        let param = match self {
            Self::SetBreakpoint { file, .. } | Self::RemoveBreakpoint { file, .. } => Some(file),
            Self::BaseDir { path } => Some(path),
            Self::Load { file, .. } => Some(file),
            Self::Exec { statement } => Some(statement),
            _ => None,
        };
        if param.is_some_and(|p| p.contains(['\n', '\r'])) {
            return Err(format!("{self} has a parameter with an embedded newline"));
        }
        if let Self::Load { size, content, .. } = self {
            if *size != content.len() {
                return Err(format!(
                    "{self} declares {size} bytes but carries {}",
                    content.len()
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run => f.write_str("[command.run]"),
            Self::Exit => f.write_str("[command.exit]"),
            Self::Step => f.write_str("[command.step]"),
            Self::StepOver => f.write_str("[command.stepOver]"),
            Self::StepOut => f.write_str("[command.stepOut]"),
            Self::Suspend => f.write_str("[command.suspend]"),
            Self::SetBreakpoint { file, line } => {
                write!(f, "[command.setBreakpoint(file: {file}, line: {line})]")
            }
            Self::RemoveBreakpoint { file, line } => {
                write!(f, "[command.removeBreakpoint(file: {file}, line: {line})]")
            }
            Self::BaseDir { path } => write!(f, "[command.basedir(path: {path})]"),
            Self::Load { size, file, .. } => {
                write!(f, "[command.load(size: {size}, file: {file})]")
            }
            Self::Exec { statement } => write!(f, "[command.exec(statement: {statement})]"),
            Self::Stack => f.write_str("[command.stack]"),
        }
    }
}
