//! Line-oriented console commands.

use serde_json::Value;

pub const HELP: &str = "\
commands:
  run | step | over | out | suspend
  break FILE LINE       set a breakpoint
  delete FILE LINE      remove a breakpoint
  stack                 fetch the call stack
  vars N                list the scopes of frame N
  expand REF            list the children of a variable
  set REF NAME JSON     assign a value to a child of REF
  eval EXPR             evaluate an expression
  exec STMT             run a statement
  exit                  end the debuggee and quit";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Run,
    Step,
    Over,
    Out,
    Suspend,
    Break { file: String, line: u32 },
    Delete { file: String, line: u32 },
    Stack,
    Vars(usize),
    Expand(i64),
    Set { reference: i64, name: String, value: Value },
    Eval(String),
    Exec(String),
    Help,
    Exit,
}

/// Parses one console line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word {
        "run" | "r" => ConsoleCommand::Run,
        "step" | "s" => ConsoleCommand::Step,
        "over" | "n" => ConsoleCommand::Over,
        "out" => ConsoleCommand::Out,
        "suspend" => ConsoleCommand::Suspend,
        "break" | "b" => {
            let (file, line) = location(rest)?;
            ConsoleCommand::Break { file, line }
        }
        "delete" => {
            let (file, line) = location(rest)?;
            ConsoleCommand::Delete { file, line }
        }
        "stack" | "bt" => ConsoleCommand::Stack,
        "vars" => ConsoleCommand::Vars(number(rest, "frame index")?),
        "expand" => ConsoleCommand::Expand(number(rest, "variable reference")?),
        "set" => {
            let mut parts = rest.splitn(3, char::is_whitespace);
            let reference = number(parts.next().unwrap_or_default(), "variable reference")?;
            let name = parts
                .next()
                .filter(|name| !name.is_empty())
                .ok_or("usage: set REF NAME JSON")?
                .to_owned();
            let raw = parts.next().map(str::trim).unwrap_or_default();
            let value = serde_json::from_str(raw)
                .map_err(|err| format!("invalid value `{raw}`: {err}"))?;
            ConsoleCommand::Set { reference, name, value }
        }
        "eval" | "p" => ConsoleCommand::Eval(required(rest, "eval EXPR")?),
        "exec" => ConsoleCommand::Exec(required(rest, "exec STMT")?),
        "help" | "?" => ConsoleCommand::Help,
        "exit" | "quit" => ConsoleCommand::Exit,
        other => return Err(format!("unknown command `{other}`; try `help`")),
    };
    Ok(Some(command))
}

fn location(rest: &str) -> Result<(String, u32), String> {
    // File names may contain spaces, the line is always last.
    let (file, line) = rest
        .rsplit_once(char::is_whitespace)
        .ok_or("expected FILE LINE")?;
    let file = file.trim();
    if file.is_empty() {
        return Err("expected FILE LINE".to_owned());
    }
    Ok((file.to_owned(), number(line, "line number")?))
}

fn number<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T, String> {
    raw.trim()
        .parse()
        .map_err(|_| format!("expected a {what}, got `{}`", raw.trim()))
}

fn required(rest: &str, usage: &str) -> Result<String, String> {
    if rest.is_empty() {
        Err(format!("usage: {usage}"))
    } else {
        Ok(rest.to_owned())
    }
}
