mod console;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use mobdebug::{DebugServer, Event, Inspector, VariableNode};
use mobdebug_config::MobDebugConfig;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};

use console::ConsoleCommand;

/// Console debugger for Lua programs instrumented with MobDebug.
#[derive(Debug, Parser)]
#[command(name = "mobdebug", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Wait for a debuggee to connect, then read commands from stdin.
    Listen(ListenArgs),
}

#[derive(Debug, Args)]
struct ListenArgs {
    /// Address to listen on. Overrides `server.host`.
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (0 picks a free one). Overrides `server.port`.
    #[arg(long)]
    port: Option<u16>,

    /// Directory the debuggee resolves relative file names against.
    #[arg(long)]
    base_dir: Option<String>,

    /// Path to a TOML config file.
    ///
    /// If unset, `MOBDEBUG_CONFIG` is used as a fallback. When neither are
    /// provided the built-in defaults apply.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Listen(args) => listen(args).await,
    }
}

fn load_config(cli_path: Option<PathBuf>) -> MobDebugConfig {
    let path = cli_path.or_else(|| std::env::var_os("MOBDEBUG_CONFIG").map(PathBuf::from));
    let Some(path) = path else {
        return MobDebugConfig::default();
    };

    match MobDebugConfig::load_from_path(&path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!(
                "mobdebug: failed to load config from {}: {err}; continuing with defaults",
                path.display()
            );
            MobDebugConfig::default()
        }
    }
}

async fn listen(args: ListenArgs) -> anyhow::Result<()> {
    let mut config = load_config(args.config);
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if args.base_dir.is_some() {
        config.server.base_dir = args.base_dir;
    }
    mobdebug_config::init_tracing(&config.logging);

    let server = DebugServer::bind_with_config(
        (config.server.host.as_str(), config.server.port),
        config.session_config(),
    )
    .await
    .with_context(|| format!("failed to listen on {}:{}", config.server.host, config.server.port))?;
    println!("listening on {}", server.local_addr()?);

    let session = server.accept().await?;
    match session.peer_addr() {
        Some(peer) => println!("debuggee connected from {peer}"),
        None => println!("debuggee connected"),
    }
    if let Some(base_dir) = &config.server.base_dir {
        session
            .set_base_dir(base_dir)
            .await
            .with_context(|| format!("failed to set base dir {base_dir}"))?;
    }

    let printer = tokio::spawn(print_events(session.subscribe_events()));
    let mut inspector = Inspector::with_helpers(session.clone(), config.remote_helpers());
    let result = console_loop(&mut inspector).await;

    session.close().await;
    server.shutdown();
    printer.abort();
    result
}

async fn console_loop(inspector: &mut Inspector) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match console::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                println!("error: {message}");
                continue;
            }
        };

        let exiting = matches!(command, ConsoleCommand::Exit);
        match execute(inspector, command).await {
            Ok(()) => {}
            // The debuggee may hang up before acknowledging EXIT.
            Err(err) if exiting && err.is_terminal() => {}
            Err(err) if err.is_terminal() => return Err(err).context("debug session ended"),
            Err(err) => println!("error: {err}"),
        }
        if exiting {
            break;
        }
    }
    Ok(())
}

async fn execute(inspector: &mut Inspector, command: ConsoleCommand) -> mobdebug::Result<()> {
    let session = inspector.session().clone();
    match command {
        ConsoleCommand::Run => session.run().await?,
        ConsoleCommand::Step => session.step().await?,
        ConsoleCommand::Over => session.step_over().await?,
        ConsoleCommand::Out => session.step_out().await?,
        ConsoleCommand::Suspend => session.suspend().await?,
        ConsoleCommand::Break { file, line } => session.set_breakpoint(&file, line).await?,
        ConsoleCommand::Delete { file, line } => session.remove_breakpoint(&file, line).await?,
        ConsoleCommand::Stack => {
            for (idx, frame) in inspector.stack().await?.iter().enumerate() {
                match frame.start_line() {
                    Some(line) => println!(
                        "#{idx} {} ({}:{line})",
                        frame.function_name(),
                        frame.source_name()
                    ),
                    None => println!("#{idx} {} ({})", frame.function_name(), frame.source_name()),
                }
            }
        }
        ConsoleCommand::Vars(frame) => {
            for scope in inspector.scopes(frame)? {
                println!("{} [ref {}]", scope.name, scope.reference);
                for node in inspector.variables(scope.reference).await? {
                    print_node(&node);
                }
            }
        }
        ConsoleCommand::Expand(reference) => {
            for node in inspector.variables(reference).await? {
                print_node(&node);
            }
        }
        ConsoleCommand::Set {
            reference,
            name,
            value,
        } => {
            let literal = inspector.set_variable(reference, &name, &value).await?;
            println!("{name} = {literal}");
        }
        ConsoleCommand::Eval(expression) => {
            let values = inspector.evaluate(&expression).await?;
            if values.is_empty() {
                println!("(no values)");
            }
            for value in values {
                println!("{value}");
            }
        }
        ConsoleCommand::Exec(statement) => {
            let output = session.exec(&statement).await?;
            if !output.is_empty() {
                println!("{output}");
            }
        }
        ConsoleCommand::Help => println!("{}", console::HELP),
        ConsoleCommand::Exit => session.exit().await?,
    }
    Ok(())
}

fn print_node(node: &VariableNode) {
    if node.is_expandable() {
        println!("  {} = {{...}} [ref {}]", node.name, node.reference);
    } else {
        println!("  {} = {}", node.name, node.value);
    }
}

async fn print_events(mut events: broadcast::Receiver<Event>) {
    loop {
        match events.recv().await {
            Ok(event) => match event.paused() {
                Some((file, line)) => println!("paused at {file}:{line}"),
                None => println!("<- {event}"),
            },
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(target: "mobdebug.cli", skipped, "event printer fell behind")
            }
            Err(RecvError::Closed) => break,
        }
    }
}
