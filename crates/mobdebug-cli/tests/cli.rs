use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::process::{Command as StdCommand, Stdio};

use assert_cmd::Command;
use predicates::prelude::*;

fn mobdebug() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("mobdebug"))
}

#[test]
fn help_mentions_listen() {
    mobdebug()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("listen"));

    mobdebug()
        .args(["listen", "--help"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("--port")
                .and(predicate::str::contains("--base-dir"))
                .and(predicate::str::contains("--config")),
        );
}

fn read_command(reader: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    line.trim_end().to_owned()
}

#[test]
fn drives_a_debuggee_from_stdin() {
    let mut child = StdCommand::new(env!("CARGO_BIN_EXE_mobdebug"))
        .args(["listen", "--host", "127.0.0.1", "--port", "0", "--base-dir", "/proj"])
        .env("RUST_LOG", "off")
        .env_remove("MOBDEBUG_CONFIG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let mut stdout = BufReader::new(child.stdout.take().unwrap());
    let mut banner = String::new();
    stdout.read_line(&mut banner).unwrap();
    let addr = banner
        .trim()
        .strip_prefix("listening on ")
        .unwrap_or_else(|| panic!("unexpected banner: {banner:?}"))
        .to_owned();

    let stream = TcpStream::connect(&addr).unwrap();
    let mut writer = stream.try_clone().unwrap();
    let mut reader = BufReader::new(stream);

    assert_eq!(read_command(&mut reader), "BASEDIR /proj");
    writer.write_all(b"200 OK\n").unwrap();

    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"break main.lua 3\nstack\nexit\n")
        .unwrap();

    assert_eq!(read_command(&mut reader), "SETB main.lua 3");
    writer.write_all(b"200 OK\n").unwrap();

    assert!(read_command(&mut reader).starts_with("STACK "));
    writer
        .write_all(
            b"200 OK do local _={{{\"update\",\"/proj/main.lua\",\"3\",\"9\"},{},{}}};return _;end\n",
        )
        .unwrap();

    assert_eq!(read_command(&mut reader), "EXIT");
    writer.write_all(b"200 OK\n").unwrap();
    drop(writer);
    drop(reader);

    let status = child.wait().unwrap();
    let mut rest = String::new();
    stdout.read_to_string(&mut rest).unwrap();
    assert!(status.success(), "stdout: {rest}");
    assert!(rest.contains("debuggee connected"), "{rest}");
    assert!(rest.contains("#0 update (main.lua:3)"), "{rest}");
}
