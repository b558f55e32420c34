use std::time::Duration;

use mobdebug::{inspect::RemoteHelpers, SessionConfig, DEFAULT_PORT};
use mobdebug_config::{ConfigError, MobDebugConfig};

#[test]
fn empty_file_uses_defaults() {
    let config = MobDebugConfig::from_toml_str("").unwrap();
    assert_eq!(config, MobDebugConfig::default());
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, DEFAULT_PORT);
    assert_eq!(config.logging.level, "info");
    assert!(config.logging.stderr);
    assert_eq!(config.session_config(), SessionConfig::default());
    assert_eq!(config.remote_helpers(), RemoteHelpers::default());
}

#[test]
fn partial_sections_keep_remaining_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mobdebug.toml");
    std::fs::write(
        &path,
        r#"
[server]
port = 9000
base_dir = "/work/game"

[session]
reply_timeout_ms = 1500

[helpers]
encode = "dkjson.encode"
"#,
    )
    .unwrap();

    let config = MobDebugConfig::load_from_path(&path).unwrap();
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.server.base_dir.as_deref(), Some("/work/game"));

    let session = config.session_config();
    assert_eq!(session.reply_timeout, Duration::from_millis(1500));
    assert_eq!(session.event_channel_size, 64);

    let helpers = config.remote_helpers();
    assert_eq!(helpers.encode, "dkjson.encode");
    assert_eq!(helpers.transform, "transform");
}

#[test]
fn unknown_keys_are_rejected() {
    let err = MobDebugConfig::from_toml_str("[server]\nprot = 1\n").unwrap_err();
    match err {
        ConfigError::Toml(message) => assert!(message.contains("prot"), "{message}"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn missing_file_reports_its_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");

    let err = MobDebugConfig::load_from_path(&path).unwrap_err();
    match &err {
        ConfigError::Io { path: reported, .. } => {
            assert_eq!(reported, &path.display().to_string())
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.to_string().contains("absent.toml"));
}
