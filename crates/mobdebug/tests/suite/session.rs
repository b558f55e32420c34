use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::net::{TcpListener, TcpStream};

use mobdebug::{
    wire::mock::{LoadCall, MockExec, MockMobDebugServer, MockMobDebugServerConfig},
    LuaValue, MobDebugSession, ProtocolError, SessionConfig,
};

async fn connect(mock: &MockMobDebugServer) -> MobDebugSession {
    MobDebugSession::connect(mock.addr()).await.unwrap()
}

async fn connect_with_timeout(mock: &MockMobDebugServer, timeout: Duration) -> MobDebugSession {
    let config = SessionConfig {
        reply_timeout: timeout,
        ..SessionConfig::default()
    };
    MobDebugSession::connect_with_config(mock.addr(), config)
        .await
        .unwrap()
}

fn recorder(session: &MobDebugSession) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    session.add_event_listener(move |event| {
        sink.lock().unwrap().push(event.line().to_owned());
        Ok::<_, String>(())
    });
    seen
}

#[tokio::test]
async fn events_are_delivered_in_order_before_the_reply() {
    for chunk_size in [None, Some(3)] {
        let mock = MockMobDebugServer::spawn_with_config(MockMobDebugServerConfig {
            chunk_size,
            ..MockMobDebugServerConfig::default()
                .with_event_before("RUN", "204 Output stdout 6")
                .with_event_before("RUN", "hello!")
        })
        .await
        .unwrap();
        let session = connect(&mock).await;
        let seen = recorder(&session);

        session.run().await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["204 Output stdout 6".to_owned(), "hello!".to_owned()],
            "chunk size {chunk_size:?}"
        );
    }
}

#[tokio::test]
async fn paused_events_reach_broadcast_subscribers() {
    let mock = MockMobDebugServer::spawn_with_config(
        MockMobDebugServerConfig::default().with_event_after("STEP", "202 Paused /src/main.lua 14"),
    )
    .await
    .unwrap();
    let session = connect(&mock).await;
    let mut events = session.subscribe_events();

    session.step().await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("paused event")
        .unwrap();
    assert_eq!(event.paused(), Some(("/src/main.lua", 14)));
}

#[tokio::test]
async fn failing_listeners_do_not_affect_others() {
    let mock = MockMobDebugServer::spawn_with_config(
        MockMobDebugServerConfig::default()
            .with_event_before("OVER", "first")
            .with_event_before("OVER", "second"),
    )
    .await
    .unwrap();
    let session = connect(&mock).await;

    session.add_event_listener(|_| Err("listener refuses"));
    session.add_event_listener(|event| -> Result<(), String> {
        if event.line() == "first" {
            panic!("listener blew up");
        }
        Ok(())
    });
    let seen = recorder(&session);
    let removed = session.add_event_listener(|_| -> Result<(), String> {
        panic!("removed listeners must not run")
    });
    assert!(session.remove_event_listener(removed));
    assert!(!session.remove_event_listener(removed));

    session.step_over().await.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
}

#[tokio::test]
async fn exec_payload_survives_chunked_delivery() {
    let mock = MockMobDebugServer::spawn_with_config(MockMobDebugServerConfig {
        chunk_size: Some(4),
        ..MockMobDebugServerConfig::default()
            .with_exec("return x", MockExec::Results("{x=1}".to_owned()))
            .with_exec("return a, b", MockExec::Results(r#""two\nlines",2"#.to_owned()))
    })
    .await
    .unwrap();
    let session = connect(&mock).await;

    assert_eq!(session.exec("return x").await.unwrap(), "{x=1}");

    let values = session.evaluate("a, b").await.unwrap();
    assert_eq!(
        values,
        vec![LuaValue::from("two\nlines"), LuaValue::Number(2.0)]
    );
    assert_eq!(mock.exec_calls(), 2);
}

#[tokio::test]
async fn error_replies_map_to_errors() {
    let mock = MockMobDebugServer::spawn_with_config(MockMobDebugServerConfig {
        bad_requests: vec!["SETB".to_owned()],
        ..MockMobDebugServerConfig::default()
    })
    .await
    .unwrap();
    let session = connect(&mock).await;

    let err = session.set_breakpoint("/main.lua", 3).await.unwrap_err();
    assert!(matches!(err, ProtocolError::BadRequest), "{err:?}");

    let err = session.exec("missing()").await.unwrap_err();
    match err {
        ProtocolError::ExpressionError(detail) => {
            assert!(detail.contains("attempt to call a nil value"), "{detail}")
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // The session is still usable.
    session.remove_breakpoint("/main.lua", 3).await.unwrap();
}

#[tokio::test]
async fn invalid_commands_are_rejected_before_writing() {
    let mock = MockMobDebugServer::spawn().await.unwrap();
    let session = connect(&mock).await;

    let err = session.exec("x = 1\nos.exit()").await.unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidCommand(_)), "{err:?}");

    session.suspend().await.unwrap();
    assert_eq!(mock.commands().await, vec!["SUSPEND"]);
}

#[tokio::test]
async fn close_fails_the_pending_command_and_every_later_one() {
    let mock = MockMobDebugServer::spawn_with_config(MockMobDebugServerConfig {
        unanswered: 1,
        ..MockMobDebugServerConfig::default()
    })
    .await
    .unwrap();
    let session = connect(&mock).await;

    let pending = tokio::spawn({
        let session = session.clone();
        async move { session.run().await }
    });
    while mock.commands().await.is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    session.close().await;
    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, ProtocolError::ConnectionClosed), "{err:?}");

    let err = tokio::time::timeout(Duration::from_secs(1), session.step())
        .await
        .expect("closed session must fail immediately")
        .unwrap_err();
    assert!(err.is_terminal());
    assert!(session.is_closed());
}

#[tokio::test]
async fn peer_disconnect_fails_the_pending_command() {
    let mock = MockMobDebugServer::spawn_with_config(MockMobDebugServerConfig {
        unanswered: 1,
        ..MockMobDebugServerConfig::default()
    })
    .await
    .unwrap();
    let session = connect(&mock).await;
    let token = session.shutdown_token();

    let pending = tokio::spawn({
        let session = session.clone();
        async move { session.step_out().await }
    });
    while mock.commands().await.is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    mock.disconnect();
    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, ProtocolError::ConnectionClosed), "{err:?}");
    tokio::time::timeout(Duration::from_secs(1), token.cancelled())
        .await
        .unwrap();
}

#[tokio::test]
async fn watchdog_expiry_leaves_the_session_usable() {
    let mock = MockMobDebugServer::spawn_with_config(MockMobDebugServerConfig {
        unanswered: 1,
        ..MockMobDebugServerConfig::default()
    })
    .await
    .unwrap();
    let session = connect_with_timeout(&mock, Duration::from_millis(200)).await;

    let err = session.run().await.unwrap_err();
    assert!(matches!(err, ProtocolError::Timeout), "{err:?}");
    assert!(!session.is_closed());

    session.step().await.unwrap();
    assert_eq!(mock.commands().await, vec!["RUN", "STEP"]);
}

#[tokio::test]
async fn concurrent_callers_are_serialized() {
    let mock = MockMobDebugServer::spawn_with_config(MockMobDebugServerConfig {
        chunk_size: Some(2),
        ..MockMobDebugServerConfig::default()
            .with_exec("return 1", MockExec::Results("1".to_owned()))
            .with_exec("return 2", MockExec::Results("2".to_owned()))
    })
    .await
    .unwrap();
    let session = connect(&mock).await;

    let (one, two) = tokio::join!(session.exec("return 1"), session.exec("return 2"));
    assert_eq!(one.unwrap(), "1");
    assert_eq!(two.unwrap(), "2");
}

#[tokio::test]
async fn load_file_sends_the_file_content() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("main.lua");
    std::fs::write(&path, "print(1)").unwrap();

    let mock = MockMobDebugServer::spawn().await.unwrap();
    let session = connect(&mock).await;

    session.load_file("main.lua", &path).await.unwrap();
    session.set_base_dir(r"C:\proj").await.unwrap();

    assert_eq!(
        mock.loads().await,
        vec![LoadCall {
            file: "main.lua".to_owned(),
            content: b"print(1)".to_vec(),
        }]
    );
    assert_eq!(
        mock.commands().await,
        vec!["LOAD 8 main.lua", "BASEDIR C:/proj"]
    );

    let missing = session.load_file("gone.lua", dir.path().join("gone.lua")).await;
    assert!(matches!(missing, Err(ProtocolError::Io(_))));
}

#[tokio::test]
async fn stack_decodes_the_remote_dump() {
    let mock = MockMobDebugServer::spawn_with_config(MockMobDebugServerConfig {
        stack: r#"{{"foo","file.lua","1","10"},{},{}}"#.to_owned(),
        ..MockMobDebugServerConfig::default()
    })
    .await
    .unwrap();
    let session = connect(&mock).await;

    let frames = session.stack().await.unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].function_name(), "foo");
    assert_eq!(frames[0].start_line(), Some(1));
    assert_eq!(frames[0].end_line(), Some(10));
    assert_eq!(
        mock.commands().await,
        vec!["STACK {nocode=true,compact=true,sparse=true,maxlevel=0}"]
    );
}

/// A peer that accepts the connection and never reads from it, so a large
/// enough command stalls in the kernel send buffers.
async fn stalled_peer(config: SessionConfig) -> (MobDebugSession, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (session, accepted) = tokio::join!(
        MobDebugSession::connect_with_config(addr, config),
        listener.accept()
    );
    (session.unwrap(), accepted.unwrap().0)
}

const STALLING_LOAD: usize = 64 * 1024 * 1024;

#[tokio::test]
async fn close_interrupts_a_command_stuck_writing() {
    let (session, _peer) = stalled_peer(SessionConfig {
        reply_timeout: Duration::from_secs(30),
        ..SessionConfig::default()
    })
    .await;

    let pending = tokio::spawn({
        let session = session.clone();
        async move { session.load("big.lua", vec![b'x'; STALLING_LOAD]).await }
    });
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!pending.is_finished());

    tokio::time::timeout(Duration::from_secs(3), session.close())
        .await
        .expect("close must not wait for the stalled write");
    let err = tokio::time::timeout(Duration::from_secs(3), pending)
        .await
        .expect("stalled command must fail after close")
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, ProtocolError::ConnectionClosed), "{err:?}");

    let err = tokio::time::timeout(Duration::from_secs(1), session.run())
        .await
        .expect("closed session must fail immediately")
        .unwrap_err();
    assert!(err.is_terminal());
}

#[tokio::test]
async fn watchdog_covers_a_stalled_write() {
    let (session, _peer) = stalled_peer(SessionConfig {
        reply_timeout: Duration::from_millis(300),
        ..SessionConfig::default()
    })
    .await;

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        session.load("big.lua", vec![b'x'; STALLING_LOAD]),
    )
    .await
    .expect("watchdog must fire while writing")
    .unwrap_err();
    assert!(matches!(err, ProtocolError::Timeout), "{err:?}");

    // Half a LOAD body went out, so the stream can no longer be framed.
    assert!(session.is_closed());
    let err = tokio::time::timeout(Duration::from_secs(1), session.step())
        .await
        .expect("closed session must fail immediately")
        .unwrap_err();
    assert!(matches!(err, ProtocolError::ConnectionClosed), "{err:?}");
}
