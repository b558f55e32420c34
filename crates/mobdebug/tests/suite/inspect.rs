use mobdebug::{
    inspect::RemoteHelpers,
    wire::mock::{MockExec, MockMobDebugServer, MockMobDebugServerConfig},
    Inspector, MobDebugSession, ProtocolError, VariableNode,
};
use serde_json::json;

const STACK: &str = concat!(
    r#"{{"update","game.lua","10","42","Lua","global","/work/game.lua"},"#,
    r#"{player={{},"table: 0x5580"},dt={0.016,"0.016"},stale={{},"table: 0x9000"}},"#,
    r#"{count={3,"3"}}}"#
);

fn scripted() -> MockMobDebugServerConfig {
    MockMobDebugServerConfig {
        stack: STACK.to_owned(),
        ..MockMobDebugServerConfig::default()
    }
    .with_exec(
        "return tostring(player)",
        MockExec::Results(r#""table: 0x5580""#.to_owned()),
    )
    .with_exec(
        "return json.encode(transform(player))",
        MockExec::Results(
            r#""{\"name\":\"bob\",\"Nested Table\":{\"pos\":{\"x\":1,\"y\":2.5}},\"items\":[\"sword\"]}""#
                .to_owned(),
        ),
    )
    .with_exec("return tostring(stale)", MockExec::Results("nil".to_owned()))
    .with_exec("player.name = \"alice\"", MockExec::Results(String::new()))
    .with_exec("count = 4", MockExec::Results(String::new()))
}

fn child<'a>(children: &'a [VariableNode], name: &str) -> &'a VariableNode {
    children
        .iter()
        .find(|c| c.name == name)
        .unwrap_or_else(|| panic!("no child named {name} in {children:?}"))
}

async fn inspector(mock: &MockMobDebugServer) -> Inspector {
    let session = MobDebugSession::connect(mock.addr()).await.unwrap();
    let mut inspector = Inspector::new(session);
    inspector.stack().await.unwrap();
    inspector
}

#[tokio::test]
async fn scopes_split_params_and_fields() {
    let mock = MockMobDebugServer::spawn_with_config(scripted()).await.unwrap();
    let mut inspector = inspector(&mock).await;

    let frame = &inspector.frames()[0];
    assert_eq!(frame.function_name(), "update");
    assert_eq!(frame.source_name(), "game.lua");

    let [params, fields] = inspector.scopes(0).unwrap();
    assert_eq!((params.name, params.child_count), ("Params", 3));
    assert_eq!((fields.name, fields.child_count), ("Fields", 1));

    let children = inspector.variables(params.reference).await.unwrap();
    let names: Vec<_> = children.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["player", "dt", "stale"]);
    assert!(children[0].is_expandable());
    assert_eq!(children[0].value, "");
    assert_eq!(children[1].value, "0.016");
    assert!(!children[1].is_expandable());

    // Scope children come from the stack dump; nothing was executed remotely.
    assert_eq!(mock.exec_calls(), 0);
    assert!(matches!(
        inspector.scopes(5),
        Err(ProtocolError::UnknownReference(5))
    ));
}

#[tokio::test]
async fn expanding_a_table_queries_the_remote_once() {
    let mock = MockMobDebugServer::spawn_with_config(scripted()).await.unwrap();
    let mut inspector = inspector(&mock).await;
    let [params, _] = inspector.scopes(0).unwrap();
    let player = inspector.variables(params.reference).await.unwrap()[0].clone();

    let children = inspector.variables(player.reference).await.unwrap();
    assert_eq!(mock.exec_calls(), 2);

    let mut names: Vec<_> = children.iter().map(|c| c.name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["items", "name", "pos"]);
    let name = child(&children, "name");
    assert_eq!(name.value, "bob");
    assert_eq!(name.evaluate_name, "player.name");

    let again = inspector.variables(player.reference).await.unwrap();
    assert_eq!(again, children);

    let pos = inspector
        .variables(child(&children, "pos").reference)
        .await
        .unwrap();
    assert_eq!(child(&pos, "x").evaluate_name, "player.pos.x");
    assert_eq!(child(&pos, "y").value, "2.5");
    let items = inspector
        .variables(child(&children, "items").reference)
        .await
        .unwrap();
    assert_eq!(items[0].evaluate_name, "player.items[1]");
    assert_eq!(items[0].value, "sword");

    assert_eq!(mock.exec_calls(), 2);
}

#[tokio::test]
async fn values_that_are_no_longer_tables_resolve_to_a_leaf() {
    let mock = MockMobDebugServer::spawn_with_config(scripted()).await.unwrap();
    let mut inspector = inspector(&mock).await;
    let [params, _] = inspector.scopes(0).unwrap();
    let stale = inspector.variables(params.reference).await.unwrap()[2].clone();

    let children = inspector.variables(stale.reference).await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].name, "stale");
    assert_eq!(children[0].value, "nil");
    assert_eq!(children[0].reference, 0);
}

#[tokio::test]
async fn a_new_stack_forgets_old_references() {
    let mock = MockMobDebugServer::spawn_with_config(scripted()).await.unwrap();
    let mut inspector = inspector(&mock).await;
    let [old, _] = inspector.scopes(0).unwrap();

    inspector.stack().await.unwrap();
    let err = inspector.variables(old.reference).await.unwrap_err();
    assert!(matches!(err, ProtocolError::UnknownReference(r) if r == old.reference));

    let [new, _] = inspector.scopes(0).unwrap();
    assert!(new.reference > old.reference);
}

#[tokio::test]
async fn set_variable_sends_a_lua_literal() {
    let mock = MockMobDebugServer::spawn_with_config(scripted()).await.unwrap();
    let mut inspector = inspector(&mock).await;
    let [params, fields] = inspector.scopes(0).unwrap();
    let player = inspector.variables(params.reference).await.unwrap()[0].clone();
    inspector.variables(player.reference).await.unwrap();
    assert_eq!(mock.exec_calls(), 2);

    let literal = inspector
        .set_variable(player.reference, "name", &json!("alice"))
        .await
        .unwrap();
    assert_eq!(literal, "\"alice\"");
    assert!(inspector.store().children(player.reference).is_none());

    inspector
        .set_variable(fields.reference, "count", &json!(4))
        .await
        .unwrap();
    let fields = inspector.variables(fields.reference).await.unwrap();
    assert_eq!(fields[0].value, "4");

    let commands = mock.commands().await;
    assert!(commands.contains(&"EXEC player.name = \"alice\"".to_owned()));
    assert!(commands.contains(&"EXEC count = 4".to_owned()));
}

#[tokio::test]
async fn helper_names_are_configurable() {
    let config = scripted().with_exec(
        "return dump(prepare(player))",
        MockExec::Results(r#""{\"hp\":10}""#.to_owned()),
    );
    let mock = MockMobDebugServer::spawn_with_config(config).await.unwrap();
    let session = MobDebugSession::connect(mock.addr()).await.unwrap();
    let mut inspector = Inspector::with_helpers(
        session,
        RemoteHelpers {
            encode: "dump".to_owned(),
            transform: "prepare".to_owned(),
        },
    );
    inspector.stack().await.unwrap();
    let [params, _] = inspector.scopes(0).unwrap();
    let player = inspector.variables(params.reference).await.unwrap()[0].clone();

    let children = inspector.variables(player.reference).await.unwrap();
    assert_eq!(children[0].name, "hp");
    assert_eq!(children[0].value, "10");
}
