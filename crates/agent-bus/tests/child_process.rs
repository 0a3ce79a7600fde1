//! Child-process and script-process agents driven through `sh`

#![cfg(unix)]

use agent_bus::*;
use serde_json::json;
use std::io::Write;
use std::time::Duration;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(5);

fn sh(script: &str) -> Vec<String> {
    vec!["-c".to_string(), script.to_string()]
}

async fn recv(agent: &mut MailboxAgent) -> BusMessage {
    timeout(WAIT, agent.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("mailbox closed")
}

async fn wait_until_gone(bus: &Bus, name: &str) {
    timeout(WAIT, async {
        while bus.contains(name) {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("agent never deregistered");
}

#[tokio::test]
async fn test_child_output_is_broadcast_once_then_child_leaves() {
    let bus = Bus::new();
    let mut listener = bus.create_mailbox_agent(None).unwrap();

    let child = bus
        .create_child_process_agent(
            "sh",
            &sh(r#"read line; echo '{"title":"Annotations","count":3}'"#),
            None,
        )
        .await
        .unwrap();
    listener.subscribe_to(&child);
    assert_eq!(listener.subscriptions(), vec![Source::Sender(child.clone())]);
    assert!(bus.contains(&child));
    assert!(matches!(
        bus.agent_info(&child).unwrap().kind,
        AgentKind::ChildProcess { pid: Some(_) }
    ));

    assert!(listener.send_to(&child, json!("go")));

    let message = recv(&mut listener).await;
    assert_eq!(message.from, child);
    assert!(message.is_broadcast());
    assert_eq!(message.data, json!({"title": "Annotations", "count": 3}));

    wait_until_gone(&bus, &child).await;
    assert!(listener.try_recv().is_none());
    assert!(bus.transport_names().is_empty());
}

#[tokio::test]
async fn test_child_receives_full_envelope() {
    let bus = Bus::new();
    let mut listener = bus.create_mailbox_agent(Some("listener")).unwrap();

    let child = bus
        .create_child_process_agent(
            "sh",
            &sh(r#"read line; printf '{"op":"send_to","to":"listener","data":%s}\n' "$line""#),
            None,
        )
        .await
        .unwrap();

    assert!(listener.send_to(&child, json!({"question": 42})));

    let reply = recv(&mut listener).await;
    assert_eq!(reply.from, child);
    assert_eq!(reply.to.as_deref(), Some("listener"));
    assert_eq!(reply.data["from"], "listener");
    assert_eq!(reply.data["to"], child.as_str());
    assert_eq!(reply.data["data"]["question"], 42);
    assert!(reply.data["id"].is_string());
}

#[tokio::test]
async fn test_child_subscribe_command() {
    let bus = Bus::new();
    let mut collector = bus.create_mailbox_agent(Some("collector")).unwrap();

    let child = bus
        .create_child_process_agent(
            "sh",
            &sh(concat!(
                r#"echo '{"op":"subscribe"}'; "#,
                r#"echo '{"op":"send_to","to":"collector","data":"ready"}'; "#,
                r#"read line; echo "$line""#,
            )),
            None,
        )
        .await
        .unwrap();

    let ready = recv(&mut collector).await;
    assert_eq!(ready.data, "ready");
    assert_eq!(bus.subscriptions_of(&child), vec![Source::All]);

    collector.subscribe_to(&child);
    let announcer = bus.create_mailbox_agent(None).unwrap();
    assert_eq!(announcer.send(json!({"news": "page 7"})), 1);

    let echoed = recv(&mut collector).await;
    assert_eq!(echoed.from, child);
    assert_eq!(echoed.data["data"]["news"], "page 7");
    assert_eq!(echoed.data["from"], announcer.name());
}

#[tokio::test]
async fn test_spawn_failure_leaves_bus_usable() {
    let bus = Bus::new();
    let result = bus
        .create_child_process_agent("/nonexistent/agent-bus-test-program", &[], Some("ghost"))
        .await;
    assert!(matches!(result, Err(BusError::Spawn { .. })));
    assert!(!bus.contains("ghost"));
    assert!(bus.is_empty());

    let sender = bus.create_mailbox_agent(None).unwrap();
    let mut receiver = bus.create_mailbox_agent(None).unwrap();
    assert!(sender.send_to(receiver.name(), json!("still works")));
    assert!(receiver.try_recv().is_some());
}

#[tokio::test]
async fn test_privileged_child_name_conflict() {
    let bus = Bus::new();
    let _holder = bus.create_mailbox_agent(Some("indexer")).unwrap();

    let result = bus
        .create_child_process_agent("sh", &sh("sleep 5"), Some("indexer"))
        .await;
    assert!(matches!(result, Err(BusError::NameTaken(name)) if name == "indexer"));
    assert!(bus.transport_names().is_empty());
}

#[tokio::test]
async fn test_privileged_child_name() {
    let bus = Bus::new();
    let name = bus
        .create_child_process_agent("sh", &sh("sleep 5"), Some("indexer"))
        .await
        .unwrap();
    assert_eq!(name, "indexer");
    assert!(bus.is_privileged("indexer"));
    assert!(bus.close_agent("indexer"));
}

#[tokio::test]
async fn test_close_agent_kills_child() {
    let bus = Bus::new();
    let child = bus
        .create_child_process_agent("sh", &sh("sleep 30"), None)
        .await
        .unwrap();
    assert_eq!(bus.transport_names(), vec![child.clone()]);

    assert!(bus.close_agent(&child));
    assert!(!bus.contains(&child));
    assert!(bus.transport_names().is_empty());
    assert!(!bus.close_agent(&child));
}

#[tokio::test]
async fn test_malformed_lines_are_skipped() {
    let bus = Bus::new();
    let mut listener = bus.create_mailbox_agent(None).unwrap();
    listener.subscribe();

    let child = bus
        .create_child_process_agent(
            "sh",
            &sh(r#"echo '{broken'; echo ''; echo '{"valid":true}'; sleep 1"#),
            None,
        )
        .await
        .unwrap();

    let message = recv(&mut listener).await;
    assert_eq!(message.from, child);
    assert_eq!(message.data, json!({"valid": true}));
}

#[tokio::test]
async fn test_stderr_forwarding() {
    let settings = BusSettings {
        forward_stderr: true,
        ..Default::default()
    };
    let bus = Bus::with_settings(settings, ScriptHostConfig::default());
    let mut listener = bus.create_mailbox_agent(None).unwrap();
    listener.subscribe();

    let child = bus
        .create_child_process_agent("sh", &sh("echo oops >&2; sleep 1"), None)
        .await
        .unwrap();

    let message = recv(&mut listener).await;
    assert_eq!(message.from, child);
    assert_eq!(message.data, json!({"stream": "stderr", "line": "oops"}));
}

#[tokio::test]
async fn test_script_process_gets_host_environment() {
    let mut script = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        script,
        r#"printf '{{"home":"%s","path":"%s","arg":"%s"}}\n' "$TEST_SCRIPT_HOME" "$TEST_SCRIPT_PATH" "$1""#
    )
    .unwrap();
    script.flush().unwrap();

    let host = ScriptHostConfig {
        interpreter: "sh".to_string(),
        args: Vec::new(),
        home: Some("/opt/interp".into()),
        search_paths: vec!["/plugins".into()],
        home_var: "TEST_SCRIPT_HOME".to_string(),
        path_var: "TEST_SCRIPT_PATH".to_string(),
        ..Default::default()
    };
    let bus = Bus::with_settings(BusSettings::default(), host);
    let mut listener = bus.create_mailbox_agent(None).unwrap();
    listener.subscribe();

    let program = script.path().to_string_lossy().into_owned();
    let child = bus
        .create_child_script_process_agent(&program, &["first".to_string()], None)
        .await
        .unwrap();
    assert!(matches!(
        bus.agent_info(&child).map(|info| info.kind),
        Some(AgentKind::ScriptProcess { .. }) | None
    ));

    let message = recv(&mut listener).await;
    assert_eq!(message.from, child);
    assert_eq!(message.data["home"], "/opt/interp");
    assert_eq!(message.data["path"], "/plugins");
    assert_eq!(message.data["arg"], "first");
}

#[tokio::test]
async fn test_script_spawn_failure_names_interpreter() {
    let host = ScriptHostConfig {
        interpreter: "/nonexistent/interpreter".to_string(),
        ..Default::default()
    };
    let bus = Bus::with_settings(BusSettings::default(), host);
    let result = bus
        .create_child_script_process_agent("plugin.py", &[], None)
        .await;
    match result {
        Err(BusError::Spawn { program, .. }) => assert_eq!(program, "/nonexistent/interpreter"),
        other => panic!("expected spawn error, got {:?}", other.map(|_| ())),
    }
    assert!(bus.is_empty());
}

#[tokio::test]
async fn test_shutdown_closes_children() {
    let bus = Bus::new();
    let child = bus
        .create_child_process_agent("sh", &sh("sleep 30"), None)
        .await
        .unwrap();
    let pid = match bus.agent_info(&child).unwrap().kind {
        AgentKind::ChildProcess { pid } => pid,
        other => panic!("unexpected kind {:?}", other),
    };
    assert!(pid.is_some());

    bus.shutdown();
    assert!(bus.is_empty());
}

#[tokio::test]
async fn test_subprocess_runtime_eval() {
    let host = ScriptHostConfig {
        interpreter: "sh".to_string(),
        eval_args: vec!["-c".to_string(), "cat".to_string()],
        ..Default::default()
    };
    let runtime = SubprocessRuntime::new(host);

    let value = runtime.eval(r#"{"answer": 42}"#).await.unwrap();
    assert_eq!(value, json!({"answer": 42}));
    assert_eq!(runtime.eval("").await.unwrap(), serde_json::Value::Null);
    assert!(matches!(
        runtime.eval("not json").await,
        Err(BusError::Serialization(_))
    ));
}

#[tokio::test]
async fn test_subprocess_runtime_large_input_streamed_back() {
    let host = ScriptHostConfig {
        interpreter: "sh".to_string(),
        eval_args: vec!["-c".to_string(), "cat".to_string()],
        ..Default::default()
    };
    let runtime = SubprocessRuntime::new(host);
    let text = "a".repeat(1 << 20);
    let code = format!("\"{}\"", text);

    let value = timeout(Duration::from_secs(10), runtime.eval(&code))
        .await
        .expect("evaluation stalled")
        .unwrap();
    assert_eq!(value.as_str().map(str::len), Some(text.len()));
}

#[tokio::test]
async fn test_subprocess_runtime_type_names() {
    let host = ScriptHostConfig {
        interpreter: "sh".to_string(),
        eval_args: vec![
            "-c".to_string(),
            r#"read code; echo '["Outline","Highlighter","Outline"]'"#.to_string(),
        ],
        ..Default::default()
    };
    let runtime = SubprocessRuntime::new(host);
    let names: Vec<String> = runtime.type_names("utopia.extension").await.into_iter().collect();
    assert_eq!(names, vec!["Highlighter", "Outline"]);
}

#[tokio::test]
async fn test_subprocess_runtime_failure() {
    let host = ScriptHostConfig {
        interpreter: "sh".to_string(),
        eval_args: vec!["-c".to_string(), "cat >/dev/null; echo boom >&2; exit 3".to_string()],
        ..Default::default()
    };
    let runtime = SubprocessRuntime::new(host);
    match runtime.eval("anything").await {
        Err(BusError::Script(message)) => assert!(message.contains("boom")),
        other => panic!("expected script error, got {:?}", other),
    }
    assert!(runtime.type_names("api").await.is_empty());
    runtime.eval_and_discard("anything").await;
}
