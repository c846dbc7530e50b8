mod common;

use common::{handle, runtime_with, CallLog, FakeSandbox, GateFactory, ScriptedFactory};
use pipecore::{
    ExecutionEvent, ExecutionResult, NodeDefinition, NodeStatus, RunStatus, Value,
    WorkflowDefinition,
};
use piperuntime::{ExecutorRegistry, MemoryStore, PipeRuntime, RuntimeConfig};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

fn rows(n: usize) -> Value {
    Value::from(json!((0..n)
        .map(|i| json!({"id": i, "label": format!("row-{}", i)}))
        .collect::<Vec<_>>()))
}

fn emit_x(log: &CallLog) -> Arc<ScriptedFactory> {
    ScriptedFactory::new("emit_x", log, |_, _| ExecutionResult::success().with_output("x", 1))
}

fn failing(log: &CallLog) -> Arc<ScriptedFactory> {
    ScriptedFactory::new("failing", log, |_, _| ExecutionResult::failure("division by zero"))
}

fn passthrough(log: &CallLog) -> Arc<ScriptedFactory> {
    ScriptedFactory::new("passthrough", log, |inputs, _| {
        let value = inputs.get("input").cloned().unwrap_or(Value::Null);
        ExecutionResult::success().with_output("output", value)
    })
}

#[tokio::test]
async fn test_single_node_run_completes() {
    let log = CallLog::default();
    let mut registry = ExecutorRegistry::new();
    registry.register(emit_x(&log));
    let (runtime, _) = runtime_with(registry, RuntimeConfig::default());

    let mut definition = WorkflowDefinition::new("single");
    definition.add_node(
        NodeDefinition::new("A", "emit_x")
            .with_parameter("scale", 2)
            .with_parameter("label", "first"),
    );

    let snapshot = runtime.execute(definition, handle()).await.unwrap();

    assert_eq!(snapshot.run.status, RunStatus::Completed);
    assert!(snapshot.run.error.is_none());
    assert_eq!(snapshot.node("A").unwrap().status, NodeStatus::Completed);

    // Result carries a summary, not the data itself
    let result = snapshot.run.result.as_ref().unwrap();
    let summary = result["A"].get("x").unwrap();
    assert_eq!(summary.get("type").and_then(Value::as_str), Some("number"));
    assert_eq!(summary.get("truncated").and_then(Value::as_bool), Some(false));

    let persisted = runtime.node_records(snapshot.run.id).await.unwrap();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].outputs.get("x"), Some(&Value::from(1)));
    assert_eq!(persisted[0].parameters.get("scale"), Some(&Value::from(2)));
    assert_eq!(persisted[0].parameters.get("label"), Some(&Value::from("first")));
    let run = runtime.run_record(snapshot.run.id).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.start_time.is_some() && run.end_time.is_some());
}

#[tokio::test]
async fn test_failed_producer_fails_consumer_with_missing_input() {
    let log = CallLog::default();
    let mut registry = ExecutorRegistry::new();
    registry.register(failing(&log));
    registry.register(passthrough(&log));
    let (runtime, _) = runtime_with(registry, RuntimeConfig::default());

    let mut definition = WorkflowDefinition::new("a-to-b");
    definition.add_node(NodeDefinition::new("A", "failing"));
    definition.add_node(NodeDefinition::new("B", "passthrough"));
    definition.connect("A", "output", "B", "input");

    let snapshot = runtime.execute(definition, handle()).await.unwrap();

    let a = snapshot.node("A").unwrap();
    assert_eq!(a.status, NodeStatus::Failed);
    assert!(a.error.as_deref().unwrap().contains("division by zero"));

    let b = snapshot.node("B").unwrap();
    assert_eq!(b.status, NodeStatus::Failed);
    let error = b.error.as_deref().unwrap();
    assert!(error.contains("missing input 'input'"), "got: {}", error);
    assert!(error.contains("upstream node failed"), "got: {}", error);

    assert_eq!(snapshot.run.status, RunStatus::Failed);
    assert_eq!(snapshot.run.error.as_deref(), Some("2 node(s) failed"));
    assert_eq!(log.order(), vec!["failing"], "B never reaches its executor");
}

#[tokio::test]
async fn test_cycle_rejects_run_before_dispatch() {
    let log = CallLog::default();
    let mut registry = ExecutorRegistry::new();
    registry.register(passthrough(&log));
    let (runtime, _) = runtime_with(registry, RuntimeConfig::default());
    let mut events = runtime.subscribe_events();

    let mut definition = WorkflowDefinition::new("cycle");
    definition.add_node(NodeDefinition::new("A", "passthrough"));
    definition.add_node(NodeDefinition::new("B", "passthrough"));
    definition.connect("A", "output", "B", "input");
    definition.connect("B", "output", "A", "input");

    let run_id = runtime.submit(definition, handle()).unwrap();
    assert!(!runtime.start(run_id).await.unwrap());

    let engine = runtime.engines().get(run_id).unwrap();
    assert_eq!(engine.status(), RunStatus::Failed);
    let snapshot = engine.snapshot().await;
    assert!(snapshot.nodes.is_empty());
    assert!(snapshot.run.error.as_deref().unwrap().contains("A -> B -> A"));
    assert!(log.calls().is_empty());

    let persisted = runtime.run_record(run_id).await.unwrap();
    assert_eq!(persisted.status, RunStatus::Failed);
    assert!(runtime.node_records(run_id).await.unwrap().is_empty());

    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, ExecutionEvent::NodeStarted { .. }),
            "no node may start in a cyclic run"
        );
    }
}

#[tokio::test]
async fn test_empty_definition_fails_start() {
    let (runtime, _) = runtime_with(ExecutorRegistry::new(), RuntimeConfig::default());
    let run_id = runtime.submit(WorkflowDefinition::default(), handle()).unwrap();

    assert!(!runtime.start(run_id).await.unwrap());
    let run = runtime.run_record(run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.unwrap().contains("no nodes"));
}

#[tokio::test]
async fn test_missing_input_does_not_cascade_as_skipped() {
    let log = CallLog::default();
    let mut registry = ExecutorRegistry::new();
    registry.register(failing(&log));
    registry.register(passthrough(&log));
    let (runtime, _) = runtime_with(registry, RuntimeConfig::default());

    let mut definition = WorkflowDefinition::new("chain");
    definition.add_node(NodeDefinition::new("A", "failing"));
    definition.add_node(NodeDefinition::new("B", "passthrough"));
    definition.add_node(NodeDefinition::new("C", "passthrough"));
    definition.connect("A", "output", "B", "input");
    definition.connect("B", "output", "C", "input");

    let snapshot = runtime.execute(definition, handle()).await.unwrap();

    for id in ["B", "C"] {
        let node = snapshot.node(id).unwrap();
        assert_eq!(node.status, NodeStatus::Failed, "{} fails on its own", id);
        assert!(node.error.as_deref().unwrap().contains("missing input"));
    }
    assert_eq!(snapshot.run.error.as_deref(), Some("3 node(s) failed"));
}

#[tokio::test]
async fn test_absent_output_port_is_reported() {
    let log = CallLog::default();
    let mut registry = ExecutorRegistry::new();
    registry.register(emit_x(&log));
    registry.register(passthrough(&log));
    let (runtime, _) = runtime_with(registry, RuntimeConfig::default());

    let mut definition = WorkflowDefinition::new("wrong-port");
    definition.add_node(NodeDefinition::new("A", "emit_x"));
    definition.add_node(NodeDefinition::new("B", "passthrough"));
    definition.connect("A", "y", "B", "input");

    let snapshot = runtime.execute(definition, handle()).await.unwrap();

    assert_eq!(snapshot.node("A").unwrap().status, NodeStatus::Completed);
    let error = snapshot.node("B").unwrap().error.clone().unwrap();
    assert!(error.contains("has no output 'y'"), "got: {}", error);
    assert!(error.contains("output port not produced"), "got: {}", error);
    assert_eq!(snapshot.run.status, RunStatus::Failed);
}

#[tokio::test]
async fn test_outputs_flow_along_edges() {
    let log = CallLog::default();
    let mut registry = ExecutorRegistry::new();
    registry.register(emit_x(&log));
    registry.register(passthrough(&log));
    let (runtime, _) = runtime_with(registry, RuntimeConfig::default());

    let mut definition = WorkflowDefinition::new("flow");
    definition.add_node(NodeDefinition::new("B", "passthrough"));
    definition.add_node(NodeDefinition::new("A", "emit_x"));
    definition.connect("A", "x", "B", "input");

    let snapshot = runtime.execute(definition, handle()).await.unwrap();

    assert_eq!(snapshot.run.status, RunStatus::Completed);
    assert_eq!(log.order(), vec!["emit_x", "passthrough"]);
    let inputs = log.inputs_of("passthrough").unwrap();
    assert_eq!(inputs.get("input"), Some(&Value::from(1)));

    let order: Vec<&str> = snapshot.nodes.iter().map(|n| n.node_id.as_str()).collect();
    assert_eq!(order, vec!["A", "B"], "records follow topological order");
}

#[tokio::test]
async fn test_start_twice_does_not_duplicate_dispatch() {
    let log = CallLog::default();
    let mut registry = ExecutorRegistry::new();
    registry.register(emit_x(&log));
    let (runtime, _) = runtime_with(registry, RuntimeConfig::default());

    let mut definition = WorkflowDefinition::new("once");
    definition.add_node(NodeDefinition::new("A", "emit_x"));
    let run_id = runtime.submit(definition, handle()).unwrap();

    assert!(runtime.start(run_id).await.unwrap());
    assert!(!runtime.start(run_id).await.unwrap());

    let engine = runtime.engines().get(run_id).unwrap();
    assert_eq!(engine.wait().await, RunStatus::Completed);
    assert!(!engine.start().await);
    assert_eq!(log.calls().len(), 1);
}

#[tokio::test]
async fn test_large_output_truncated_on_record_but_delivered_in_full() {
    let log = CallLog::default();
    let mut registry = ExecutorRegistry::new();
    registry.register(ScriptedFactory::new("big", &log, |_, _| {
        ExecutionResult::success().with_output("rows", rows(500))
    }));
    registry.register(passthrough(&log));

    let mut config = RuntimeConfig::default();
    config.engine.truncation.threshold_bytes = 256;
    let (runtime, _) = runtime_with(registry, config);

    let mut definition = WorkflowDefinition::new("truncation");
    definition.add_node(NodeDefinition::new("A", "big"));
    definition.add_node(NodeDefinition::new("B", "passthrough"));
    definition.connect("A", "rows", "B", "input");

    let snapshot = runtime.execute(definition, handle()).await.unwrap();
    assert_eq!(snapshot.run.status, RunStatus::Completed);

    let delivered = log.inputs_of("passthrough").unwrap();
    assert_eq!(delivered.get("input"), Some(&rows(500)), "downstream sees the full value");

    let persisted = runtime.node_records(snapshot.run.id).await.unwrap();
    let a = persisted.iter().find(|n| n.node_id == "A").unwrap();
    let stored = a.outputs.get("rows").unwrap();
    assert_eq!(stored.get("truncated").and_then(Value::as_bool), Some(true));
    assert_eq!(
        stored.get("originalSize").and_then(Value::as_i64),
        Some(rows(500).serialized_size() as i64)
    );
    assert_ne!(stored.get("preview"), Some(&rows(500)));

    let b = persisted.iter().find(|n| n.node_id == "B").unwrap();
    let input_snapshot = b.inputs.get("input").unwrap();
    assert_eq!(input_snapshot.get("truncated").and_then(Value::as_bool), Some(true));

    let summary = &snapshot.run.result.as_ref().unwrap()["A"];
    assert_eq!(
        summary.get("rows").and_then(|s| s.get("truncated")).and_then(Value::as_bool),
        Some(true)
    );
}

#[tokio::test]
async fn test_cancel_skips_pending_nodes() {
    let log = CallLog::default();
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let mut registry = ExecutorRegistry::new();
    registry.register(Arc::new(GateFactory {
        entered: entered.clone(),
        release: release.clone(),
    }));
    registry.register(passthrough(&log));
    let (runtime, _) = runtime_with(registry, RuntimeConfig::default());

    let mut definition = WorkflowDefinition::new("cancel");
    definition.add_node(NodeDefinition::new("gate", "gate"));
    definition.add_node(NodeDefinition::new("after", "passthrough"));
    definition.add_node(NodeDefinition::new("other", "passthrough"));
    definition.connect("gate", "output", "after", "input");

    let run_id = runtime.submit(definition, handle()).unwrap();
    assert!(runtime.start(run_id).await.unwrap());
    entered.notified().await;

    let engine = runtime.engines().get(run_id).unwrap();
    let before = engine.snapshot().await;
    assert_eq!(before.nodes.len(), 3, "all records exist before nodes finish");
    assert_eq!(before.node("gate").unwrap().status, NodeStatus::Running);

    assert!(runtime.cancel(run_id).await);
    assert!(!runtime.cancel(run_id).await, "cancel only applies while running");
    assert_eq!(engine.wait().await, RunStatus::Canceled);

    let after_cancel = engine.snapshot().await;
    assert_eq!(after_cancel.node("after").unwrap().status, NodeStatus::Skipped);
    assert_eq!(after_cancel.node("other").unwrap().status, NodeStatus::Skipped);

    // The in-flight node finishes; nothing else starts
    release.notify_one();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let settled = engine.snapshot().await;
    assert_eq!(settled.node("gate").unwrap().status, NodeStatus::Completed);
    assert_eq!(settled.node("after").unwrap().status, NodeStatus::Skipped);
    assert_eq!(settled.run.status, RunStatus::Canceled);
    assert!(log.calls().is_empty());

    let persisted = runtime.node_records(run_id).await.unwrap();
    assert!(persisted
        .iter()
        .filter(|n| n.node_id != "gate")
        .all(|n| n.status == NodeStatus::Skipped));

    // The stored run log includes what the in-flight node logged after cancel
    let run = runtime.run_record(run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Canceled);
    assert!(run
        .logs
        .iter()
        .any(|l| l.node_id.as_deref() == Some("gate") && l.message.starts_with("completed in")));
}

#[tokio::test]
async fn test_unregistered_component_resolves_by_type() {
    let log = CallLog::default();
    let mut registry = ExecutorRegistry::new();
    registry.register(ScriptedFactory::typed("debug_log", "debug", &log, |_, _| {
        ExecutionResult::success().with_output("output", "seen")
    }));
    let (runtime, _) = runtime_with(registry, RuntimeConfig::default());

    let mut definition = WorkflowDefinition::new("by type");
    definition.add_node(NodeDefinition::new("typed", "debug_custom").with_type("debug"));
    definition.add_node(NodeDefinition::new("untyped", "debug_custom").with_type(""));

    let snapshot = runtime.execute(definition, handle()).await.unwrap();

    let typed = snapshot.node("typed").unwrap();
    assert_eq!(typed.status, NodeStatus::Completed);
    assert_eq!(typed.outputs.get("output"), Some(&Value::from("seen")));
    assert_eq!(log.order(), vec!["debug_custom".to_string()]);

    // An empty type is no type: the script fallback runs and wants code
    let untyped = snapshot.node("untyped").unwrap();
    assert_eq!(untyped.status, NodeStatus::Failed);
    assert!(untyped
        .error
        .as_deref()
        .unwrap()
        .contains("no executor registered for component 'debug_custom'"));
}

#[tokio::test]
async fn test_oversized_node_record_is_stripped_and_run_continues() {
    let log = CallLog::default();
    let mut registry = ExecutorRegistry::new();
    registry.register(ScriptedFactory::new("wide", &log, |_, _| {
        ExecutionResult::success().with_output("output", "x".repeat(5000))
    }));
    registry.register(passthrough(&log));

    let sandbox = Arc::new(FakeSandbox::running());
    let store = Arc::new(MemoryStore::with_payload_limit(2000));
    let runtime = PipeRuntime::with_store(sandbox, registry, store, RuntimeConfig::default());

    let mut definition = WorkflowDefinition::new("oversize");
    definition.add_node(NodeDefinition::new("A", "wide"));
    definition.add_node(NodeDefinition::new("B", "passthrough"));
    definition.connect("A", "output", "B", "input");

    let snapshot = runtime.execute(definition, handle()).await.unwrap();
    assert_eq!(snapshot.run.status, RunStatus::Completed);

    let persisted = runtime.node_records(snapshot.run.id).await.unwrap();
    let a = persisted.iter().find(|n| n.node_id == "A").unwrap();
    assert_eq!(a.status, NodeStatus::Completed);
    assert_eq!(a.outputs.get("output"), Some(&Value::Null));

    let delivered = log.inputs_of("passthrough").unwrap();
    assert_eq!(delivered.get("input").and_then(Value::as_str).map(str::len), Some(5000));
}

#[tokio::test]
async fn test_panicking_executor_fails_only_its_node() {
    let log = CallLog::default();
    let mut registry = ExecutorRegistry::new();
    registry.register(ScriptedFactory::new("explodes", &log, |_, _| -> ExecutionResult {
        panic!("boom")
    }));
    registry.register(emit_x(&log));
    let (runtime, _) = runtime_with(registry, RuntimeConfig::default());

    let mut definition = WorkflowDefinition::new("panic");
    definition.add_node(NodeDefinition::new("bad", "explodes"));
    definition.add_node(NodeDefinition::new("good", "emit_x"));

    let snapshot = runtime.execute(definition, handle()).await.unwrap();

    let bad = snapshot.node("bad").unwrap();
    assert_eq!(bad.status, NodeStatus::Failed);
    assert!(bad.error.as_deref().unwrap().contains("boom"));
    assert_eq!(snapshot.node("good").unwrap().status, NodeStatus::Completed);
    assert_eq!(snapshot.run.status, RunStatus::Failed);
}

#[tokio::test]
async fn test_executor_logs_reach_run_log_and_events() {
    let log = CallLog::default();
    let mut registry = ExecutorRegistry::new();
    registry.register(ScriptedFactory::new("chatty", &log, |_, _| {
        ExecutionResult::success()
            .with_log("loaded 3 rows")
            .with_output("output", 3)
    }));
    let (runtime, _) = runtime_with(registry, RuntimeConfig::default());
    let mut events = runtime.subscribe_events();

    let mut definition = WorkflowDefinition::new("logs");
    definition.add_node(NodeDefinition::new("A", "chatty"));
    let snapshot = runtime.execute(definition, handle()).await.unwrap();

    assert!(snapshot
        .run
        .logs
        .iter()
        .any(|l| l.node_id.as_deref() == Some("A") && l.message == "loaded 3 rows"));

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.run_id(), snapshot.run.id);
        kinds.push(match event {
            ExecutionEvent::RunStarted { .. } => "run_started",
            ExecutionEvent::NodeStarted { .. } => "node_started",
            ExecutionEvent::NodeLog { .. } => "node_log",
            ExecutionEvent::NodeFinished { .. } => "node_finished",
            ExecutionEvent::NodeSkipped { .. } => "node_skipped",
            ExecutionEvent::RunFinished { .. } => "run_finished",
        });
    }
    assert_eq!(
        kinds,
        vec!["run_started", "node_started", "node_log", "node_finished", "run_finished"]
    );
}

#[tokio::test]
async fn test_engine_registry_keeps_entries_until_removed() {
    let log = CallLog::default();
    let mut registry = ExecutorRegistry::new();
    registry.register(emit_x(&log));
    let (runtime, _) = runtime_with(registry, RuntimeConfig::default());

    let mut definition = WorkflowDefinition::new("keep");
    definition.add_node(NodeDefinition::new("A", "emit_x"));
    let snapshot = runtime.execute(definition.clone(), handle()).await.unwrap();

    let run_id = snapshot.run.id;
    assert!(runtime.engines().get(run_id).is_some());
    assert!(runtime.engines().remove(run_id).is_some());
    assert!(runtime.engines().get(run_id).is_none());
    assert!(runtime.engines().is_empty());

    // Duplicate ids are rejected
    let id = Uuid::new_v4();
    runtime.submit_with_id(id, definition.clone(), handle()).unwrap();
    assert!(runtime.submit_with_id(id, definition, handle()).is_err());
}

#[tokio::test]
async fn test_terminal_observer_evicts_engine() {
    let log = CallLog::default();
    let mut registry = ExecutorRegistry::new();
    registry.register(emit_x(&log));
    let mut config = RuntimeConfig::default();
    config.engine.evict_on_terminal = true;
    let (runtime, _) = runtime_with(registry, config);

    let mut definition = WorkflowDefinition::new("evict");
    definition.add_node(NodeDefinition::new("A", "emit_x"));
    let snapshot = runtime.execute(definition, handle()).await.unwrap();

    assert_eq!(snapshot.run.status, RunStatus::Completed);
    assert!(runtime.engines().get(snapshot.run.id).is_none());
    // Records stay readable after eviction
    assert_eq!(
        runtime.run_record(snapshot.run.id).await.unwrap().status,
        RunStatus::Completed
    );
}

#[tokio::test]
async fn test_on_terminal_fires_once_and_late_observers_fire_immediately() {
    let log = CallLog::default();
    let mut registry = ExecutorRegistry::new();
    registry.register(emit_x(&log));
    let (runtime, _) = runtime_with(registry, RuntimeConfig::default());

    let mut definition = WorkflowDefinition::new("observe");
    definition.add_node(NodeDefinition::new("A", "emit_x"));
    let run_id = runtime.submit(definition, handle()).unwrap();
    let engine = runtime.engines().get(run_id).unwrap();

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let early = seen.clone();
    engine.on_terminal(move |_, status| early.lock().unwrap().push(("early", status)));

    runtime.start(run_id).await.unwrap();
    engine.wait().await;

    let late = seen.clone();
    engine.on_terminal(move |_, status| late.lock().unwrap().push(("late", status)));

    assert_eq!(
        *seen.lock().unwrap(),
        vec![("early", RunStatus::Completed), ("late", RunStatus::Completed)]
    );
}

#[tokio::test]
async fn test_unknown_run_ids() {
    let (runtime, _) = runtime_with(ExecutorRegistry::new(), RuntimeConfig::default());
    let missing = Uuid::new_v4();

    assert!(runtime.start(missing).await.is_err());
    assert!(!runtime.cancel(missing).await);
    assert!(runtime.run_record(missing).await.is_err());
}
