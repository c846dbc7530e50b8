use crate::bridge::{SandboxBridge, SandboxSession};
use crate::config::EngineConfig;
use crate::registry::ExecutorRegistry;
use crate::store::RunStore;
use chrono::Utc;
use futures::FutureExt;
use pipecore::{
    build_graph, parse, DataEnvelope, EventBus, ExecutionEvent, ExecutionGraph,
    FlowError, Node, NodeError, NodeExecutionRecord, NodeStatus, PersistenceError, RunId,
    RunRecord, RunStatus, SandboxHandle, Value, WorkflowDefinition,
};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;

/// Shared collaborators every engine needs
pub struct EngineServices {
    pub registry: Arc<ExecutorRegistry>,
    pub bridge: Arc<SandboxBridge>,
    pub store: Arc<dyn RunStore>,
    pub events: EventBus,
    pub config: EngineConfig,
}

type TerminalObserver = Box<dyn FnOnce(RunId, RunStatus) + Send>;

#[derive(Default)]
struct Observers {
    fired: Option<RunStatus>,
    callbacks: Vec<TerminalObserver>,
}

struct RunState {
    run: RunRecord,
    order: Vec<String>,
    nodes: HashMap<String, NodeExecutionRecord>,
}

/// Point-in-time copy of a run and its node records (topological order)
#[derive(Debug, Clone)]
pub struct RunSnapshot {
    pub run: RunRecord,
    pub nodes: Vec<NodeExecutionRecord>,
}

impl RunSnapshot {
    pub fn node(&self, node_id: &str) -> Option<&NodeExecutionRecord> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }
}

/// Full output values of finished nodes, keyed by node id then port
type OutputTable = HashMap<String, HashMap<String, Value>>;

/// Executes one run of a workflow definition.
///
/// Nodes run one at a time on a single background task, in topological
/// order. Per-node failures are recorded and the run continues; only
/// definition and cycle errors abort the run before dispatch.
pub struct ExecutionEngine {
    run_id: RunId,
    definition: WorkflowDefinition,
    services: Arc<EngineServices>,
    session: SandboxSession,
    started: AtomicBool,
    cancel: CancellationToken,
    state: RwLock<RunState>,
    observers: Mutex<Observers>,
    status: watch::Sender<RunStatus>,
}

impl ExecutionEngine {
    pub fn new(
        run_id: RunId,
        definition: WorkflowDefinition,
        sandbox: SandboxHandle,
        services: Arc<EngineServices>,
    ) -> Arc<Self> {
        let session = SandboxSession::new(services.bridge.clone(), sandbox);
        let (status, _) = watch::channel(RunStatus::Pending);
        Arc::new(Self {
            run_id,
            definition,
            services,
            session,
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            state: RwLock::new(RunState {
                run: RunRecord::new(run_id),
                order: Vec::new(),
                nodes: HashMap::new(),
            }),
            observers: Mutex::new(Observers::default()),
            status,
        })
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn sandbox(&self) -> &SandboxHandle {
        self.session.handle()
    }

    pub fn status(&self) -> RunStatus {
        *self.status.borrow()
    }

    /// Validate, build the graph and launch the dispatch task.
    ///
    /// Returns `false` if the run was already started or the definition is
    /// rejected; in the latter case the run ends `failed` without any node
    /// executing.
    pub async fn start(self: &Arc<Self>) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!(run_id = %self.run_id, "start called on a run that was already started");
            return false;
        }

        let (graph, order, warnings) = match self.prepare() {
            Ok(prepared) => prepared,
            Err(e) => {
                self.fail_before_dispatch(e).await;
                return false;
            }
        };

        let (run, records) = {
            let mut state = self.state.write().await;
            if !state.run.transition(RunStatus::Running) {
                return false;
            }
            for warning in warnings {
                state.run.log(warning);
            }
            for node_id in &order {
                if let Some(node) = graph.node(node_id) {
                    state.nodes.insert(
                        node_id.clone(),
                        NodeExecutionRecord::new(self.run_id, node_id, &node.component_id),
                    );
                }
            }
            state.order = order.clone();
            state.run.log(format!("run started with {} node(s)", order.len()));

            let records: Vec<NodeExecutionRecord> = order
                .iter()
                .filter_map(|id| state.nodes.get(id).cloned())
                .collect();
            (state.run.clone(), records)
        };
        self.status.send_replace(RunStatus::Running);

        self.persist_run(&run).await;
        for record in records {
            self.persist_node(record).await;
        }

        tracing::info!(run_id = %self.run_id, nodes = order.len(), "run started");
        self.services.events.emit(ExecutionEvent::RunStarted {
            run_id: self.run_id,
            node_count: order.len(),
            timestamp: Utc::now(),
        });

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.dispatch(graph, order).await;
        });
        true
    }

    fn prepare(&self) -> Result<(ExecutionGraph, Vec<String>, Vec<String>), FlowError> {
        let parsed = parse(&self.definition)?;
        let graph = build_graph(parsed.nodes, parsed.edges)?;
        let order = graph.topological_order()?;
        Ok((graph, order, parsed.warnings))
    }

    async fn fail_before_dispatch(&self, error: FlowError) {
        tracing::error!(run_id = %self.run_id, "run rejected: {}", error);
        let run = {
            let mut state = self.state.write().await;
            if !state.run.transition(RunStatus::Failed) {
                return;
            }
            state.run.error = Some(error.to_string());
            state.run.log(format!("run rejected: {}", error));
            state.run.clone()
        };
        self.persist_run(&run).await;
        self.announce_terminal(RunStatus::Failed, 0);
    }

    /// Request cancellation. Only succeeds while the run is `running`.
    ///
    /// Takes effect between nodes; a node already executing finishes first.
    /// Every node still pending is marked skipped immediately.
    pub async fn cancel(&self) -> bool {
        let (run, skipped) = {
            let mut state = self.state.write().await;
            if state.run.status != RunStatus::Running {
                return false;
            }
            self.cancel.cancel();
            state.run.transition(RunStatus::Canceled);
            state.run.log("run canceled");

            let RunState { order, nodes, .. } = &mut *state;
            let mut skipped = Vec::new();
            for node_id in order.iter() {
                if let Some(record) = nodes.get_mut(node_id) {
                    if record.status == NodeStatus::Pending && record.transition(NodeStatus::Skipped) {
                        skipped.push(record.clone());
                    }
                }
            }
            (state.run.clone(), skipped)
        };

        tracing::info!(run_id = %self.run_id, skipped = skipped.len(), "run canceled");
        self.persist_run(&run).await;
        for record in skipped {
            self.services.events.emit(ExecutionEvent::NodeSkipped {
                run_id: self.run_id,
                node_id: record.node_id.clone(),
                timestamp: Utc::now(),
            });
            self.persist_node(record).await;
        }
        let failed = self.count_nodes(NodeStatus::Failed).await;
        self.announce_terminal(RunStatus::Canceled, failed);
        true
    }

    /// Register a callback fired once when the run reaches a terminal status.
    /// Fires immediately if it already has.
    pub fn on_terminal<F>(&self, callback: F)
    where
        F: FnOnce(RunId, RunStatus) + Send + 'static,
    {
        let mut observers = self.observers.lock().unwrap_or_else(|e| e.into_inner());
        match observers.fired {
            Some(status) => {
                drop(observers);
                callback(self.run_id, status);
            }
            None => observers.callbacks.push(Box::new(callback)),
        }
    }

    /// Wait until the run is terminal.
    pub async fn wait(&self) -> RunStatus {
        let mut receiver = self.status.subscribe();
        let status = match receiver.wait_for(|status| status.is_terminal()).await {
            Ok(status) => *status,
            Err(_) => self.status(),
        };
        status
    }

    pub async fn snapshot(&self) -> RunSnapshot {
        let state = self.state.read().await;
        RunSnapshot {
            run: state.run.clone(),
            nodes: state
                .order
                .iter()
                .filter_map(|id| state.nodes.get(id).cloned())
                .collect(),
        }
    }

    #[tracing::instrument(skip_all, fields(run_id = %self.run_id))]
    async fn dispatch(self: Arc<Self>, graph: ExecutionGraph, order: Vec<String>) {
        let mut outputs: OutputTable = HashMap::new();
        let mut summaries: BTreeMap<String, Value> = BTreeMap::new();

        for node_id in &order {
            if self.cancel.is_cancelled() {
                break;
            }
            let Some(node) = graph.node(node_id) else {
                continue;
            };
            if let Some(summary) = self.run_node(node, &mut outputs).await {
                summaries.insert(node_id.clone(), Value::Map(summary));
            }
        }

        if self.cancel.is_cancelled() {
            tracing::info!("cancellation observed; dispatch stopped");
            // Logs of a node that was in flight during cancel
            let run = self.state.read().await.run.clone();
            self.persist_run(&run).await;
            return;
        }
        self.finish(summaries).await;
    }

    #[tracing::instrument(skip_all, fields(node_id = %node.id, component = %node.component_id))]
    async fn run_node(&self, node: &Node, outputs: &mut OutputTable) -> Option<BTreeMap<String, Value>> {
        let inputs = match self.gather_inputs(node, outputs).await {
            Ok(inputs) => inputs,
            Err(e) => {
                self.fail_node(&node.id, e.to_string(), 0).await;
                return None;
            }
        };

        if !self.mark_running(node, &inputs).await {
            return None;
        }

        let executor = self.services.registry.resolve(
            &node.component_id,
            Some(node.component_type.as_str()).filter(|t| !t.is_empty()),
            &self.session,
        );
        let started = Instant::now();
        let outcome = AssertUnwindSafe(executor.execute(inputs, node.parameters.clone()))
            .catch_unwind()
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(result) => result,
            Err(payload) => {
                let error = NodeError::Panicked(panic_message(payload));
                self.fail_node(&node.id, error.to_string(), duration_ms).await;
                return None;
            }
        };

        self.record_logs(&node.id, &result.logs).await;

        if !result.success {
            let error = NodeError::ExecutorFailure(result.error().to_string());
            self.fail_node(&node.id, error.to_string(), duration_ms).await;
            return None;
        }

        let envelopes: BTreeMap<String, DataEnvelope> = result
            .outputs
            .into_iter()
            .map(|(port, value)| {
                let envelope = DataEnvelope::wrap(value, &self.services.config.truncation);
                (port, envelope)
            })
            .collect();
        let summary: BTreeMap<String, Value> = envelopes
            .iter()
            .map(|(port, envelope)| (port.clone(), envelope.summary()))
            .collect();

        self.complete_node(&node.id, &envelopes, duration_ms).await;

        outputs.insert(
            node.id.clone(),
            envelopes
                .into_iter()
                .map(|(port, envelope)| (port, envelope.full))
                .collect(),
        );
        Some(summary)
    }

    /// Resolve every declared input port to the producer's full output value.
    async fn gather_inputs(
        &self,
        node: &Node,
        outputs: &OutputTable,
    ) -> Result<HashMap<String, Value>, NodeError> {
        let mut inputs = HashMap::new();
        for (port, source) in &node.inputs {
            let value = outputs
                .get(&source.node_id)
                .and_then(|ports| ports.get(&source.handle));
            match value {
                Some(value) => {
                    inputs.insert(port.clone(), value.clone());
                }
                None => {
                    let reason = self.producer_state(&source.node_id).await;
                    return Err(NodeError::MissingInput {
                        port: port.clone(),
                        source_node: source.node_id.clone(),
                        source_port: source.handle.clone(),
                        reason,
                    });
                }
            }
        }
        Ok(inputs)
    }

    async fn producer_state(&self, node_id: &str) -> String {
        let state = self.state.read().await;
        match state.nodes.get(node_id).map(|n| n.status) {
            Some(NodeStatus::Failed) => "upstream node failed".to_string(),
            Some(NodeStatus::Completed) => "output port not produced".to_string(),
            Some(status) => format!("upstream node is {}", status),
            None => "upstream node unknown".to_string(),
        }
    }

    async fn mark_running(&self, node: &Node, inputs: &HashMap<String, Value>) -> bool {
        let record = {
            let mut state = self.state.write().await;
            if state.run.status != RunStatus::Running {
                return false;
            }
            let Some(record) = state.nodes.get_mut(&node.id) else {
                return false;
            };
            if !record.transition(NodeStatus::Running) {
                return false;
            }
            let policy = &self.services.config.truncation;
            let persistable = |(key, value): (&String, &Value)| {
                (key.clone(), DataEnvelope::wrap(value.clone(), policy).persistable())
            };
            record.parameters = node.parameters.iter().map(persistable).collect();
            record.inputs = inputs.iter().map(persistable).collect();
            record.clone()
        };

        tracing::info!("node started");
        self.services.events.emit(ExecutionEvent::NodeStarted {
            run_id: self.run_id,
            node_id: node.id.clone(),
            component_id: node.component_id.clone(),
            timestamp: Utc::now(),
        });
        self.persist_node(record).await;
        true
    }

    async fn record_logs(&self, node_id: &str, logs: &[String]) {
        if logs.is_empty() {
            return;
        }
        {
            let mut state = self.state.write().await;
            for line in logs {
                state.run.log_node(node_id, line.clone());
            }
        }
        for line in logs {
            self.services.events.emit(ExecutionEvent::NodeLog {
                run_id: self.run_id,
                node_id: node_id.to_string(),
                message: line.clone(),
                timestamp: Utc::now(),
            });
        }
    }

    async fn complete_node(
        &self,
        node_id: &str,
        envelopes: &BTreeMap<String, DataEnvelope>,
        duration_ms: u64,
    ) {
        let record = {
            let mut state = self.state.write().await;
            let Some(record) = state.nodes.get_mut(node_id) else {
                return;
            };
            if !record.transition(NodeStatus::Completed) {
                return;
            }
            record.outputs = envelopes
                .iter()
                .map(|(port, envelope)| (port.clone(), envelope.persistable()))
                .collect();
            let record = record.clone();
            let truncated = envelopes.values().filter(|e| e.is_truncated()).count();
            let mut line = format!("completed in {}ms", duration_ms);
            if truncated > 0 {
                line.push_str(&format!(", {} output(s) truncated for persistence", truncated));
            }
            state.run.log_node(node_id, line);
            record
        };

        tracing::info!(duration_ms, "node completed");
        self.services.events.emit(ExecutionEvent::NodeFinished {
            run_id: self.run_id,
            node_id: node_id.to_string(),
            status: NodeStatus::Completed,
            duration_ms,
            error: None,
            timestamp: Utc::now(),
        });
        self.persist_node(record).await;
    }

    async fn fail_node(&self, node_id: &str, error: String, duration_ms: u64) {
        let record = {
            let mut state = self.state.write().await;
            let Some(record) = state.nodes.get_mut(node_id) else {
                return;
            };
            if !record.fail(error.clone()) {
                return;
            }
            let record = record.clone();
            state.run.log_node(node_id, format!("failed: {}", error));
            record
        };

        tracing::error!(node_id, "node failed: {}", error);
        self.services.events.emit(ExecutionEvent::NodeFinished {
            run_id: self.run_id,
            node_id: node_id.to_string(),
            status: NodeStatus::Failed,
            duration_ms,
            error: Some(error),
            timestamp: Utc::now(),
        });
        self.persist_node(record).await;
    }

    async fn finish(&self, summaries: BTreeMap<String, Value>) {
        let (run, status, failed) = {
            let mut state = self.state.write().await;
            let failed = state
                .nodes
                .values()
                .filter(|n| n.status == NodeStatus::Failed)
                .count();
            let status = if failed > 0 {
                RunStatus::Failed
            } else {
                RunStatus::Completed
            };
            if !state.run.transition(status) {
                return;
            }
            if failed > 0 {
                let message = format!("{} node(s) failed", failed);
                state.run.log(format!("run failed: {}", message));
                state.run.error = Some(message);
            } else {
                state.run.log("run completed");
            }
            state.run.result = Some(summaries);
            (state.run.clone(), status, failed)
        };

        tracing::info!(%status, failed, duration_ms = ?run.duration_ms(), "run finished");
        self.persist_run(&run).await;
        self.announce_terminal(status, failed);
    }

    async fn count_nodes(&self, status: NodeStatus) -> usize {
        let state = self.state.read().await;
        state.nodes.values().filter(|n| n.status == status).count()
    }

    /// Publish a terminal status. Observers have run by the time `wait()`
    /// resolves.
    fn announce_terminal(&self, status: RunStatus, failed_nodes: usize) {
        let callbacks = {
            let mut observers = self.observers.lock().unwrap_or_else(|e| e.into_inner());
            if observers.fired.is_some() {
                return;
            }
            observers.fired = Some(status);
            std::mem::take(&mut observers.callbacks)
        };
        for callback in callbacks {
            callback(self.run_id, status);
        }

        self.status.send_replace(status);
        self.services.events.emit(ExecutionEvent::RunFinished {
            run_id: self.run_id,
            status,
            failed_nodes,
            timestamp: Utc::now(),
        });
    }

    async fn persist_run(&self, run: &RunRecord) {
        if let Err(e) = self.services.store.put_run(run).await {
            tracing::warn!(run_id = %self.run_id, "failed to persist run record: {}", e);
        }
    }

    /// Write a node record; an oversized write is retried once with value
    /// bodies stripped, then dropped.
    async fn persist_node(&self, record: NodeExecutionRecord) {
        match self.services.store.put_node(&record).await {
            Ok(()) => {}
            Err(PersistenceError::Oversize { size, limit }) => {
                tracing::warn!(
                    node_id = %record.node_id,
                    size,
                    limit,
                    "node record too large; retrying without value bodies"
                );
                let stripped = strip_bodies(record);
                if let Err(e) = self.services.store.put_node(&stripped).await {
                    tracing::warn!(node_id = %stripped.node_id, "giving up persisting node record: {}", e);
                }
            }
            Err(e) => {
                tracing::warn!(node_id = %record.node_id, "failed to persist node record: {}", e);
            }
        }
    }
}

fn strip_bodies(mut record: NodeExecutionRecord) -> NodeExecutionRecord {
    for value in record.outputs.values_mut() {
        *value = Value::Null;
    }
    for value in record.inputs.values_mut() {
        *value = Value::Null;
    }
    for value in record.parameters.values_mut() {
        *value = Value::Null;
    }
    record
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
