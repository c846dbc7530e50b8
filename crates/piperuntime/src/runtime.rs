use crate::bridge::SandboxBridge;
use crate::config::RuntimeConfig;
use crate::engine::{EngineServices, ExecutionEngine, RunSnapshot};
use crate::engines::EngineRegistry;
use crate::registry::ExecutorRegistry;
use crate::store::{MemoryStore, RunStore};
use pipecore::{
    EventBus, ExecutionEvent, FlowError, NodeExecutionRecord, RunId, RunRecord, SandboxHandle,
    SandboxRuntime, WorkflowDefinition,
};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Main entry point for submitting and controlling runs
pub struct PipeRuntime {
    engines: Arc<EngineRegistry>,
    config: RuntimeConfig,
}

impl PipeRuntime {
    /// Runtime with an in-memory store
    pub fn new(
        sandbox: Arc<dyn SandboxRuntime>,
        registry: ExecutorRegistry,
        config: RuntimeConfig,
    ) -> Self {
        Self::with_store(sandbox, registry, Arc::new(MemoryStore::new()), config)
    }

    pub fn with_store(
        sandbox: Arc<dyn SandboxRuntime>,
        registry: ExecutorRegistry,
        store: Arc<dyn RunStore>,
        config: RuntimeConfig,
    ) -> Self {
        let bridge = Arc::new(SandboxBridge::new(sandbox, config.engine.bridge.clone()));
        let services = Arc::new(EngineServices {
            registry: Arc::new(registry),
            bridge,
            store,
            events: EventBus::new(config.event_buffer_size),
            config: config.engine.clone(),
        });

        Self {
            engines: Arc::new(EngineRegistry::new(services)),
            config,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Get access to the executor registry
    pub fn registry(&self) -> &Arc<ExecutorRegistry> {
        &self.engines.services().registry
    }

    pub fn engines(&self) -> &Arc<EngineRegistry> {
        &self.engines
    }

    /// Register a new run without starting it
    pub fn submit(
        &self,
        definition: WorkflowDefinition,
        sandbox: SandboxHandle,
    ) -> Result<RunId, FlowError> {
        self.submit_with_id(Uuid::new_v4(), definition, sandbox)
    }

    pub fn submit_with_id(
        &self,
        run_id: RunId,
        definition: WorkflowDefinition,
        sandbox: SandboxHandle,
    ) -> Result<RunId, FlowError> {
        let engine = self.engines.create(run_id, definition, sandbox)?;

        if self.config.engine.evict_on_terminal {
            let engines: Weak<EngineRegistry> = Arc::downgrade(&self.engines);
            engine.on_terminal(move |run_id, status| {
                if let Some(engines) = engines.upgrade() {
                    tracing::debug!(%run_id, %status, "evicting terminal run");
                    engines.remove(run_id);
                }
            });
        }
        Ok(run_id)
    }

    fn engine(&self, run_id: RunId) -> Result<Arc<ExecutionEngine>, FlowError> {
        self.engines
            .get(run_id)
            .ok_or_else(|| FlowError::Execution(format!("run {} not found", run_id)))
    }

    pub async fn start(&self, run_id: RunId) -> Result<bool, FlowError> {
        let engine = self.engine(run_id)?;
        Ok(engine.start().await)
    }

    /// `false` when the run is unknown or not running
    pub async fn cancel(&self, run_id: RunId) -> bool {
        match self.engines.get(run_id) {
            Some(engine) => engine.cancel().await,
            None => false,
        }
    }

    /// Submit, start and wait for a run to finish
    pub async fn execute(
        &self,
        definition: WorkflowDefinition,
        sandbox: SandboxHandle,
    ) -> Result<RunSnapshot, FlowError> {
        let run_id = self.submit(definition, sandbox)?;
        let engine = self.engine(run_id)?;
        engine.start().await;
        engine.wait().await;
        Ok(engine.snapshot().await)
    }

    /// Persisted run record
    pub async fn run_record(&self, run_id: RunId) -> Result<RunRecord, FlowError> {
        Ok(self.engines.services().store.load_run(run_id).await?)
    }

    /// Persisted node records
    pub async fn node_records(&self, run_id: RunId) -> Result<Vec<NodeExecutionRecord>, FlowError> {
        Ok(self.engines.services().store.load_nodes(run_id).await?)
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.engines.services().events.subscribe()
    }
}
