use crate::engine::{EngineServices, ExecutionEngine};
use pipecore::{FlowError, RunId, SandboxHandle, WorkflowDefinition};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Lookup table from run id to live engine.
///
/// Entries stay until [`EngineRegistry::remove`] is called; callers that
/// want automatic cleanup register a terminal observer that removes the run.
pub struct EngineRegistry {
    services: Arc<EngineServices>,
    engines: RwLock<HashMap<RunId, Arc<ExecutionEngine>>>,
}

impl EngineRegistry {
    pub fn new(services: Arc<EngineServices>) -> Self {
        Self {
            services,
            engines: RwLock::new(HashMap::new()),
        }
    }

    pub fn services(&self) -> &Arc<EngineServices> {
        &self.services
    }

    /// Instantiate and register an engine for `run_id`
    pub fn create(
        &self,
        run_id: RunId,
        definition: WorkflowDefinition,
        sandbox: SandboxHandle,
    ) -> Result<Arc<ExecutionEngine>, FlowError> {
        let mut engines = self.engines.write().unwrap_or_else(|e| e.into_inner());
        if engines.contains_key(&run_id) {
            return Err(FlowError::Execution(format!(
                "run {} is already registered",
                run_id
            )));
        }
        let engine = ExecutionEngine::new(run_id, definition, sandbox, self.services.clone());
        engines.insert(run_id, engine.clone());
        tracing::debug!(%run_id, "engine registered");
        Ok(engine)
    }

    pub fn get(&self, run_id: RunId) -> Option<Arc<ExecutionEngine>> {
        let engines = self.engines.read().unwrap_or_else(|e| e.into_inner());
        engines.get(&run_id).cloned()
    }

    pub fn remove(&self, run_id: RunId) -> Option<Arc<ExecutionEngine>> {
        let mut engines = self.engines.write().unwrap_or_else(|e| e.into_inner());
        let removed = engines.remove(&run_id);
        if removed.is_some() {
            tracing::debug!(%run_id, "engine deregistered");
        }
        removed
    }

    pub fn run_ids(&self) -> Vec<RunId> {
        let engines = self.engines.read().unwrap_or_else(|e| e.into_inner());
        engines.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.engines.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
