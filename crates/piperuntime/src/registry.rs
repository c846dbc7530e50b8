use crate::bridge::SandboxSession;
use crate::script::ScriptExecutorFactory;
use pipecore::ComponentExecutor;
use std::collections::HashMap;
use std::sync::Arc;

/// Factory trait for creating executors bound to a sandbox
pub trait ExecutorFactory: Send + Sync {
    /// Create an executor for `component_id` that runs its work through `session`
    fn create(&self, component_id: &str, session: SandboxSession) -> Box<dyn ComponentExecutor>;

    /// Component identifier this factory is registered under
    fn component_id(&self) -> &str;

    /// Optional: generic component type this factory can stand in for
    fn component_type(&self) -> Option<&str> {
        None
    }

    /// Optional: Get executor metadata (description, input/output ports, etc.)
    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata::default()
    }
}

/// Metadata about a component
#[derive(Debug, Clone)]
pub struct ExecutorMetadata {
    pub description: String,
    pub category: String,
    pub inputs: Vec<PortDefinition>,
    pub outputs: Vec<PortDefinition>,
}

impl Default for ExecutorMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PortDefinition {
    pub name: String,
    pub description: String,
    pub required: bool,
}

impl PortDefinition {
    pub fn required(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            required: true,
        }
    }

    pub fn optional(name: &str, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, description)
        }
    }
}

/// How a component was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Exact,
    ByType,
    Fallback,
}

/// Registry of available component executors
pub struct ExecutorRegistry {
    by_id: HashMap<String, Arc<dyn ExecutorFactory>>,
    by_type: HashMap<String, Arc<dyn ExecutorFactory>>,
    fallback: Arc<dyn ExecutorFactory>,
}

impl ExecutorRegistry {
    /// Empty registry; unknown components go to the script executor
    pub fn new() -> Self {
        Self {
            by_id: HashMap::new(),
            by_type: HashMap::new(),
            fallback: Arc::new(ScriptExecutorFactory),
        }
    }

    /// Register an executor factory.
    ///
    /// The first factory registered for a component type also becomes that
    /// type's generic fallback.
    pub fn register(&mut self, factory: Arc<dyn ExecutorFactory>) {
        let component_id = factory.component_id().to_string();
        tracing::info!("Registering component: {}", component_id);
        if let Some(ty) = factory.component_type() {
            self.by_type
                .entry(ty.to_string())
                .or_insert_with(|| factory.clone());
        }
        self.by_id.insert(component_id, factory);
    }

    /// Make `factory` the generic executor for `component_type`
    pub fn register_type_fallback(&mut self, component_type: &str, factory: Arc<dyn ExecutorFactory>) {
        tracing::info!("Registering type fallback: {} -> {}", component_type, factory.component_id());
        self.by_type.insert(component_type.to_string(), factory);
    }

    /// Replace the catch-all executor
    pub fn set_fallback(&mut self, factory: Arc<dyn ExecutorFactory>) {
        self.fallback = factory;
    }

    /// Find the factory for a component: exact id, then type, then catch-all.
    pub fn lookup(
        &self,
        component_id: &str,
        component_type: Option<&str>,
    ) -> (Arc<dyn ExecutorFactory>, Resolution) {
        if let Some(factory) = self.by_id.get(component_id) {
            return (factory.clone(), Resolution::Exact);
        }
        if let Some(factory) = component_type.and_then(|ty| self.by_type.get(ty)) {
            return (factory.clone(), Resolution::ByType);
        }
        (self.fallback.clone(), Resolution::Fallback)
    }

    /// Create an executor for a component bound to `session`. Never fails.
    pub fn resolve(
        &self,
        component_id: &str,
        component_type: Option<&str>,
        session: &SandboxSession,
    ) -> Box<dyn ComponentExecutor> {
        let (factory, resolution) = self.lookup(component_id, component_type);
        if resolution != Resolution::Exact {
            tracing::debug!(
                "Component '{}' resolved via {:?} to '{}'",
                component_id,
                resolution,
                factory.component_id()
            );
        }
        factory.create(component_id, session.clone())
    }

    pub fn contains(&self, component_id: &str) -> bool {
        self.by_id.contains_key(component_id)
    }

    /// Get all registered component ids, sorted
    pub fn list_component_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.by_id.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Get metadata for a component
    pub fn get_metadata(&self, component_id: &str) -> Option<ExecutorMetadata> {
        self.by_id.get(component_id).map(|f| f.metadata())
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
