//! Core abstractions for the pipeline engine
//!
//! Values, workflow definitions, the graph model, run records and the
//! contracts (component executors, sandbox runtime) that the runtime and
//! node crates build on. Nothing here talks to a sandbox or a store.

pub mod envelope;
mod error;
pub mod events;
mod executor;
pub mod graph;
pub mod parse;
mod record;
pub mod sandbox;
mod value;
mod workflow;

pub use envelope::{DataEnvelope, EnvelopeMetadata, PreviewLimits, TruncationPolicy};
pub use error::{
    DefinitionError, FlowError, GraphError, NodeError, PersistenceError, SandboxError,
};
pub use events::{EventBus, ExecutionEvent};
pub use executor::{require_param, require_str, ComponentExecutor, ExecutionResult};
pub use graph::{build_graph, validate, ExecutionGraph, ValidationReport};
pub use parse::{parse, Edge, Node, ParsedWorkflow, PortRef};
pub use record::{LogEntry, NodeExecutionRecord, NodeStatus, RunId, RunRecord, RunStatus};
pub use sandbox::{CommandOutput, SandboxHandle, SandboxRuntime, SandboxStatus};
pub use value::{BinaryRef, Value};
pub use workflow::{EdgeDefinition, NodeDefinition, Position, WorkflowDefinition};

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, FlowError>;
