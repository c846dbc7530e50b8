//! Workflow execution runtime
//!
//! This crate provides the engine that runs workflow definitions node by
//! node, the executor registry, the sandbox execution bridge and the
//! persistence contract for run records.

pub mod bridge;
mod config;
mod engine;
mod engines;
mod registry;
mod runtime;
mod script;
mod store;

pub use bridge::{BridgeOutcome, ParseMode, SandboxBridge, SandboxCall, SandboxSession};
pub use config::{BridgeConfig, EngineConfig, RuntimeConfig};
pub use engine::{EngineServices, ExecutionEngine, RunSnapshot};
pub use engines::EngineRegistry;
pub use registry::{ExecutorFactory, ExecutorMetadata, ExecutorRegistry, PortDefinition, Resolution};
pub use runtime::PipeRuntime;
pub use script::{ScriptExecutor, ScriptExecutorFactory, CODE_PARAMETER};
pub use store::{MemoryStore, RunStore};
