//! Standard component library
//!
//! Executors for the built-in component families and a docker backed
//! sandbox runtime.

pub mod codegen;
mod cleaning;
mod debug;
mod docker;
mod loader;
mod model;
mod transform;
mod visualize;

pub use cleaning::{CleaningExecutor, CleaningFactory, CleaningKind, CleaningStep, CLEANING_TYPE};
pub use debug::{DebugExecutor, DebugFactory};
pub use docker::DockerSandbox;
pub use loader::{FileFormat, LoaderExecutor, LoaderFactory, DATA_SOURCE_TYPE};
pub use model::{
    Algorithm, EvaluateModelExecutor, EvaluateModelFactory, Task, TrainModelExecutor,
    TrainModelFactory, TrainingPlan, EVALUATION_TYPE, MODEL_TYPE,
};
pub use transform::{TransformExecutor, TransformFactory, TransformKind, TRANSFORM_TYPE};
pub use visualize::{ChartExecutor, ChartFactory, ChartKind, VISUALIZATION_TYPE};
use piperuntime::ExecutorRegistry;

use std::sync::Arc;

/// Register all standard components with a registry
pub fn register_all(registry: &mut ExecutorRegistry) {
    registry.register(Arc::new(LoaderFactory::new(FileFormat::Csv)));
    registry.register(Arc::new(LoaderFactory::new(FileFormat::Json)));
    registry.register(Arc::new(LoaderFactory::new(FileFormat::Excel)));
    registry.register(Arc::new(CleaningFactory::new(CleaningKind::Configurable)));
    registry.register(Arc::new(CleaningFactory::new(CleaningKind::DropNulls)));
    registry.register(Arc::new(CleaningFactory::new(CleaningKind::FillNulls)));
    registry.register(Arc::new(CleaningFactory::new(CleaningKind::DropDuplicates)));
    registry.register(Arc::new(TransformFactory::new(TransformKind::SelectColumns)));
    registry.register(Arc::new(TransformFactory::new(TransformKind::FilterRows)));
    registry.register(Arc::new(TransformFactory::new(TransformKind::SortRows)));
    registry.register(Arc::new(TransformFactory::new(TransformKind::RenameColumns)));
    registry.register(Arc::new(TrainModelFactory));
    registry.register(Arc::new(EvaluateModelFactory));
    registry.register(Arc::new(ChartFactory));
    registry.register(Arc::new(DebugFactory));
}
