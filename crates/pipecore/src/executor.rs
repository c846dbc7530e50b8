use crate::{NodeError, Value};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Core trait that every component executor implements.
///
/// An executor translates its `parameters` and resolved `inputs` into work
/// (usually a program fragment run in a sandbox) and reports the outcome.
/// Failures are reported through [`ExecutionResult::failure`], never by
/// returning early with an error.
#[async_trait]
pub trait ComponentExecutor: Send + Sync {
    /// Component identifier (e.g., "csv_loader", "train_model")
    fn component_id(&self) -> &str;

    async fn execute(
        &self,
        inputs: HashMap<String, Value>,
        parameters: HashMap<String, Value>,
    ) -> ExecutionResult;
}

/// Outcome of one executor invocation, consumed by the engine for exactly
/// one node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub outputs: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub logs: Vec<String>,
}

impl ExecutionResult {
    pub fn success() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_output(mut self, port: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(port.into(), value.into());
        self
    }

    pub fn with_log(mut self, line: impl Into<String>) -> Self {
        self.logs.push(line.into());
        self
    }

    pub fn with_logs(mut self, lines: impl IntoIterator<Item = String>) -> Self {
        self.logs.extend(lines);
        self
    }

    pub fn error(&self) -> &str {
        self.error_message.as_deref().unwrap_or("executor reported failure")
    }
}

impl From<NodeError> for ExecutionResult {
    fn from(err: NodeError) -> Self {
        ExecutionResult::failure(err.to_string())
    }
}

/// Get a required parameter or a configuration error.
pub fn require_param<'a>(
    parameters: &'a HashMap<String, Value>,
    name: &str,
) -> Result<&'a Value, NodeError> {
    parameters
        .get(name)
        .filter(|v| !v.is_null())
        .ok_or_else(|| NodeError::Configuration(format!("missing parameter '{}'", name)))
}

/// Get a required string parameter.
pub fn require_str<'a>(
    parameters: &'a HashMap<String, Value>,
    name: &str,
) -> Result<&'a str, NodeError> {
    require_param(parameters, name)?.as_str().ok_or_else(|| {
        NodeError::Configuration(format!("parameter '{}' must be a string", name))
    })
}
