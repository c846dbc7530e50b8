use async_trait::async_trait;
use pipecore::{ComponentExecutor, ExecutionResult, Value};
use piperuntime::{ExecutorFactory, ExecutorMetadata, PortDefinition, SandboxSession};
use std::collections::HashMap;

/// Logs its inputs and passes them through unchanged. Runs in-process.
pub struct DebugExecutor {
    component_id: String,
}

#[async_trait]
impl ComponentExecutor for DebugExecutor {
    fn component_id(&self) -> &str {
        &self.component_id
    }

    async fn execute(
        &self,
        inputs: HashMap<String, Value>,
        parameters: HashMap<String, Value>,
    ) -> ExecutionResult {
        let message = parameters
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("(no message)");

        let mut result = ExecutionResult::success().with_log(format!("DEBUG: {}", message));

        // Sorted for stable logs
        let mut ports: Vec<&String> = inputs.keys().collect();
        ports.sort();
        for port in ports {
            let value = &inputs[port];
            let shape = match value.len() {
                Some(len) => format!("{} of {}", value.type_name(), len),
                None => value.type_name().to_string(),
            };
            result = result.with_log(format!("  {}: {} ({} bytes)", port, shape, value.serialized_size()));
        }

        for (port, value) in inputs {
            let out = if port == "input" { "output".to_string() } else { port };
            result.outputs.insert(out, value);
        }
        result
    }
}

pub struct DebugFactory;

impl ExecutorFactory for DebugFactory {
    fn create(&self, component_id: &str, _session: SandboxSession) -> Box<dyn ComponentExecutor> {
        Box::new(DebugExecutor {
            component_id: component_id.to_string(),
        })
    }

    fn component_id(&self) -> &str {
        "debug_log"
    }

    fn component_type(&self) -> Option<&str> {
        Some("debug")
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Logs input values for debugging and passes them through".to_string(),
            category: "debug".to_string(),
            inputs: vec![PortDefinition::optional("input", "Any value")],
            outputs: vec![PortDefinition::optional("output", "The 'input' value, unchanged")],
        }
    }
}
