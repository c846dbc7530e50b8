//! Catch-all executor: runs the node's `code` parameter as-is.

use crate::bridge::{SandboxCall, SandboxSession};
use crate::registry::{ExecutorFactory, ExecutorMetadata, PortDefinition};
use async_trait::async_trait;
use pipecore::{ComponentExecutor, ExecutionResult, Value};
use std::collections::HashMap;

pub const CODE_PARAMETER: &str = "code";

pub struct ScriptExecutor {
    component_id: String,
    session: SandboxSession,
}

impl ScriptExecutor {
    pub fn new(component_id: impl Into<String>, session: SandboxSession) -> Self {
        Self {
            component_id: component_id.into(),
            session,
        }
    }
}

#[async_trait]
impl ComponentExecutor for ScriptExecutor {
    fn component_id(&self) -> &str {
        &self.component_id
    }

    async fn execute(
        &self,
        inputs: HashMap<String, Value>,
        parameters: HashMap<String, Value>,
    ) -> ExecutionResult {
        let code = match parameters.get(CODE_PARAMETER).and_then(Value::as_str) {
            Some(code) if !code.trim().is_empty() => code,
            _ => {
                return ExecutionResult::failure(format!(
                    "no executor registered for component '{}' and no '{}' parameter supplied",
                    self.component_id, CODE_PARAMETER
                ))
            }
        };

        let call = SandboxCall::new(code).with_inputs(inputs);
        self.session.run(&call).await.into_execution_result()
    }
}

pub struct ScriptExecutorFactory;

impl ExecutorFactory for ScriptExecutorFactory {
    fn create(&self, component_id: &str, session: SandboxSession) -> Box<dyn ComponentExecutor> {
        Box::new(ScriptExecutor::new(component_id, session))
    }

    fn component_id(&self) -> &str {
        pipecore::parse::SCRIPT_COMPONENT_ID
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Runs the 'code' parameter in the sandbox; INPUTS holds resolved inputs and emit_result(obj) reports outputs".to_string(),
            category: "script".to_string(),
            inputs: vec![PortDefinition::optional("input", "Any upstream value")],
            outputs: vec![PortDefinition::optional(
                "output",
                "Every key of the emitted object becomes an output port",
            )],
        }
    }
}
