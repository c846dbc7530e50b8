use crate::codegen::{param_bool, param_list, param_str, py_bool, py_str, py_str_list, run_fragment, Fragment};
use async_trait::async_trait;
use pipecore::{ComponentExecutor, ExecutionResult, NodeError, Value};
use piperuntime::{ExecutorFactory, ExecutorMetadata, PortDefinition, SandboxSession};
use std::collections::HashMap;

pub const TRANSFORM_TYPE: &str = "transform";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformKind {
    SelectColumns,
    FilterRows,
    SortRows,
    RenameColumns,
}

impl TransformKind {
    fn component_id(self) -> &'static str {
        match self {
            Self::SelectColumns => "select_columns",
            Self::FilterRows => "filter_rows",
            Self::SortRows => "sort_rows",
            Self::RenameColumns => "rename_columns",
        }
    }

    /// The pandas statement for this transform
    pub fn statement(self, parameters: &HashMap<String, Value>) -> Result<String, NodeError> {
        match self {
            Self::SelectColumns => {
                let columns = non_empty(param_list(parameters, "columns"), "columns")?;
                Ok(format!("df = df[{}]", py_str_list(&columns)))
            }
            Self::FilterRows => {
                let expression = param_str(parameters, "expression").ok_or_else(|| {
                    NodeError::Configuration("missing parameter 'expression'".to_string())
                })?;
                Ok(format!("df = df.query({})", py_str(expression)))
            }
            Self::SortRows => {
                let by = non_empty(param_list(parameters, "by"), "by")?;
                let ascending = !param_bool(parameters, "descending", false);
                Ok(format!(
                    "df = df.sort_values(by={}, ascending={}).reset_index(drop=True)",
                    py_str_list(&by),
                    py_bool(ascending)
                ))
            }
            Self::RenameColumns => {
                let mapping = match parameters.get("mapping") {
                    Some(Value::Map(map)) if !map.is_empty() => map,
                    _ => {
                        return Err(NodeError::Configuration(
                            "parameter 'mapping' must be a non-empty object".to_string(),
                        ))
                    }
                };
                let pairs: Vec<String> = mapping
                    .iter()
                    .filter_map(|(from, to)| to.as_str().map(|to| format!("{}: {}", py_str(from), py_str(to))))
                    .collect();
                Ok(format!("df = df.rename(columns={{{}}})", pairs.join(", ")))
            }
        }
    }
}

fn non_empty(list: Vec<String>, name: &str) -> Result<Vec<String>, NodeError> {
    if list.is_empty() {
        return Err(NodeError::Configuration(format!(
            "parameter '{}' needs at least one column",
            name
        )));
    }
    Ok(list)
}

/// Row and column level dataset transforms
pub struct TransformExecutor {
    component_id: String,
    kind: TransformKind,
    session: SandboxSession,
}

impl TransformExecutor {
    pub fn new(component_id: &str, kind: TransformKind, session: SandboxSession) -> Self {
        Self {
            component_id: component_id.to_string(),
            kind,
            session,
        }
    }

    pub fn fragment(&self, parameters: &HashMap<String, Value>) -> Result<Fragment, NodeError> {
        let statement = self.kind.statement(parameters)?;
        let mut fragment = Fragment::with_frames();
        fragment.line("df = _pf_frame()");
        fragment.line(statement);
        fragment.line("emit_result(_pf_dataset(df))");
        Ok(fragment)
    }
}

#[async_trait]
impl ComponentExecutor for TransformExecutor {
    fn component_id(&self) -> &str {
        &self.component_id
    }

    async fn execute(
        &self,
        inputs: HashMap<String, Value>,
        parameters: HashMap<String, Value>,
    ) -> ExecutionResult {
        match self.fragment(&parameters) {
            Ok(fragment) => run_fragment(&self.session, &fragment, inputs).await,
            Err(e) => e.into(),
        }
    }
}

pub struct TransformFactory {
    kind: TransformKind,
}

impl TransformFactory {
    pub fn new(kind: TransformKind) -> Self {
        Self { kind }
    }
}

impl ExecutorFactory for TransformFactory {
    fn create(&self, component_id: &str, session: SandboxSession) -> Box<dyn ComponentExecutor> {
        Box::new(TransformExecutor::new(component_id, self.kind, session))
    }

    fn component_id(&self) -> &str {
        self.kind.component_id()
    }

    fn component_type(&self) -> Option<&str> {
        Some(TRANSFORM_TYPE)
    }

    fn metadata(&self) -> ExecutorMetadata {
        let description = match self.kind {
            TransformKind::SelectColumns => "Keep only the listed 'columns'",
            TransformKind::FilterRows => "Keep rows matching a pandas query 'expression'",
            TransformKind::SortRows => "Sort rows 'by' columns, optionally 'descending'",
            TransformKind::RenameColumns => "Rename columns using a 'mapping' object",
        };
        ExecutorMetadata {
            description: description.to_string(),
            category: TRANSFORM_TYPE.to_string(),
            inputs: vec![PortDefinition::required("input", "Dataset rows")],
            outputs: vec![PortDefinition::required("output", "Transformed rows")],
        }
    }
}
