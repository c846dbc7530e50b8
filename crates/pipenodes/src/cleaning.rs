use crate::codegen::{param_bool, param_list, py_str, py_str_list, py_value, run_fragment, Fragment};
use async_trait::async_trait;
use pipecore::{ComponentExecutor, ExecutionResult, Value};
use piperuntime::{ExecutorFactory, ExecutorMetadata, PortDefinition, SandboxSession};
use std::collections::HashMap;

pub const CLEANING_TYPE: &str = "cleaning";

/// One cleaning step, applied to `df` in order
#[derive(Debug, Clone, PartialEq)]
pub enum CleaningStep {
    DropNulls,
    FillNulls(Value),
    DropDuplicates,
    TrimStrings,
}

impl CleaningStep {
    fn render(&self, subset: &str) -> String {
        match self {
            Self::DropNulls => format!("df = df.dropna(subset={})", subset),
            Self::FillNulls(value) => format!(
                "_pf_cols = {} or list(df.columns)\ndf[_pf_cols] = df[_pf_cols].fillna({})",
                subset,
                py_value(value)
            ),
            Self::DropDuplicates => format!("df = df.drop_duplicates(subset={})", subset),
            Self::TrimStrings => {
                "for _pf_col in df.select_dtypes(include=\"object\").columns:\n    df[_pf_col] = df[_pf_col].str.strip()"
                    .to_string()
            }
        }
    }
}

/// Which steps a cleaning component applies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleaningKind {
    /// Steps chosen by boolean parameters
    Configurable,
    DropNulls,
    FillNulls,
    DropDuplicates,
}

impl CleaningKind {
    fn component_id(self) -> &'static str {
        match self {
            Self::Configurable => "clean_data",
            Self::DropNulls => "drop_nulls",
            Self::FillNulls => "fill_nulls",
            Self::DropDuplicates => "drop_duplicates",
        }
    }

    pub fn steps(self, parameters: &HashMap<String, Value>) -> Vec<CleaningStep> {
        let fill = || {
            parameters
                .get("fill_value")
                .cloned()
                .unwrap_or_else(|| Value::from(0))
        };
        match self {
            Self::DropNulls => vec![CleaningStep::DropNulls],
            Self::FillNulls => vec![CleaningStep::FillNulls(fill())],
            Self::DropDuplicates => vec![CleaningStep::DropDuplicates],
            Self::Configurable => {
                let mut steps = Vec::new();
                if param_bool(parameters, "trim_strings", false) {
                    steps.push(CleaningStep::TrimStrings);
                }
                if parameters.contains_key("fill_value") {
                    steps.push(CleaningStep::FillNulls(fill()));
                } else if param_bool(parameters, "drop_nulls", true) {
                    steps.push(CleaningStep::DropNulls);
                }
                if param_bool(parameters, "drop_duplicates", true) {
                    steps.push(CleaningStep::DropDuplicates);
                }
                steps
            }
        }
    }
}

pub struct CleaningExecutor {
    component_id: String,
    kind: CleaningKind,
    session: SandboxSession,
}

impl CleaningExecutor {
    pub fn new(component_id: &str, kind: CleaningKind, session: SandboxSession) -> Self {
        Self {
            component_id: component_id.to_string(),
            kind,
            session,
        }
    }

    pub fn fragment(&self, parameters: &HashMap<String, Value>) -> Fragment {
        let columns = param_list(parameters, "columns");
        let subset = if columns.is_empty() {
            "None".to_string()
        } else {
            py_str_list(&columns)
        };

        let mut fragment = Fragment::with_frames();
        fragment.line("df = _pf_frame()");
        fragment.line("_pf_before = int(len(df))");
        for step in self.kind.steps(parameters) {
            fragment.line(step.render(&subset));
        }
        fragment.line(format!(
            "print({} % (_pf_before - len(df)))",
            py_str("cleaning removed %d row(s)")
        ));
        fragment.line("emit_result(_pf_dataset(df, removed_rows=int(_pf_before - len(df))))");
        fragment
    }
}

#[async_trait]
impl ComponentExecutor for CleaningExecutor {
    fn component_id(&self) -> &str {
        &self.component_id
    }

    async fn execute(
        &self,
        inputs: HashMap<String, Value>,
        parameters: HashMap<String, Value>,
    ) -> ExecutionResult {
        let fragment = self.fragment(&parameters);
        run_fragment(&self.session, &fragment, inputs).await
    }
}

pub struct CleaningFactory {
    kind: CleaningKind,
}

impl CleaningFactory {
    pub fn new(kind: CleaningKind) -> Self {
        Self { kind }
    }
}

impl ExecutorFactory for CleaningFactory {
    fn create(&self, component_id: &str, session: SandboxSession) -> Box<dyn ComponentExecutor> {
        Box::new(CleaningExecutor::new(component_id, self.kind, session))
    }

    fn component_id(&self) -> &str {
        self.kind.component_id()
    }

    fn component_type(&self) -> Option<&str> {
        Some(CLEANING_TYPE)
    }

    fn metadata(&self) -> ExecutorMetadata {
        let description = match self.kind {
            CleaningKind::Configurable => {
                "Trim strings, drop or fill nulls and drop duplicate rows"
            }
            CleaningKind::DropNulls => "Drop rows with null values",
            CleaningKind::FillNulls => "Replace null values with 'fill_value'",
            CleaningKind::DropDuplicates => "Drop duplicate rows",
        };
        ExecutorMetadata {
            description: description.to_string(),
            category: CLEANING_TYPE.to_string(),
            inputs: vec![PortDefinition::required("input", "Dataset rows")],
            outputs: vec![
                PortDefinition::required("output", "Cleaned rows"),
                PortDefinition::optional("removed_rows", "Rows removed by cleaning"),
            ],
        }
    }
}
