use crate::codegen::{param_str, param_usize, py_str, run_fragment, Fragment};
use async_trait::async_trait;
use pipecore::{ComponentExecutor, ExecutionResult, NodeError, Value};
use piperuntime::{ExecutorFactory, ExecutorMetadata, PortDefinition, SandboxSession};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

pub const DATA_SOURCE_TYPE: &str = "data_source";

/// Directory (relative to the sandbox workdir) that staged files land in
const UPLOAD_DIR: &str = "uploads";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Json,
    Excel,
}

impl FileFormat {
    fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Excel => "xlsx",
        }
    }

    fn component_id(self) -> &'static str {
        match self {
            Self::Csv => "csv_loader",
            Self::Json => "json_loader",
            Self::Excel => "excel_loader",
        }
    }

    fn read_call(self, path: &str, parameters: &HashMap<String, Value>) -> String {
        match self {
            Self::Csv => {
                let sep = param_str(parameters, "delimiter").unwrap_or(",");
                format!("pd.read_csv({}, sep={})", py_str(path), py_str(sep))
            }
            Self::Json => format!("pd.read_json({})", py_str(path)),
            Self::Excel => match param_str(parameters, "sheet") {
                Some(sheet) => format!("pd.read_excel({}, sheet_name={})", py_str(path), py_str(sheet)),
                None => format!("pd.read_excel({})", py_str(path)),
            },
        }
    }
}

/// Loads a tabular file into a dataset.
///
/// The file is taken from `path` (already inside the sandbox), `host_path`
/// (copied in from the host first) or `content` (inline text).
pub struct LoaderExecutor {
    component_id: String,
    format: FileFormat,
    session: SandboxSession,
}

impl LoaderExecutor {
    pub fn new(component_id: &str, format: FileFormat, session: SandboxSession) -> Self {
        Self {
            component_id: component_id.to_string(),
            format,
            session,
        }
    }

    async fn source_path(&self, parameters: &HashMap<String, Value>) -> Result<String, NodeError> {
        if let Some(path) = param_str(parameters, "path") {
            return Ok(path.to_string());
        }

        if let Some(host_path) = param_str(parameters, "host_path") {
            let bytes = tokio::fs::read(host_path).await.map_err(|e| {
                NodeError::Configuration(format!("cannot read host file '{}': {}", host_path, e))
            })?;
            let name = Path::new(host_path)
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}.{}", Uuid::new_v4().simple(), self.format.extension()));
            return self
                .session
                .stage_file(&bytes, &format!("{}/{}", UPLOAD_DIR, name))
                .await;
        }

        if let Some(content) = parameters.get("content").and_then(Value::as_str) {
            let name = format!("{}.{}", Uuid::new_v4().simple(), self.format.extension());
            return self
                .session
                .stage_file(content.as_bytes(), &format!("{}/{}", UPLOAD_DIR, name))
                .await;
        }

        Err(NodeError::Configuration(
            "one of 'path', 'host_path' or 'content' is required".to_string(),
        ))
    }

    pub fn fragment(&self, path: &str, parameters: &HashMap<String, Value>) -> Fragment {
        let mut fragment = Fragment::with_frames();
        fragment.line(format!("df = {}", self.format.read_call(path, parameters)));
        if let Some(limit) = param_usize(parameters, "limit") {
            fragment.line(format!("df = df.head({})", limit));
        }
        fragment.line(format!("emit_result(_pf_dataset(df, source={}))", py_str(path)));
        fragment
    }
}

#[async_trait]
impl ComponentExecutor for LoaderExecutor {
    fn component_id(&self) -> &str {
        &self.component_id
    }

    async fn execute(
        &self,
        inputs: HashMap<String, Value>,
        parameters: HashMap<String, Value>,
    ) -> ExecutionResult {
        let path = match self.source_path(&parameters).await {
            Ok(path) => path,
            Err(e) => return e.into(),
        };
        tracing::debug!(component = %self.component_id, %path, "loading dataset");
        let fragment = self.fragment(&path, &parameters);
        run_fragment(&self.session, &fragment, inputs)
            .await
            .with_log(format!("source: {}", path))
    }
}

pub struct LoaderFactory {
    format: FileFormat,
}

impl LoaderFactory {
    pub fn new(format: FileFormat) -> Self {
        Self { format }
    }
}

impl ExecutorFactory for LoaderFactory {
    fn create(&self, component_id: &str, session: SandboxSession) -> Box<dyn ComponentExecutor> {
        Box::new(LoaderExecutor::new(component_id, self.format, session))
    }

    fn component_id(&self) -> &str {
        self.format.component_id()
    }

    fn component_type(&self) -> Option<&str> {
        Some(DATA_SOURCE_TYPE)
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: format!(
                "Load a {} file (path, host_path or inline content) into a dataset",
                self.format.extension()
            ),
            category: DATA_SOURCE_TYPE.to_string(),
            inputs: vec![],
            outputs: vec![
                PortDefinition::required("output", "Rows as a list of objects"),
                PortDefinition::optional("rows", "Row count"),
                PortDefinition::optional("columns", "Column names"),
            ],
        }
    }
}
