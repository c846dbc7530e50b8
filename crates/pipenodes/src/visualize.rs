use crate::codegen::{param_str, py_opt_str, py_str, run_fragment, Fragment};
use async_trait::async_trait;
use pipecore::{ComponentExecutor, ExecutionResult, NodeError, Value};
use piperuntime::{ExecutorFactory, ExecutorMetadata, PortDefinition, SandboxSession};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

pub const VISUALIZATION_TYPE: &str = "visualization";

const CHART_DIR: &str = "charts";
const PNG: &str = "image/png";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartKind {
    Line,
    Bar,
    Scatter,
    Histogram,
}

impl ChartKind {
    fn pandas_kind(self) -> &'static str {
        match self {
            Self::Line => "line",
            Self::Bar => "bar",
            Self::Scatter => "scatter",
            Self::Histogram => "hist",
        }
    }
}

impl FromStr for ChartKind {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "line" => Ok(Self::Line),
            "bar" => Ok(Self::Bar),
            "scatter" => Ok(Self::Scatter),
            "hist" | "histogram" => Ok(Self::Histogram),
            other => Err(NodeError::Configuration(format!("unknown chart kind '{}'", other))),
        }
    }
}

/// Renders a chart in the sandbox and returns it as a binary reference
pub struct ChartExecutor {
    component_id: String,
    session: SandboxSession,
}

impl ChartExecutor {
    pub fn new(component_id: &str, session: SandboxSession) -> Self {
        Self {
            component_id: component_id.to_string(),
            session,
        }
    }

    pub fn fragment(parameters: &HashMap<String, Value>, file_name: &str) -> Result<Fragment, NodeError> {
        let kind = param_str(parameters, "kind")
            .map(str::parse::<ChartKind>)
            .transpose()?
            .unwrap_or(ChartKind::Line);
        let x = param_str(parameters, "x");
        let y = param_str(parameters, "y");
        if kind == ChartKind::Scatter && (x.is_none() || y.is_none()) {
            return Err(NodeError::Configuration(
                "scatter charts need both 'x' and 'y'".to_string(),
            ));
        }
        let x = if kind == ChartKind::Histogram { None } else { x };
        let title = param_str(parameters, "title").unwrap_or("");

        let mut fragment = Fragment::with_frames()
            .import("import os")
            .import("import matplotlib")
            .import("matplotlib.use(\"Agg\")")
            .import("import matplotlib.pyplot as plt");
        fragment
            .line("df = _pf_frame()")
            .line("fig, ax = plt.subplots(figsize=(8, 5))")
            .line(format!(
                "df.plot(kind={}, x={}, y={}, ax=ax)",
                py_str(kind.pandas_kind()),
                py_opt_str(x),
                py_opt_str(y)
            ))
            .line(format!("ax.set_title({})", py_str(title)))
            .line(format!("os.makedirs({}, exist_ok=True)", py_str(CHART_DIR)))
            .line(format!(
                "path = os.path.abspath(os.path.join({}, {}))",
                py_str(CHART_DIR),
                py_str(file_name)
            ))
            .line("fig.savefig(path, format=\"png\", bbox_inches=\"tight\")")
            .line("plt.close(fig)")
            .line("emit_result({\"path\": path})");
        Ok(fragment)
    }
}

#[async_trait]
impl ComponentExecutor for ChartExecutor {
    fn component_id(&self) -> &str {
        &self.component_id
    }

    async fn execute(
        &self,
        inputs: HashMap<String, Value>,
        parameters: HashMap<String, Value>,
    ) -> ExecutionResult {
        let file_name = format!("{}.png", Uuid::new_v4().simple());
        let fragment = match Self::fragment(&parameters, &file_name) {
            Ok(fragment) => fragment,
            Err(e) => return e.into(),
        };

        let mut result = run_fragment(&self.session, &fragment, inputs).await;
        if !result.success {
            return result;
        }

        let Some(path) = result.outputs.get("path").and_then(Value::as_str).map(str::to_string) else {
            return ExecutionResult::failure("chart fragment did not report a path").with_logs(result.logs);
        };
        match self.session.collect_file(&path, Some(PNG)).await {
            Ok((bytes, reference)) => {
                tracing::debug!(%path, bytes = bytes.len(), "chart collected");
                result.outputs.insert("output".to_string(), Value::BinaryRef(reference));
                result
            }
            Err(e) => ExecutionResult::from(e).with_logs(result.logs),
        }
    }
}

pub struct ChartFactory;

impl ExecutorFactory for ChartFactory {
    fn create(&self, component_id: &str, session: SandboxSession) -> Box<dyn ComponentExecutor> {
        Box::new(ChartExecutor::new(component_id, session))
    }

    fn component_id(&self) -> &str {
        "plot_chart"
    }

    fn component_type(&self) -> Option<&str> {
        Some(VISUALIZATION_TYPE)
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Plot a line, bar, scatter or histogram chart as PNG".to_string(),
            category: VISUALIZATION_TYPE.to_string(),
            inputs: vec![PortDefinition::required("input", "Dataset rows")],
            outputs: vec![
                PortDefinition::required("output", "Binary reference to the PNG"),
                PortDefinition::optional("path", "Path of the PNG inside the sandbox"),
            ],
        }
    }
}
