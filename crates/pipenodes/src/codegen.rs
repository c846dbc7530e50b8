//! Helpers for building the program fragments executors run in the sandbox.
//!
//! Fragments run after the bridge prelude, so `INPUTS` and `emit_result` are
//! always in scope. Dataset-shaped values travel as lists of row objects.

use pipecore::{ExecutionResult, NodeError, Value};
use piperuntime::{SandboxCall, SandboxSession};
use std::collections::HashMap;

/// Conversions between `INPUTS` row lists and pandas frames.
const FRAME_HELPERS: &str = r#"def _pf_frame(name="input"):
    data = INPUTS.get(name)
    if data is None:
        raise ValueError("input '%s' is not connected" % name)
    if isinstance(data, dict):
        data = [data]
    return pd.DataFrame(data)


def _pf_records(df):
    return _pf_json.loads(df.to_json(orient="records", date_format="iso"))


def _pf_dataset(df, **extra):
    result = {
        "output": _pf_records(df),
        "rows": int(len(df)),
        "columns": [str(c) for c in df.columns],
    }
    result.update(extra)
    return result
"#;

/// A program fragment under construction.
#[derive(Debug, Clone, Default)]
pub struct Fragment {
    imports: Vec<String>,
    frames: bool,
    body: Vec<String>,
}

impl Fragment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fragment working on pandas frames
    pub fn with_frames() -> Self {
        Self {
            frames: true,
            ..Self::default()
        }
        .import("import pandas as pd")
    }

    pub fn import(mut self, line: &str) -> Self {
        if !self.imports.iter().any(|i| i == line) {
            self.imports.push(line.to_string());
        }
        self
    }

    pub fn line(&mut self, line: impl Into<String>) -> &mut Self {
        self.body.push(line.into());
        self
    }

    /// Render the fragment. The body runs inside a guard that reports any
    /// exception as a failed result instead of a bare traceback.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for import in &self.imports {
            out.push_str(import);
            out.push('\n');
        }
        out.push('\n');
        if self.frames {
            out.push_str(FRAME_HELPERS);
            out.push('\n');
        }
        out.push_str("try:\n");
        if self.body.is_empty() {
            out.push_str("    pass\n");
        }
        for line in &self.body {
            for physical in line.lines() {
                out.push_str("    ");
                out.push_str(physical);
                out.push('\n');
            }
        }
        out.push_str("except Exception as _pf_err:\n");
        out.push_str(
            "    emit_result({\"success\": False, \"error\": \"%s: %s\" % (type(_pf_err).__name__, _pf_err)})\n",
        );
        out
    }
}

/// Python string literal. JSON string escapes are valid Python escapes.
pub fn py_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

pub fn py_opt_str(s: Option<&str>) -> String {
    match s {
        Some(s) => py_str(s),
        None => "None".to_string(),
    }
}

pub fn py_str_list(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|i| py_str(i)).collect();
    format!("[{}]", quoted.join(", "))
}

/// Any value, decoded from its JSON text at runtime
pub fn py_value(value: &Value) -> String {
    let text = serde_json::to_string(&value.to_json()).unwrap_or_else(|_| "null".to_string());
    format!("_pf_json.loads({})", py_str(&text))
}

pub fn py_bool(b: bool) -> &'static str {
    if b {
        "True"
    } else {
        "False"
    }
}

/// Run a fragment through the session and convert the outcome.
pub async fn run_fragment(
    session: &SandboxSession,
    fragment: &Fragment,
    inputs: HashMap<String, Value>,
) -> ExecutionResult {
    let call = SandboxCall::new(fragment.render()).with_inputs(inputs);
    session.run(&call).await.into_execution_result()
}

pub fn param_str<'a>(parameters: &'a HashMap<String, Value>, name: &str) -> Option<&'a str> {
    parameters
        .get(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// A list parameter given either as a list of strings or a comma separated
/// string.
pub fn param_list(parameters: &HashMap<String, Value>, name: &str) -> Vec<String> {
    match parameters.get(name) {
        Some(Value::List(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

pub fn param_bool(parameters: &HashMap<String, Value>, name: &str, default: bool) -> bool {
    match parameters.get(name) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.to_ascii_lowercase().as_str(), "true" | "yes" | "1"),
        _ => default,
    }
}

pub fn param_f64(parameters: &HashMap<String, Value>, name: &str) -> Option<f64> {
    match parameters.get(name) {
        Some(Value::String(s)) => s.trim().parse().ok(),
        Some(value) => value.as_f64(),
        None => None,
    }
}

pub fn param_usize(parameters: &HashMap<String, Value>, name: &str) -> Option<usize> {
    param_f64(parameters, name)
        .filter(|n| *n >= 0.0)
        .map(|n| n as usize)
}

/// An input that must be connected for the executor to do anything
pub fn require_input<'a>(
    inputs: &'a HashMap<String, Value>,
    name: &str,
) -> Result<&'a Value, NodeError> {
    inputs
        .get(name)
        .filter(|v| !v.is_null())
        .ok_or_else(|| NodeError::Configuration(format!("input '{}' is not connected", name)))
}
