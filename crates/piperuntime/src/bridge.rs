//! Sandbox execution bridge.
//!
//! Runs one generated program fragment inside a sandbox and recovers a
//! structured result from its standard output. The fragment reports its
//! result by calling `emit_result(obj)`, which prints the JSON object between
//! [`RESULT_BEGIN`] and [`RESULT_END`] marker lines. Fragments that print
//! their result some other way are handled by the lenient fallback chain.

use crate::config::BridgeConfig;
use pipecore::{
    BinaryRef, ExecutionResult, NodeError, SandboxHandle, SandboxRuntime, SandboxStatus, Value,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const RESULT_BEGIN: &str = "<<<PIPEFLOW_RESULT_BEGIN>>>";
pub const RESULT_END: &str = "<<<PIPEFLOW_RESULT_END>>>";

/// Keys that mark an object as the fragment's primary result.
const RESULT_KEYS: [&str; 2] = ["dataset", "result"];
const ERROR_KEY: &str = "error";
/// Keys in a result object that are protocol fields rather than output ports.
const RESERVED_KEYS: [&str; 3] = ["success", "error", "logs"];

const MAX_LOG_LINES: usize = 50;
const ERROR_EXCERPT_CHARS: usize = 400;

pub type JsonObject = serde_json::Map<String, serde_json::Value>;

/// How hard the bridge tries to find a result in uncooperative output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseMode {
    /// Delimited block, or one JSON object on the final non-empty line.
    Strict,
    /// Delimited block, then a scan of every printed line.
    #[default]
    Lenient,
}

impl std::str::FromStr for ParseMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "lenient" => Ok(Self::Lenient),
            other => Err(format!("unknown parse mode: {}", other)),
        }
    }
}

/// A program fragment plus the inputs it needs.
#[derive(Debug, Clone, Default)]
pub struct SandboxCall {
    pub code: String,
    pub inputs: HashMap<String, Value>,
}

impl SandboxCall {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            inputs: HashMap::new(),
        }
    }

    pub fn with_inputs(mut self, inputs: HashMap<String, Value>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(name.into(), value.into());
        self
    }
}

/// What one sandbox call produced.
#[derive(Debug, Clone)]
pub struct BridgeOutcome {
    pub success: bool,
    pub result: Option<JsonObject>,
    pub error: Option<String>,
    pub raw_output: String,
    pub exit_code: Option<i32>,
}

impl BridgeOutcome {
    fn failed(error: impl Into<String>, raw_output: String, exit_code: Option<i32>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
            raw_output,
            exit_code,
        }
    }

    /// Printed lines that are not part of the delimited result block.
    pub fn log_lines(&self) -> Vec<String> {
        let mut inside = false;
        let mut lines: Vec<String> = Vec::new();
        for line in self.raw_output.lines() {
            let trimmed = line.trim();
            if trimmed == RESULT_BEGIN {
                inside = true;
            } else if trimmed == RESULT_END {
                inside = false;
            } else if !inside && !trimmed.is_empty() {
                lines.push(line.to_string());
            }
        }
        if lines.len() > MAX_LOG_LINES {
            lines.drain(..lines.len() - MAX_LOG_LINES);
        }
        lines
    }

    /// Convert into the executor contract: every non-reserved key of the
    /// result object becomes an output port.
    pub fn into_execution_result(self) -> ExecutionResult {
        let mut logs = self.log_lines();
        if let Some(reported) = self
            .result
            .as_ref()
            .and_then(|r| r.get("logs"))
            .and_then(|l| l.as_array())
        {
            logs.extend(reported.iter().map(|l| match l.as_str() {
                Some(s) => s.to_string(),
                None => l.to_string(),
            }));
        }

        if !self.success {
            let message = self
                .error
                .unwrap_or_else(|| "sandbox call failed".to_string());
            return ExecutionResult::failure(message).with_logs(logs);
        }

        let mut result = ExecutionResult::success().with_logs(logs);
        for (key, value) in self.result.unwrap_or_default() {
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            result.outputs.insert(key, Value::from(value));
        }
        result
    }
}

/// Bridge between executors and the external sandbox runtime.
pub struct SandboxBridge {
    runtime: Arc<dyn SandboxRuntime>,
    config: BridgeConfig,
}

impl SandboxBridge {
    pub fn new(runtime: Arc<dyn SandboxRuntime>, config: BridgeConfig) -> Self {
        Self { runtime, config }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn runtime(&self) -> &Arc<dyn SandboxRuntime> {
        &self.runtime
    }

    fn scratch_dir(&self) -> String {
        format!(
            "{}/{}",
            self.config.workdir.trim_end_matches('/'),
            self.config.scratch_dir.trim_matches('/')
        )
    }

    /// Make sure the sandbox is running, starting it once if needed.
    pub async fn ensure_running(&self, handle: &SandboxHandle) -> Result<(), NodeError> {
        let unreachable = |reason: String| NodeError::SandboxUnreachable {
            sandbox: handle.to_string(),
            reason,
        };

        match self.runtime.status(handle).await {
            Ok(SandboxStatus::Running) => return Ok(()),
            Ok(status) => tracing::warn!(sandbox = %handle, ?status, "sandbox not running; starting it"),
            Err(e) => tracing::warn!(sandbox = %handle, "sandbox status unavailable ({}); starting it", e),
        }

        let status = self
            .runtime
            .start_if_not_running(handle)
            .await
            .map_err(|e| unreachable(format!("start failed: {}", e)))?;
        if status.is_running() {
            return Ok(());
        }

        tokio::time::sleep(Duration::from_millis(self.config.start_grace_ms)).await;

        match self.runtime.status(handle).await {
            Ok(SandboxStatus::Running) => Ok(()),
            Ok(status) => Err(unreachable(format!(
                "still {:?} after start attempt",
                status
            ))),
            Err(e) => Err(unreachable(e.to_string())),
        }
    }

    /// Run one fragment and recover its structured result.
    ///
    /// Never fails outright: every problem is reported as an unsuccessful
    /// outcome with whatever raw output was captured.
    #[tracing::instrument(skip_all, fields(sandbox = %handle))]
    pub async fn run_in_sandbox(&self, handle: &SandboxHandle, call: &SandboxCall) -> BridgeOutcome {
        if let Err(e) = self.ensure_running(handle).await {
            return BridgeOutcome::failed(e.to_string(), String::new(), None);
        }

        let call_id = Uuid::new_v4().simple().to_string();
        let scratch = self.scratch_dir();
        let inputs_path = format!("{}/{}.inputs.json", scratch, call_id);
        let script_path = format!("{}/{}.py", scratch, call_id);

        let inputs_json: serde_json::Map<String, serde_json::Value> = call
            .inputs
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        let inputs_bytes = match serde_json::to_vec(&inputs_json) {
            Ok(bytes) => bytes,
            Err(e) => {
                return BridgeOutcome::failed(format!("cannot encode inputs: {}", e), String::new(), None)
            }
        };

        if let Err(message) = self.stage(handle, &inputs_bytes, &inputs_path).await {
            return BridgeOutcome::failed(message, String::new(), None);
        }
        let program = render_program(&call.code, &inputs_path);
        if let Err(message) = self.stage(handle, program.as_bytes(), &script_path).await {
            return BridgeOutcome::failed(message, String::new(), None);
        }

        let command = vec![self.config.interpreter.clone(), script_path.clone()];
        let executed = self
            .runtime
            .exec_command(handle, &command, Some(&self.config.workdir))
            .await;

        if self.config.cleanup {
            let rm = vec![
                "rm".to_string(),
                "-f".to_string(),
                script_path.clone(),
                inputs_path.clone(),
            ];
            if let Err(e) = self.runtime.exec_command(handle, &rm, None).await {
                tracing::debug!("cleanup of {} failed: {}", script_path, e);
            }
        }

        let output = match executed {
            Ok(output) => output,
            Err(e) => {
                return BridgeOutcome::failed(format!("command execution failed: {}", e), String::new(), None)
            }
        };

        let raw_output = output.text();
        tracing::debug!(exit_code = output.exit_code, bytes = output.output.len(), "fragment finished");
        interpret(raw_output, output.exit_code, self.config.parse_mode)
    }

    async fn stage(&self, handle: &SandboxHandle, bytes: &[u8], path: &str) -> Result<(), String> {
        match self.runtime.copy_bytes_to_sandbox(handle, bytes, path).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(format!("sandbox rejected staging of {}", path)),
            Err(e) => Err(format!("staging {} failed: {}", path, e)),
        }
    }
}

/// Turn captured output into an outcome.
pub fn interpret(raw_output: String, exit_code: i32, mode: ParseMode) -> BridgeOutcome {
    let Some(result) = parse_output(raw_output.as_bytes(), mode) else {
        let error = format!(
            "no structured result in sandbox output (exit code {}): {}",
            exit_code,
            excerpt(&raw_output)
        );
        return BridgeOutcome::failed(error, raw_output, Some(exit_code));
    };

    let reported_failure = result.get("success").and_then(|s| s.as_bool()) == Some(false);
    let error = result
        .get(ERROR_KEY)
        .filter(|e| !e.is_null())
        .map(|e| match e.as_str() {
            Some(s) => s.to_string(),
            None => e.to_string(),
        });
    let has_result = RESULT_KEYS.iter().any(|k| result.contains_key(*k));

    if reported_failure || (error.is_some() && !has_result) {
        let error = error.unwrap_or_else(|| "fragment reported failure".to_string());
        return BridgeOutcome {
            success: false,
            result: Some(result),
            error: Some(error),
            raw_output,
            exit_code: Some(exit_code),
        };
    }

    if exit_code != 0 {
        tracing::warn!(exit_code, "fragment exited non-zero after emitting a result");
    }

    BridgeOutcome {
        success: true,
        result: Some(result),
        error: None,
        raw_output,
        exit_code: Some(exit_code),
    }
}

/// Recover the structured result object from raw fragment output.
///
/// Invalid UTF-8 is replaced rather than rejected.
pub fn parse_output(raw: &[u8], mode: ParseMode) -> Option<JsonObject> {
    let text = String::from_utf8_lossy(raw);
    if let Some(block) = delimited_block(&text) {
        return Some(block);
    }
    match mode {
        ParseMode::Strict => last_line_object(&text),
        ParseMode::Lenient => scan_objects(&text),
    }
}

/// The last complete, parsable block between the marker lines.
fn delimited_block(text: &str) -> Option<JsonObject> {
    let mut found = None;
    let mut current: Option<Vec<&str>> = None;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed == RESULT_BEGIN {
            current = Some(Vec::new());
        } else if trimmed == RESULT_END {
            if let Some(body) = current.take() {
                if let Some(obj) = parse_tolerant(&body.join("\n")) {
                    found = Some(obj);
                }
            }
        } else if let Some(body) = current.as_mut() {
            body.push(line);
        }
    }
    found
}

fn last_line_object(text: &str) -> Option<JsonObject> {
    text.lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .and_then(parse_object)
}

/// Heuristic fallback: every printed object, ranked by
/// result key > error key > position.
fn scan_objects(text: &str) -> Option<JsonObject> {
    let mut candidates: Vec<JsonObject> = text.lines().filter_map(embedded_object).collect();
    if candidates.is_empty() {
        // A pretty-printed object spans several lines.
        candidates.extend(embedded_object(text));
    }

    let with_result = candidates
        .iter()
        .rposition(|obj| RESULT_KEYS.iter().any(|k| obj.contains_key(*k)));
    let with_error = candidates.iter().rposition(|obj| obj.contains_key(ERROR_KEY));

    let pick = with_result
        .or(with_error)
        .or_else(|| candidates.len().checked_sub(1))?;
    Some(candidates.swap_remove(pick))
}

/// An object found in `text`, allowing log prefixes like `INFO: {...}`.
fn embedded_object(text: &str) -> Option<JsonObject> {
    let trimmed = text.trim();
    if let Some(obj) = parse_tolerant(trimmed) {
        return Some(obj);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    parse_tolerant(&trimmed[start..=end])
}

/// Like [`parse_object`], but also accepts the bare `NaN`, `Infinity` and
/// `-Infinity` tokens Python's `json.dumps` writes, reading them as null.
fn parse_tolerant(text: &str) -> Option<JsonObject> {
    parse_object(text).or_else(|| parse_object(&nonfinite_to_null(text)?))
}

/// Replace non-finite number tokens outside string literals with `null`.
/// `None` when there is nothing to replace.
fn nonfinite_to_null(text: &str) -> Option<String> {
    let mut out = String::with_capacity(text.len());
    let mut replaced = false;
    let mut in_string = false;
    let mut escaped = false;
    let mut rest = text;

    while let Some(c) = rest.chars().next() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
        } else if let Some(token) = ["-Infinity", "Infinity", "NaN"]
            .into_iter()
            .find(|t| rest.starts_with(t))
        {
            out.push_str("null");
            rest = &rest[token.len()..];
            replaced = true;
            continue;
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    replaced.then_some(out)
}

fn parse_object(text: &str) -> Option<JsonObject> {
    match serde_json::from_str::<serde_json::Value>(text.trim()) {
        Ok(serde_json::Value::Object(obj)) => Some(obj),
        _ => None,
    }
}

fn excerpt(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return "(no output)".to_string();
    }
    let count = trimmed.chars().count();
    if count <= ERROR_EXCERPT_CHARS {
        return trimmed.to_string();
    }
    let tail: String = trimmed.chars().skip(count - ERROR_EXCERPT_CHARS).collect();
    format!("...{}", tail)
}

/// Wrap a fragment with the prelude that loads its inputs and defines the
/// result protocol.
pub fn render_program(code: &str, inputs_path: &str) -> String {
    let path_literal =
        serde_json::to_string(inputs_path).unwrap_or_else(|_| format!("'{}'", inputs_path));
    format!(
        r#"import json as _pf_json
import math as _pf_math
import sys as _pf_sys

with open({path}, "r", encoding="utf-8") as _pf_fh:
    INPUTS = _pf_json.load(_pf_fh)


def _pf_finite(obj):
    if isinstance(obj, float) and not _pf_math.isfinite(obj):
        return None
    if isinstance(obj, dict):
        return {{k: _pf_finite(v) for k, v in obj.items()}}
    if isinstance(obj, (list, tuple)):
        return [_pf_finite(v) for v in obj]
    return obj


def emit_result(obj):
    _pf_sys.stdout.write("\n{begin}\n")
    _pf_sys.stdout.write(_pf_json.dumps(_pf_finite(obj), default=str, allow_nan=False))
    _pf_sys.stdout.write("\n{end}\n")
    _pf_sys.stdout.flush()


{code}
"#,
        path = path_literal,
        begin = RESULT_BEGIN,
        end = RESULT_END,
        code = code,
    )
}

/// A bridge bound to one sandbox, handed to executors.
#[derive(Clone)]
pub struct SandboxSession {
    bridge: Arc<SandboxBridge>,
    handle: SandboxHandle,
}

impl SandboxSession {
    pub fn new(bridge: Arc<SandboxBridge>, handle: SandboxHandle) -> Self {
        Self { bridge, handle }
    }

    pub fn handle(&self) -> &SandboxHandle {
        &self.handle
    }

    pub fn workdir(&self) -> &str {
        &self.bridge.config.workdir
    }

    pub async fn run(&self, call: &SandboxCall) -> BridgeOutcome {
        self.bridge.run_in_sandbox(&self.handle, call).await
    }

    /// Copy host bytes into the sandbox workspace; returns the sandbox path.
    pub async fn stage_file(&self, bytes: &[u8], relative_path: &str) -> Result<String, NodeError> {
        self.bridge.ensure_running(&self.handle).await?;
        let path = format!(
            "{}/{}",
            self.workdir().trim_end_matches('/'),
            relative_path.trim_start_matches('/')
        );
        self.bridge
            .stage(&self.handle, bytes, &path)
            .await
            .map_err(NodeError::ExecutorFailure)?;
        Ok(path)
    }

    /// Read a file produced inside the sandbox and describe it as a
    /// binary reference.
    pub async fn collect_file(
        &self,
        path: &str,
        media_type: Option<&str>,
    ) -> Result<(Vec<u8>, BinaryRef), NodeError> {
        let bytes = self
            .bridge
            .runtime
            .copy_from_sandbox(&self.handle, path)
            .await
            .map_err(|e| NodeError::ExecutorFailure(format!("cannot collect {}: {}", path, e)))?;
        let reference = BinaryRef {
            uri: format!("sandbox://{}/{}", self.handle, path.trim_start_matches('/')),
            size: bytes.len() as u64,
            media_type: media_type.map(str::to_string),
        };
        Ok((bytes, reference))
    }
}
