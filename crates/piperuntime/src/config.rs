//! Runtime configuration.
//!
//! Values come from (later wins):
//! - built-in defaults
//! - an optional JSON config file
//! - environment variables (PIPEFLOW_*)

use crate::bridge::ParseMode;
use pipecore::{FlowError, TruncationPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    /// Capacity of the in-process event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            event_buffer_size: default_event_buffer(),
        }
    }
}

/// Per-run engine settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Output truncation applied to persisted node records
    #[serde(default)]
    pub truncation: TruncationPolicy,

    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Deregister engines from the engine registry once their run is terminal
    #[serde(default)]
    pub evict_on_terminal: bool,
}

/// Sandbox bridge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Interpreter used to run generated fragments
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Working directory inside the sandbox
    #[serde(default = "default_workdir")]
    pub workdir: String,

    /// Directory (relative to `workdir`) for generated scripts and inputs
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: String,

    /// How long to wait after asking a stopped sandbox to start
    #[serde(default = "default_start_grace_ms")]
    pub start_grace_ms: u64,

    #[serde(default)]
    pub parse_mode: ParseMode,

    /// Remove generated files after each call
    #[serde(default = "default_true")]
    pub cleanup: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            workdir: default_workdir(),
            scratch_dir: default_scratch_dir(),
            start_grace_ms: default_start_grace_ms(),
            parse_mode: ParseMode::default(),
            cleanup: true,
        }
    }
}

fn default_event_buffer() -> usize {
    1000
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_workdir() -> String {
    "/workspace".to_string()
}

fn default_scratch_dir() -> String {
    ".pipeflow".to_string()
}

fn default_start_grace_ms() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

impl RuntimeConfig {
    /// Defaults overridden by environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Load from a JSON file (if given), then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, FlowError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                serde_json::from_str(&text)?
            }
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Some(bytes) = env_parse("PIPEFLOW_TRUNCATION_BYTES") {
            self.engine.truncation.threshold_bytes = bytes;
        }
        if let Ok(interpreter) = std::env::var("PIPEFLOW_INTERPRETER") {
            self.engine.bridge.interpreter = interpreter;
        }
        if let Ok(workdir) = std::env::var("PIPEFLOW_WORKDIR") {
            self.engine.bridge.workdir = workdir;
        }
        if let Some(ms) = env_parse("PIPEFLOW_START_GRACE_MS") {
            self.engine.bridge.start_grace_ms = ms;
        }
        if let Ok(mode) = std::env::var("PIPEFLOW_PARSE_MODE") {
            match mode.parse() {
                Ok(mode) => self.engine.bridge.parse_mode = mode,
                Err(e) => tracing::warn!("ignoring PIPEFLOW_PARSE_MODE: {}", e),
            }
        }
        if let Some(evict) = env_parse("PIPEFLOW_EVICT_ON_TERMINAL") {
            self.engine.evict_on_terminal = evict;
        }
        if let Some(size) = env_parse("PIPEFLOW_EVENT_BUFFER") {
            self.event_buffer_size = size;
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("ignoring {}: cannot parse '{}'", key, raw);
            None
        }
    }
}
