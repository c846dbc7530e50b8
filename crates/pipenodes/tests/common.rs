// In-memory sandbox that records every staged program.
#![allow(dead_code)]

use async_trait::async_trait;
use pipecore::{CommandOutput, SandboxError, SandboxHandle, SandboxRuntime, SandboxStatus};
use piperuntime::bridge::{RESULT_BEGIN, RESULT_END};
use piperuntime::{BridgeConfig, SandboxBridge, SandboxSession};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct FakeSandbox {
    pub files: Mutex<HashMap<String, Vec<u8>>>,
    pub outputs: Mutex<VecDeque<CommandOutput>>,
    /// Program text of every interpreter invocation, in order
    pub programs: Mutex<Vec<String>>,
}

impl FakeSandbox {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a fragment run that emits `result` as its structured result
    pub fn push_result(&self, result: serde_json::Value) {
        let text = format!("{}\n{}\n{}\n", RESULT_BEGIN, result, RESULT_END);
        self.outputs.lock().unwrap().push_back(CommandOutput {
            exit_code: 0,
            output: text.into_bytes(),
        });
    }

    pub fn programs(&self) -> Vec<String> {
        self.programs.lock().unwrap().clone()
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn put_file(&self, path: &str, bytes: &[u8]) {
        self.files.lock().unwrap().insert(path.to_string(), bytes.to_vec());
    }
}

#[async_trait]
impl SandboxRuntime for FakeSandbox {
    async fn status(&self, _handle: &SandboxHandle) -> Result<SandboxStatus, SandboxError> {
        Ok(SandboxStatus::Running)
    }

    async fn start_if_not_running(
        &self,
        _handle: &SandboxHandle,
    ) -> Result<SandboxStatus, SandboxError> {
        Ok(SandboxStatus::Running)
    }

    async fn exec_command(
        &self,
        _handle: &SandboxHandle,
        command: &[String],
        _workdir: Option<&str>,
    ) -> Result<CommandOutput, SandboxError> {
        if command.first().map(String::as_str) == Some("rm") {
            return Ok(CommandOutput::default());
        }
        if let Some(program) = command.get(1).and_then(|p| self.file(p)) {
            self.programs
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(&program).into_owned());
        }
        Ok(self.outputs.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn copy_bytes_to_sandbox(
        &self,
        _handle: &SandboxHandle,
        bytes: &[u8],
        path: &str,
    ) -> Result<bool, SandboxError> {
        self.put_file(path, bytes);
        Ok(true)
    }

    async fn copy_from_sandbox(
        &self,
        _handle: &SandboxHandle,
        path: &str,
    ) -> Result<Vec<u8>, SandboxError> {
        self.file(path)
            .ok_or_else(|| SandboxError::NotFound(path.to_string()))
    }
}

pub fn handle() -> SandboxHandle {
    SandboxHandle::new("project-1")
}

pub fn session(sandbox: Arc<FakeSandbox>) -> SandboxSession {
    SandboxSession::new(
        Arc::new(SandboxBridge::new(sandbox, BridgeConfig::default())),
        handle(),
    )
}
