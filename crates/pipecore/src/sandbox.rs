//! Contract with the external sandbox runtime.
//!
//! The lifecycle manager that creates and destroys sandboxes lives outside
//! this workspace; the engine only needs the calls below.

use crate::SandboxError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Identifies one sandbox (one per owning project).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SandboxHandle(pub String);

impl SandboxHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SandboxHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxStatus {
    Running,
    Starting,
    Stopped,
    Missing,
}

impl SandboxStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// Captured result of a command run inside a sandbox.
///
/// `output` is raw bytes; it may not be valid UTF-8.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub output: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    async fn status(&self, handle: &SandboxHandle) -> Result<SandboxStatus, SandboxError>;

    async fn start_if_not_running(
        &self,
        handle: &SandboxHandle,
    ) -> Result<SandboxStatus, SandboxError>;

    /// Run `command` (argv form) and capture combined output. No timeout is
    /// applied here; runtimes enforce their own.
    async fn exec_command(
        &self,
        handle: &SandboxHandle,
        command: &[String],
        workdir: Option<&str>,
    ) -> Result<CommandOutput, SandboxError>;

    async fn copy_bytes_to_sandbox(
        &self,
        handle: &SandboxHandle,
        bytes: &[u8],
        path: &str,
    ) -> Result<bool, SandboxError>;

    async fn copy_from_sandbox(
        &self,
        handle: &SandboxHandle,
        path: &str,
    ) -> Result<Vec<u8>, SandboxError>;
}
