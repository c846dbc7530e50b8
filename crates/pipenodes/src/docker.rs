use async_trait::async_trait;
use pipecore::{CommandOutput, SandboxError, SandboxHandle, SandboxRuntime, SandboxStatus};
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

/// Sandbox runtime backed by the `docker` CLI. The handle is a container
/// name or id.
pub struct DockerSandbox {
    binary: String,
}

struct Captured {
    code: i32,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl Captured {
    fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

impl DockerSandbox {
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Map `docker inspect` `.State.Status` to a sandbox status.
    pub fn parse_state(state: &str) -> SandboxStatus {
        match state.trim() {
            "running" => SandboxStatus::Running,
            "created" | "restarting" => SandboxStatus::Starting,
            "" => SandboxStatus::Missing,
            _ => SandboxStatus::Stopped,
        }
    }

    async fn docker(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<Captured, SandboxError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| SandboxError::Command(format!("failed to spawn {}: {}", self.binary, e)))?;

        if let (Some(bytes), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(bytes).await?;
            drop(pipe); // Close stdin
        }

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        if let Some(mut out) = child.stdout.take() {
            out.read_to_end(&mut stdout).await?;
        }
        if let Some(mut err) = child.stderr.take() {
            err.read_to_end(&mut stderr).await?;
        }

        let status = child.wait().await?;
        Ok(Captured {
            code: status.code().unwrap_or(-1),
            stdout,
            stderr,
        })
    }
}

impl Default for DockerSandbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SandboxRuntime for DockerSandbox {
    async fn status(&self, handle: &SandboxHandle) -> Result<SandboxStatus, SandboxError> {
        let out = self
            .docker(&["inspect", "-f", "{{.State.Status}}", handle.as_str()], None)
            .await?;
        if out.code != 0 {
            let stderr = out.stderr_text();
            if stderr.contains("No such") {
                return Ok(SandboxStatus::Missing);
            }
            return Err(SandboxError::Command(format!("docker inspect: {}", stderr)));
        }
        Ok(Self::parse_state(&String::from_utf8_lossy(&out.stdout)))
    }

    async fn start_if_not_running(
        &self,
        handle: &SandboxHandle,
    ) -> Result<SandboxStatus, SandboxError> {
        match self.status(handle).await? {
            SandboxStatus::Running => return Ok(SandboxStatus::Running),
            SandboxStatus::Missing => return Err(SandboxError::NotFound(handle.to_string())),
            _ => {}
        }

        tracing::info!(sandbox = %handle, "starting container");
        let out = self.docker(&["start", handle.as_str()], None).await?;
        if out.code != 0 {
            return Err(SandboxError::Command(format!("docker start: {}", out.stderr_text())));
        }
        self.status(handle).await
    }

    async fn exec_command(
        &self,
        handle: &SandboxHandle,
        command: &[String],
        workdir: Option<&str>,
    ) -> Result<CommandOutput, SandboxError> {
        let mut args: Vec<&str> = vec!["exec"];
        if let Some(dir) = workdir {
            args.push("-w");
            args.push(dir);
        }
        args.push(handle.as_str());
        args.extend(command.iter().map(String::as_str));

        let out = self.docker(&args, None).await?;
        let mut output = out.stdout;
        output.extend_from_slice(&out.stderr);
        Ok(CommandOutput {
            exit_code: out.code,
            output,
        })
    }

    async fn copy_bytes_to_sandbox(
        &self,
        handle: &SandboxHandle,
        bytes: &[u8],
        path: &str,
    ) -> Result<bool, SandboxError> {
        let out = self
            .docker(
                &[
                    "exec",
                    "-i",
                    handle.as_str(),
                    "sh",
                    "-c",
                    "mkdir -p \"$(dirname \"$1\")\" && cat > \"$1\"",
                    "sh",
                    path,
                ],
                Some(bytes),
            )
            .await?;
        if out.code != 0 {
            tracing::warn!(sandbox = %handle, path, "copy into container failed: {}", out.stderr_text());
        }
        Ok(out.code == 0)
    }

    async fn copy_from_sandbox(
        &self,
        handle: &SandboxHandle,
        path: &str,
    ) -> Result<Vec<u8>, SandboxError> {
        let out = self.docker(&["exec", handle.as_str(), "cat", path], None).await?;
        if out.code != 0 {
            return Err(SandboxError::Copy {
                path: path.to_string(),
                reason: out.stderr_text(),
            });
        }
        Ok(out.stdout)
    }
}
