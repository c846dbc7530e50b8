// Shared fixtures: a scripted in-memory sandbox and scripted executors.
#![allow(dead_code)]

use async_trait::async_trait;
use pipecore::{
    CommandOutput, ComponentExecutor, ExecutionResult, SandboxError, SandboxHandle,
    SandboxRuntime, SandboxStatus, Value,
};
use piperuntime::{ExecutorFactory, ExecutorRegistry, PipeRuntime, RuntimeConfig, SandboxSession};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Sandbox that keeps files in memory and replays scripted command output
pub struct FakeSandbox {
    pub status: Mutex<SandboxStatus>,
    pub status_after_start: Mutex<SandboxStatus>,
    pub start_calls: Mutex<usize>,
    pub outputs: Mutex<VecDeque<CommandOutput>>,
    pub commands: Mutex<Vec<Vec<String>>>,
    pub files: Mutex<HashMap<String, Vec<u8>>>,
}

impl FakeSandbox {
    pub fn running() -> Self {
        Self {
            status: Mutex::new(SandboxStatus::Running),
            status_after_start: Mutex::new(SandboxStatus::Running),
            start_calls: Mutex::new(0),
            outputs: Mutex::new(VecDeque::new()),
            commands: Mutex::new(Vec::new()),
            files: Mutex::new(HashMap::new()),
        }
    }

    pub fn stopped(after_start: SandboxStatus) -> Self {
        let sandbox = Self::running();
        *sandbox.status.lock().unwrap() = SandboxStatus::Stopped;
        *sandbox.status_after_start.lock().unwrap() = after_start;
        sandbox
    }

    /// Queue the output of the next interpreter invocation
    pub fn push_output(&self, exit_code: i32, output: impl Into<Vec<u8>>) {
        self.outputs.lock().unwrap().push_back(CommandOutput {
            exit_code,
            output: output.into(),
        });
    }

    pub fn interpreter_calls(&self) -> Vec<Vec<String>> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.first().map(|p| p != "rm").unwrap_or(false))
            .cloned()
            .collect()
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
        Ok(self.status.lock().unwrap().clone())
    }

    async fn start_if_not_running(
        &self,
        _handle: &SandboxHandle,
    ) -> Result<SandboxStatus, SandboxError> {
        *self.start_calls.lock().unwrap() += 1;
        let next = self.status_after_start.lock().unwrap().clone();
        *self.status.lock().unwrap() = next.clone();
        Ok(next)
    }

    async fn exec_command(
        &self,
        _handle: &SandboxHandle,
        command: &[String],
        _workdir: Option<&str>,
    ) -> Result<CommandOutput, SandboxError> {
        self.commands.lock().unwrap().push(command.to_vec());
        if command.first().map(String::as_str) == Some("rm") {
            let mut files = self.files.lock().unwrap();
            for path in &command[2..] {
                files.remove(path);
            }
            return Ok(CommandOutput::default());
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

pub type Behaviour =
    Arc<dyn Fn(&HashMap<String, Value>, &HashMap<String, Value>) -> ExecutionResult + Send + Sync>;

/// Inputs each scripted executor received, in call order
#[derive(Default, Clone)]
pub struct CallLog(pub Arc<Mutex<Vec<(String, HashMap<String, Value>)>>>);

impl CallLog {
    pub fn calls(&self) -> Vec<(String, HashMap<String, Value>)> {
        self.0.lock().unwrap().clone()
    }

    pub fn order(&self) -> Vec<String> {
        self.calls().into_iter().map(|(id, _)| id).collect()
    }

    pub fn inputs_of(&self, component_id: &str) -> Option<HashMap<String, Value>> {
        self.calls()
            .into_iter()
            .find(|(id, _)| id == component_id)
            .map(|(_, inputs)| inputs)
    }
}

pub struct ScriptedFactory {
    pub component_id: String,
    pub component_type: Option<String>,
    pub behaviour: Behaviour,
    pub log: CallLog,
}

impl ScriptedFactory {
    pub fn new<F>(component_id: &str, log: &CallLog, behaviour: F) -> Arc<Self>
    where
        F: Fn(&HashMap<String, Value>, &HashMap<String, Value>) -> ExecutionResult
            + Send
            + Sync
            + 'static,
    {
        Arc::new(Self {
            component_id: component_id.to_string(),
            component_type: None,
            behaviour: Arc::new(behaviour),
            log: log.clone(),
        })
    }

    pub fn typed<F>(component_id: &str, component_type: &str, log: &CallLog, behaviour: F) -> Arc<Self>
    where
        F: Fn(&HashMap<String, Value>, &HashMap<String, Value>) -> ExecutionResult
            + Send
            + Sync
            + 'static,
    {
        Arc::new(Self {
            component_id: component_id.to_string(),
            component_type: Some(component_type.to_string()),
            behaviour: Arc::new(behaviour),
            log: log.clone(),
        })
    }
}

struct ScriptedExecutor {
    component_id: String,
    behaviour: Behaviour,
    log: CallLog,
}

#[async_trait]
impl ComponentExecutor for ScriptedExecutor {
    fn component_id(&self) -> &str {
        &self.component_id
    }

    async fn execute(
        &self,
        inputs: HashMap<String, Value>,
        parameters: HashMap<String, Value>,
    ) -> ExecutionResult {
        self.log
            .0
            .lock()
            .unwrap()
            .push((self.component_id.clone(), inputs.clone()));
        (self.behaviour)(&inputs, &parameters)
    }
}

impl ExecutorFactory for ScriptedFactory {
    fn create(&self, component_id: &str, _session: SandboxSession) -> Box<dyn ComponentExecutor> {
        Box::new(ScriptedExecutor {
            component_id: component_id.to_string(),
            behaviour: self.behaviour.clone(),
            log: self.log.clone(),
        })
    }

    fn component_id(&self) -> &str {
        &self.component_id
    }

    fn component_type(&self) -> Option<&str> {
        self.component_type.as_deref()
    }
}

/// Executor that signals when it starts and then waits to be released
pub struct GateFactory {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

struct GateExecutor {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl ComponentExecutor for GateExecutor {
    fn component_id(&self) -> &str {
        "gate"
    }

    async fn execute(
        &self,
        _inputs: HashMap<String, Value>,
        _parameters: HashMap<String, Value>,
    ) -> ExecutionResult {
        self.entered.notify_one();
        self.release.notified().await;
        ExecutionResult::success().with_output("output", "released")
    }
}

impl ExecutorFactory for GateFactory {
    fn create(&self, _component_id: &str, _session: SandboxSession) -> Box<dyn ComponentExecutor> {
        Box::new(GateExecutor {
            entered: self.entered.clone(),
            release: self.release.clone(),
        })
    }

    fn component_id(&self) -> &str {
        "gate"
    }
}

pub fn runtime_with(registry: ExecutorRegistry, config: RuntimeConfig) -> (PipeRuntime, Arc<FakeSandbox>) {
    let sandbox = Arc::new(FakeSandbox::running());
    let runtime = PipeRuntime::new(sandbox.clone(), registry, config);
    (runtime, sandbox)
}

pub fn handle() -> SandboxHandle {
    SandboxHandle::new("project-1")
}
