//! Persisted run and node execution records.

use crate::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub type RunId = Uuid;

/// Run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// Transitions allowed by the run state machine.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running | Self::Failed | Self::Canceled) => true,
            (Self::Running, Self::Completed | Self::Failed | Self::Canceled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

/// Per-node status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    pub fn can_transition_to(self, next: NodeStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running | Self::Failed | Self::Skipped) => true,
            (Self::Running, Self::Completed | Self::Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// One line of a run's append-only log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub message: String,
}

/// Run record, one per invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub status: RunStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub logs: Vec<LogEntry>,
    pub result: Option<BTreeMap<String, Value>>,
    pub error: Option<String>,
}

impl RunRecord {
    pub fn new(id: RunId) -> Self {
        Self {
            id,
            status: RunStatus::Pending,
            start_time: None,
            end_time: None,
            logs: Vec::new(),
            result: None,
            error: None,
        }
    }

    /// Move to `next` if the state machine allows it. Returns whether the
    /// transition happened; terminal records never change status.
    pub fn transition(&mut self, next: RunStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        let now = Utc::now();
        if next == RunStatus::Running {
            self.start_time = Some(now);
        }
        if next.is_terminal() {
            self.start_time.get_or_insert(now);
            self.end_time = Some(now);
        }
        self.status = next;
        true
    }

    pub fn log(&mut self, message: impl Into<String>) {
        self.logs.push(LogEntry {
            timestamp: Utc::now(),
            node_id: None,
            message: message.into(),
        });
    }

    pub fn log_node(&mut self, node_id: &str, message: impl Into<String>) {
        self.logs.push(LogEntry {
            timestamp: Utc::now(),
            node_id: Some(node_id.to_string()),
            message: message.into(),
        });
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

/// Execution record for one node within one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecutionRecord {
    pub run_id: RunId,
    pub node_id: String,
    pub component_id: String,
    pub status: NodeStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Parameters the node ran with, in persistable form
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    pub inputs: BTreeMap<String, Value>,
    pub outputs: BTreeMap<String, Value>,
    pub error: Option<String>,
}

impl NodeExecutionRecord {
    pub fn new(run_id: RunId, node_id: impl Into<String>, component_id: impl Into<String>) -> Self {
        Self {
            run_id,
            node_id: node_id.into(),
            component_id: component_id.into(),
            status: NodeStatus::Pending,
            start_time: None,
            end_time: None,
            parameters: BTreeMap::new(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            error: None,
        }
    }

    pub fn transition(&mut self, next: NodeStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        let now = Utc::now();
        if next == NodeStatus::Running {
            self.start_time = Some(now);
        }
        if next.is_terminal() {
            self.end_time = Some(now);
        }
        self.status = next;
        true
    }

    /// Mark failed with `error`. No-op once terminal.
    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if self.transition(NodeStatus::Failed) {
            self.error = Some(error.into());
            true
        } else {
            false
        }
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}
