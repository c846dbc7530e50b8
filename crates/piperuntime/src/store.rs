//! Persistence contract for run and node records.
//!
//! Writes are full-record overwrites keyed by run id and (run id, node id).

use async_trait::async_trait;
use pipecore::{NodeExecutionRecord, PersistenceError, RunId, RunRecord};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn put_run(&self, record: &RunRecord) -> Result<(), PersistenceError>;

    async fn put_node(&self, record: &NodeExecutionRecord) -> Result<(), PersistenceError>;

    async fn load_run(&self, run_id: RunId) -> Result<RunRecord, PersistenceError>;

    /// Node records of a run, in the order they were first written
    async fn load_nodes(&self, run_id: RunId) -> Result<Vec<NodeExecutionRecord>, PersistenceError>;
}

#[derive(Default)]
struct Tables {
    runs: HashMap<RunId, RunRecord>,
    nodes: HashMap<RunId, Vec<NodeExecutionRecord>>,
}

/// In-process store, optionally rejecting payloads over a size limit
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    payload_limit: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payload_limit(limit: usize) -> Self {
        Self {
            payload_limit: Some(limit),
            ..Self::default()
        }
    }

    fn check_size<T: serde::Serialize>(&self, record: &T) -> Result<(), PersistenceError> {
        let Some(limit) = self.payload_limit else {
            return Ok(());
        };
        let size = serde_json::to_vec(record)
            .map_err(|e| PersistenceError::Backend(e.to_string()))?
            .len();
        if size > limit {
            return Err(PersistenceError::Oversize { size, limit });
        }
        Ok(())
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn put_run(&self, record: &RunRecord) -> Result<(), PersistenceError> {
        self.check_size(record)?;
        let mut tables = self.tables.write().await;
        tables.runs.insert(record.id, record.clone());
        Ok(())
    }

    async fn put_node(&self, record: &NodeExecutionRecord) -> Result<(), PersistenceError> {
        self.check_size(record)?;
        let mut tables = self.tables.write().await;
        let nodes = tables.nodes.entry(record.run_id).or_default();
        match nodes.iter_mut().find(|n| n.node_id == record.node_id) {
            Some(existing) => *existing = record.clone(),
            None => nodes.push(record.clone()),
        }
        Ok(())
    }

    async fn load_run(&self, run_id: RunId) -> Result<RunRecord, PersistenceError> {
        let tables = self.tables.read().await;
        tables
            .runs
            .get(&run_id)
            .cloned()
            .ok_or_else(|| PersistenceError::NotFound(run_id.to_string()))
    }

    async fn load_nodes(&self, run_id: RunId) -> Result<Vec<NodeExecutionRecord>, PersistenceError> {
        let tables = self.tables.read().await;
        Ok(tables.nodes.get(&run_id).cloned().unwrap_or_default())
    }
}
