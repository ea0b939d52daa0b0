//! In-memory fakes for storage traits
//!
//! Provides `MemoryExecutionStore` and `MemoryResultSink` that satisfy the
//! trait contracts without any external dependencies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::storage_traits::*;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// MemoryExecutionStore
// ---------------------------------------------------------------------------

/// In-memory execution store backed by a `HashMap<ExecutionId, ExecutionRecord>`.
#[derive(Debug, Default)]
pub struct MemoryExecutionStore {
    executions: Mutex<HashMap<String, ExecutionRecord>>,
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn finish(
        &self,
        execution_id: &ExecutionId,
        status: ExecutionStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> StorageResult<()> {
        let mut executions = lock(&self.executions);
        let record =
            executions
                .get_mut(&execution_id.0)
                .ok_or_else(|| StorageError::ExecutionNotFound {
                    execution_id: execution_id.0.clone(),
                })?;
        if record.status.is_terminal() {
            return Err(StorageError::InvalidTransition {
                execution_id: execution_id.0.clone(),
                from: record.status.to_string(),
                to: status.to_string(),
            });
        }
        record.status = status;
        record.result = result;
        record.error = error;
        record.completed_at = Some(Utc::now());
        Ok(())
    }
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn create(&self, pipeline_name: &str) -> StorageResult<ExecutionRecord> {
        let record = ExecutionRecord {
            execution_id: ExecutionId::new(),
            pipeline_name: pipeline_name.to_string(),
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            result: None,
            error: None,
            progress: None,
        };
        lock(&self.executions).insert(record.execution_id.0.clone(), record.clone());
        Ok(record)
    }

    async fn update_progress(
        &self,
        execution_id: &ExecutionId,
        progress: serde_json::Value,
    ) -> StorageResult<()> {
        let mut executions = lock(&self.executions);
        let record =
            executions
                .get_mut(&execution_id.0)
                .ok_or_else(|| StorageError::ExecutionNotFound {
                    execution_id: execution_id.0.clone(),
                })?;
        if record.status.is_terminal() {
            return Err(StorageError::InvalidTransition {
                execution_id: execution_id.0.clone(),
                from: record.status.to_string(),
                to: ExecutionStatus::Running.to_string(),
            });
        }
        record.progress = Some(progress);
        Ok(())
    }

    async fn complete(
        &self,
        execution_id: &ExecutionId,
        result: serde_json::Value,
    ) -> StorageResult<()> {
        self.finish(execution_id, ExecutionStatus::Completed, Some(result), None)
    }

    async fn fail(
        &self,
        execution_id: &ExecutionId,
        error: String,
        result: Option<serde_json::Value>,
    ) -> StorageResult<()> {
        self.finish(execution_id, ExecutionStatus::Failed, result, Some(error))
    }

    async fn get(&self, execution_id: &ExecutionId) -> StorageResult<ExecutionRecord> {
        lock(&self.executions)
            .get(&execution_id.0)
            .cloned()
            .ok_or_else(|| StorageError::ExecutionNotFound {
                execution_id: execution_id.0.clone(),
            })
    }

    async fn list(&self) -> StorageResult<Vec<ExecutionRecord>> {
        let mut records: Vec<ExecutionRecord> =
            lock(&self.executions).values().cloned().collect();
        records.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// MemoryResultSink
// ---------------------------------------------------------------------------

/// In-memory result sink keyed by record digest.
///
/// Saving the same record twice stores it once. `set_healthy(false)` and
/// `set_failing(true)` simulate an unavailable backend.
#[derive(Debug)]
pub struct MemoryResultSink {
    records: Mutex<HashMap<String, RunRecord>>,
    healthy: AtomicBool,
    failing: AtomicBool,
}

impl Default for MemoryResultSink {
    fn default() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            healthy: AtomicBool::new(true),
            failing: AtomicBool::new(false),
        }
    }
}

impl MemoryResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of distinct records stored.
    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All stored records for a given execution.
    pub fn records_for(&self, execution_id: &ExecutionId) -> Vec<RunRecord> {
        lock(&self.records)
            .values()
            .filter(|r| &r.execution_id == execution_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ResultSink for MemoryResultSink {
    async fn save(&self, record: &RunRecord) -> StorageResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Rejected {
                status: 500,
                body: "memory sink set to fail".to_string(),
            });
        }
        lock(&self.records).insert(record.digest(), record.clone());
        Ok(())
    }

    async fn health_check(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}
