//! Storage trait definitions for Conductor
//!
//! These traits define the two backends an orchestrator caller may plug in:
//! - `ExecutionStore`: tracking of background ("fire and poll") executions
//! - `ResultSink`: best-effort publication of finished runs
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ExecutionStore - Background Execution Tracking
// ---------------------------------------------------------------------------

/// Unique identifier for a background execution
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecutionId(pub String);

impl ExecutionId {
    /// Generate a new random ExecutionId
    pub fn new() -> Self {
        ExecutionId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ExecutionId {
    fn from(s: &str) -> Self {
        ExecutionId(s.to_string())
    }
}

/// Status of a background execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Full execution record as seen by pollers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: ExecutionId,
    pub pipeline_name: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Aggregated run result, present once terminal
    pub result: Option<serde_json::Value>,
    /// Human-readable failure reason
    pub error: Option<String>,
    /// Most recent progress snapshot
    pub progress: Option<serde_json::Value>,
}

/// Execution tracking store.
///
/// Guarantees:
/// - An execution transitions: Running → Completed | Failed (terminal).
/// - Terminal records are immutable; progress updates on them are rejected.
/// - `list` returns records ordered by `started_at`, oldest first.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Register a new running execution.
    async fn create(&self, pipeline_name: &str) -> StorageResult<ExecutionRecord>;

    /// Replace the progress snapshot of a running execution.
    async fn update_progress(
        &self,
        execution_id: &ExecutionId,
        progress: serde_json::Value,
    ) -> StorageResult<()>;

    /// Mark an execution completed with its result.
    async fn complete(
        &self,
        execution_id: &ExecutionId,
        result: serde_json::Value,
    ) -> StorageResult<()>;

    /// Mark an execution failed.
    async fn fail(
        &self,
        execution_id: &ExecutionId,
        error: String,
        result: Option<serde_json::Value>,
    ) -> StorageResult<()>;

    /// Retrieve an execution by id.
    async fn get(&self, execution_id: &ExecutionId) -> StorageResult<ExecutionRecord>;

    /// List all known executions.
    async fn list(&self) -> StorageResult<Vec<ExecutionRecord>>;
}

// ---------------------------------------------------------------------------
// ResultSink - Finished Run Publication
// ---------------------------------------------------------------------------

/// A finished run as handed to an external store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub execution_id: ExecutionId,
    pub pipeline_name: String,
    /// The request that started the run
    pub request: serde_json::Value,
    /// Per-step results and run metadata
    pub result: serde_json::Value,
    pub success: bool,
    pub recorded_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn new(
        execution_id: ExecutionId,
        pipeline_name: impl Into<String>,
        request: serde_json::Value,
        result: serde_json::Value,
        success: bool,
    ) -> Self {
        Self {
            execution_id,
            pipeline_name: pipeline_name.into(),
            request,
            result,
            success,
            recorded_at: Utc::now(),
        }
    }

    /// SHA-256 hex digest of the record content, excluding `recorded_at`.
    ///
    /// Two saves of the same run produce the same digest.
    pub fn digest(&self) -> String {
        let canonical = serde_json::json!({
            "execution_id": self.execution_id.0,
            "pipeline_name": self.pipeline_name,
            "request": self.request,
            "result": self.result,
            "success": self.success,
        });
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Destination for finished runs.
///
/// Callers treat both operations as best-effort: a failing sink never
/// changes the status of a run that already finished.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Persist a finished run.
    async fn save(&self, record: &RunRecord) -> StorageResult<()>;

    /// Whether the backend is ready to accept records.
    async fn health_check(&self) -> bool;
}
