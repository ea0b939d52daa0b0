//! Fire-and-poll execution and best-effort result publication.

use std::sync::Arc;

use conductor_state::{ExecutionId, ExecutionStore, ResultSink, RunRecord, StorageResult};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::result::PipelineRunResult;
use super::Orchestrator;
use crate::error::ConductorResult;
use crate::metrics::METRICS;
use crate::obs;

impl Orchestrator {
    /// Start a run in the background and return its id at once.
    ///
    /// The execution is recorded in `store` as running; when the run ends the
    /// record moves to completed or failed and carries the final progress
    /// snapshot. Poll `store.get(id)` for the outcome.
    #[instrument(skip_all)]
    pub async fn spawn_execution(
        self: Arc<Self>,
        store: Arc<dyn ExecutionStore>,
        input: Value,
        correlation_id: Option<String>,
    ) -> ConductorResult<ExecutionId> {
        let pipeline = self.active()?.config.name.clone();
        let record = store.create(&pipeline).await?;
        let execution_id = record.execution_id;
        info!(execution_id = %execution_id, %pipeline, "background execution started");

        let task_id = execution_id.clone();
        tokio::spawn(async move {
            let outcome = self.execute(input, correlation_id).await;
            let progress = serde_json::to_value(self.get_progress()).unwrap_or(Value::Null);
            if let Err(e) = record_outcome(store.as_ref(), &task_id, outcome, progress).await {
                warn!(execution_id = %task_id, error = %e, "could not record background execution");
            }
        });
        Ok(execution_id)
    }
}

async fn record_outcome(
    store: &dyn ExecutionStore,
    execution_id: &ExecutionId,
    outcome: ConductorResult<PipelineRunResult>,
    progress: Value,
) -> StorageResult<()> {
    store.update_progress(execution_id, progress).await?;
    match outcome {
        Ok(result) if result.success => {
            info!(execution_id = %execution_id, "background execution completed");
            store.complete(execution_id, result.to_value()).await
        }
        Ok(result) => {
            let error = result
                .error
                .clone()
                .unwrap_or_else(|| "pipeline failed".to_string());
            info!(execution_id = %execution_id, %error, "background execution failed");
            store.fail(execution_id, error, Some(result.to_value())).await
        }
        Err(e) => store.fail(execution_id, e.to_string(), None).await,
    }
}

/// Hand a successful run to `sink`.
///
/// Returns whether the record was saved. Failures are logged and counted
/// and never change the outcome of the run itself.
pub async fn publish_result(
    sink: &dyn ResultSink,
    execution_id: ExecutionId,
    request: &Value,
    result: &PipelineRunResult,
) -> bool {
    if !result.success {
        debug!(correlation_id = %result.correlation_id, "skipping publication of failed run");
        return false;
    }
    if !sink.health_check().await {
        METRICS.inc_publish_failures();
        obs::emit_publish_failed(&result.correlation_id, &"result sink is not healthy");
        return false;
    }

    let record = RunRecord::new(
        execution_id,
        result.pipeline_name.clone(),
        request.clone(),
        result.to_value(),
        result.success,
    );
    match sink.save(&record).await {
        Ok(()) => {
            info!(
                correlation_id = %result.correlation_id,
                execution_id = %record.execution_id,
                "run published"
            );
            true
        }
        Err(e) => {
            METRICS.inc_publish_failures();
            obs::emit_publish_failed(&result.correlation_id, &e);
            false
        }
    }
}
