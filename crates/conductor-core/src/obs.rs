//! Structured observability hooks for pipeline lifecycle events.
//!
//! - Run-scoped tracing spans via [`run_span`] (for futures) and the
//!   `RunSpan` RAII guard (for synchronous scopes)
//! - Emission functions for key lifecycle points: pipeline start and finish,
//!   step settlement, loop iterations and result publication
//!
//! Events are emitted at `info!` level, failures at `warn!`.

use tracing::{info, warn};

/// RAII guard that enters a run-scoped tracing span.
///
/// ```ignore
/// let _span = RunSpan::enter("corr-12345", "default");
/// // every tracing call in scope carries correlation_id = "corr-12345"
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(correlation_id: &str, pipeline: &str) -> Self {
        Self {
            _span: run_span(correlation_id, pipeline).entered(),
        }
    }
}

/// Run-scoped span for use with `tracing::Instrument`.
pub fn run_span(correlation_id: &str, pipeline: &str) -> tracing::Span {
    tracing::info_span!(
        "conductor.run",
        correlation_id = %correlation_id,
        pipeline = %pipeline
    )
}

/// Emit event: pipeline run started.
pub fn emit_pipeline_started(correlation_id: &str, pipeline: &str, waves: usize, steps: usize) {
    info!(
        event = "pipeline.started",
        correlation_id = %correlation_id,
        pipeline = %pipeline,
        waves = waves,
        steps = steps,
    );
}

/// Emit event: pipeline run finished with duration and outcome.
pub fn emit_pipeline_finished(correlation_id: &str, duration_ms: u64, success: bool) {
    info!(
        event = "pipeline.finished",
        correlation_id = %correlation_id,
        duration_ms = duration_ms,
        success = success,
    );
}

/// Emit event: one step settled.
pub fn emit_step_finished(
    correlation_id: &str,
    step: &str,
    duration_ms: u64,
    success: bool,
    optional: bool,
) {
    info!(
        event = "step.finished",
        correlation_id = %correlation_id,
        step = %step,
        duration_ms = duration_ms,
        success = success,
        optional = optional,
    );
}

/// Emit event: one improve/evaluate iteration finished.
pub fn emit_loop_iteration(
    correlation_id: &str,
    loop_name: &str,
    iteration: u32,
    score: Option<f64>,
) {
    info!(
        event = "loop.iteration",
        correlation_id = %correlation_id,
        loop_name = %loop_name,
        iteration = iteration,
        score = score,
    );
}

/// Emit event: publishing a finished run failed (warning level).
pub fn emit_publish_failed(correlation_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "publish.failed", correlation_id = %correlation_id, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let _span = RunSpan::enter("test-correlation", "default");
        emit_loop_iteration("test-correlation", "loop", 1, Some(80.0));
        emit_loop_iteration("test-correlation", "loop", 2, None);
    }
}
