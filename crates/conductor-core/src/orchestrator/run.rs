//! Wave-by-wave execution.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn, Instrument};

use super::result::{PipelineRunResult, StepResult};
use super::{ActivePipeline, Orchestrator};
use crate::agent::Agent;
use crate::context::ExecutionContext;
use crate::dispatch;
use crate::error::ConductorResult;
use crate::events::{Event, EventKind};
use crate::metrics::METRICS;
use crate::obs;
use crate::pipeline::{IterativeConfig, StepConfig};
use crate::progress::StepStatus;

struct StepFailure {
    error: String,
    loop_result: Option<Value>,
}

impl StepFailure {
    fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            loop_result: None,
        }
    }
}

/// `(result map entry, value forwarded to the next wave)`.
type StepAttempt = Result<(Value, Value), StepFailure>;

struct StepOutcome {
    result: StepResult,
    entry: Value,
    forward: Option<Value>,
}

impl Orchestrator {
    /// Run the loaded pipeline on `input`.
    ///
    /// Fails only when nothing is loaded. A run that halts on a required step
    /// comes back as `Ok` with `success == false` and the partial results.
    pub async fn execute(
        &self,
        input: Value,
        correlation_id: Option<String>,
    ) -> ConductorResult<PipelineRunResult> {
        let active = self.active()?;
        let ctx = ExecutionContext::new(correlation_id)
            .with_pipeline(active.config.name.clone())
            .with_scratch(self.scratch.clone());
        let span = obs::run_span(&ctx.correlation_id, &active.config.name);
        Ok(self.run(active, input, ctx).instrument(span).await)
    }

    async fn run(
        &self,
        active: &ActivePipeline,
        input: Value,
        ctx: ExecutionContext,
    ) -> PipelineRunResult {
        let started = Instant::now();
        let name = active.config.name.as_str();

        self.progress.start(
            active
                .plan
                .waves
                .iter()
                .flat_map(|w| w.steps.iter().map(String::as_str)),
        );
        METRICS.inc_pipelines_run();
        obs::emit_pipeline_started(
            &ctx.correlation_id,
            name,
            active.plan.waves.len(),
            active.plan.step_count(),
        );
        self.publish(
            EventKind::PipelineStarted,
            name,
            &ctx,
            json!({ "pipeline": name, "waves": active.plan.as_groups() }),
        );

        let semaphore = Semaphore::new(self.settings.max_concurrency.max(1));
        let mut results: BTreeMap<String, Value> = BTreeMap::new();
        let mut steps: Vec<StepResult> = Vec::new();
        let mut current = input;
        let mut fatal: Option<String> = None;

        for wave in &active.plan.waves {
            debug!(wave = wave.index, steps = ?wave.steps, "dispatching wave");
            let dispatched = wave
                .steps
                .iter()
                .filter_map(|key| active.config.step(key))
                .map(|step| {
                    self.run_step(active, step, wave.index, current.clone(), &ctx, &semaphore)
                });
            let settled = join_all(dispatched).await;

            // Later successes in declaration order win.
            let mut forward = None;
            for StepOutcome {
                result,
                entry,
                forward: value,
            } in settled
            {
                if result.succeeded() {
                    forward = value;
                } else if !result.optional && fatal.is_none() {
                    fatal = Some(format!(
                        "required step '{}' failed: {}",
                        result.key,
                        result.error.as_deref().unwrap_or("unknown error")
                    ));
                }
                results.insert(result.key.clone(), entry);
                steps.push(result);
            }
            if let Some(value) = forward {
                current = value;
            }
            if fatal.is_some() {
                break;
            }
        }

        self.progress.finish();
        let duration_ms = started.elapsed().as_millis() as u64;
        let success = fatal.is_none();

        match &fatal {
            None => {
                info!(duration_ms, steps = steps.len(), "pipeline completed");
                self.publish(
                    EventKind::PipelineCompleted,
                    name,
                    &ctx,
                    json!({ "pipeline": name, "duration_ms": duration_ms }),
                );
            }
            Some(reason) => {
                METRICS.inc_pipelines_failed();
                error!(duration_ms, error = %reason, "pipeline halted");
                self.publish(
                    EventKind::PipelineFailed,
                    name,
                    &ctx,
                    json!({ "pipeline": name, "duration_ms": duration_ms, "error": reason }),
                );
            }
        }
        obs::emit_pipeline_finished(&ctx.correlation_id, duration_ms, success);
        METRICS.flush();

        PipelineRunResult {
            success,
            pipeline_name: name.to_string(),
            correlation_id: ctx.correlation_id.clone(),
            results,
            steps,
            final_output: Some(current),
            error: fatal,
            duration_ms,
        }
    }

    async fn run_step(
        &self,
        active: &ActivePipeline,
        step: &StepConfig,
        wave: usize,
        input: Value,
        ctx: &ExecutionContext,
        semaphore: &Semaphore,
    ) -> StepOutcome {
        let _permit = semaphore.acquire().await.ok();
        let key = step.key();
        let step_ctx = ctx.for_step(key);
        let started = Instant::now();

        self.progress.mark_running(key);
        self.publish(
            EventKind::AgentStarted,
            key,
            ctx,
            json!({ "step": key, "wave": wave, "iterative": step.is_iterative() }),
        );

        let attempt = match (active.unavailable.get(key), &step.iterative) {
            (Some(reason), _) => Err(StepFailure::new(reason.clone())),
            (None, Some(config)) => {
                self.run_iterative(active, step, config, input, &step_ctx)
                    .await
            }
            (None, None) => self.run_regular(active, step, input, &step_ctx).await,
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match attempt {
            Ok((entry, forward)) => {
                self.progress.mark_completed(key);
                self.publish(
                    EventKind::AgentCompleted,
                    key,
                    ctx,
                    json!({ "step": key, "duration_ms": duration_ms }),
                );
                obs::emit_step_finished(&ctx.correlation_id, key, duration_ms, true, step.optional);
                StepOutcome {
                    result: StepResult {
                        key: key.to_string(),
                        status: StepStatus::Completed,
                        output: Some(forward.clone()),
                        error: None,
                        duration_ms,
                        optional: step.optional,
                        wave,
                    },
                    entry,
                    forward: Some(forward),
                }
            }
            Err(failure) => {
                METRICS.inc_steps_failed();
                if step.optional {
                    warn!(step = %key, error = %failure.error, "optional step failed, continuing");
                } else {
                    error!(step = %key, error = %failure.error, "required step failed");
                }
                self.progress.mark_failed(key, failure.error.clone());
                self.publish(
                    EventKind::AgentFailed,
                    key,
                    ctx,
                    json!({
                        "step": key,
                        "duration_ms": duration_ms,
                        "error": failure.error,
                        "optional": step.optional,
                    }),
                );
                obs::emit_step_finished(
                    &ctx.correlation_id,
                    key,
                    duration_ms,
                    false,
                    step.optional,
                );

                let mut entry = json!({ "error": failure.error, "optional": step.optional });
                if let Some(loop_result) = failure.loop_result {
                    entry["loop_result"] = loop_result;
                }
                StepOutcome {
                    result: StepResult {
                        key: key.to_string(),
                        status: StepStatus::Failed,
                        output: None,
                        error: Some(failure.error),
                        duration_ms,
                        optional: step.optional,
                        wave,
                    },
                    entry,
                    forward: None,
                }
            }
        }
    }

    async fn run_regular(
        &self,
        active: &ActivePipeline,
        step: &StepConfig,
        input: Value,
        ctx: &ExecutionContext,
    ) -> StepAttempt {
        let key = step.key();
        let agent = bound_agent(active, key)?;

        let check = agent.validate_input(&input);
        if !check.ok {
            return Err(StepFailure::new(format!(
                "input rejected by '{key}': {}",
                check.warnings.join("; ")
            )));
        }
        for warning in &check.warnings {
            warn!(step = %key, %warning, "input validation warning");
        }

        let timeout = step
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.settings.default_step_timeout);
        let output = dispatch::process(key, agent, input, ctx.clone(), timeout)
            .await
            .map_err(|e| StepFailure::new(e.to_string()))?;
        Ok((output.clone(), output))
    }

    async fn run_iterative(
        &self,
        active: &ActivePipeline,
        step: &StepConfig,
        config: &IterativeConfig,
        input: Value,
        ctx: &ExecutionContext,
    ) -> StepAttempt {
        let improver = bound_agent(active, &config.improver_agent)?;
        let evaluator = bound_agent(active, &config.evaluator_agent)?;

        let outcome = self
            .engine
            .run(step.key(), improver, evaluator, config, input, ctx)
            .await;
        let loop_value = serde_json::to_value(&outcome).unwrap_or(Value::Null);

        match outcome.final_output.clone() {
            Some(output) => Ok((
                json!({
                    "output": output,
                    "iterative_result": loop_value,
                    "quality_score": outcome.final_quality_score,
                    "iterations_completed": outcome.total_iterations,
                    "threshold_met": outcome.threshold_met,
                }),
                output,
            )),
            None => Err(StepFailure {
                error: outcome
                    .abort_reason()
                    .unwrap_or("iterative loop produced no output")
                    .to_string(),
                loop_result: Some(loop_value),
            }),
        }
    }

    fn publish(&self, kind: EventKind, source: &str, ctx: &ExecutionContext, payload: Value) {
        self.bus
            .publish(Event::new(kind, source, &ctx.correlation_id).with_payload(payload));
    }
}

fn bound_agent(active: &ActivePipeline, key: &str) -> Result<Arc<dyn Agent>, StepFailure> {
    active
        .agents
        .get(key)
        .cloned()
        .ok_or_else(|| StepFailure::new(format!("agent '{key}' is not instantiated")))
}
