//! Bounded improve/evaluate feedback loop.
//!
//! Each iteration asks the improver for an output, asks the evaluator for a
//! verdict on it, and normalizes that verdict into [`Feedback`]. The loop
//! ends in one of three terminal states:
//!
//! - [`LoopOutcome::ThresholdMet`]: a score reached the quality threshold
//! - [`LoopOutcome::Exhausted`]: `max_iterations` ran without reaching it
//! - [`LoopOutcome::Aborted`]: an agent call failed or timed out
//!
//! The best-so-far output is kept in every case.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use crate::agent::Agent;
use crate::context::ExecutionContext;
use crate::dispatch;
use crate::events::{Event, EventBus, EventKind};
use crate::feedback::{format_for_agent, normalize, Feedback};
use crate::metrics::METRICS;
use crate::obs;
use crate::pipeline::IterativeConfig;

/// Longest rendering of an input/output snapshot in summaries.
const SNAPSHOT_LIMIT: usize = 500;

/// Terminal state of a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopOutcome {
    ThresholdMet,
    Exhausted,
    Aborted,
}

/// One improve/evaluate round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationResult {
    /// 1-based.
    pub iteration: u32,
    /// `"improver+evaluator"`, or the single agent that failed.
    pub agent_pairing: String,
    pub input: Value,
    pub output: Option<Value>,
    pub feedback: Option<Feedback>,
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
}

impl IterationResult {
    fn summary(&self) -> Value {
        json!({
            "iteration": self.iteration,
            "agent_pairing": self.agent_pairing,
            "input": snapshot(&self.input),
            "output": self.output.as_ref().map(snapshot),
            "quality_score": self.feedback.as_ref().map(|f| f.quality_score),
            "duration_ms": self.duration_ms,
            "success": self.success,
            "error": self.error,
        })
    }
}

/// Everything a finished loop produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterativeLoopResult {
    pub loop_name: String,
    pub total_iterations: u32,
    pub final_quality_score: f64,
    pub quality_threshold: f64,
    pub threshold_met: bool,
    pub outcome: LoopOutcome,
    pub iterations: Vec<IterationResult>,
    pub final_output: Option<Value>,
    pub total_duration_ms: u64,
    /// Quality score of each successful iteration, in order.
    pub improvement_trend: Vec<f64>,
}

impl IterativeLoopResult {
    /// Last trend score minus the first; 0 with fewer than two scores.
    pub fn quality_improvement(&self) -> f64 {
        match (self.improvement_trend.first(), self.improvement_trend.last()) {
            (Some(first), Some(last)) if self.improvement_trend.len() >= 2 => last - first,
            _ => 0.0,
        }
    }

    /// Usable result: the threshold was met or some output exists.
    pub fn success(&self) -> bool {
        self.threshold_met || self.final_output.is_some()
    }

    /// Error of the iteration that aborted the loop, if any.
    pub fn abort_reason(&self) -> Option<&str> {
        match self.outcome {
            LoopOutcome::Aborted => self.iterations.last().and_then(|i| i.error.as_deref()),
            _ => None,
        }
    }

    /// Compact JSON form with truncated snapshots.
    pub fn summary(&self) -> Value {
        json!({
            "loop_name": self.loop_name,
            "total_iterations": self.total_iterations,
            "final_quality_score": self.final_quality_score,
            "quality_threshold": self.quality_threshold,
            "threshold_met": self.threshold_met,
            "outcome": self.outcome,
            "total_duration_ms": self.total_duration_ms,
            "improvement_trend": self.improvement_trend,
            "quality_improvement": self.quality_improvement(),
            "iterations": self.iterations.iter().map(IterationResult::summary).collect::<Vec<_>>(),
        })
    }
}

fn snapshot(value: &Value) -> Value {
    let rendered = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if rendered.chars().count() <= SNAPSHOT_LIMIT {
        return Value::String(rendered);
    }
    let mut truncated: String = rendered.chars().take(SNAPSHOT_LIMIT).collect();
    truncated.push_str("...");
    Value::String(truncated)
}

/// Runs improve/evaluate loops and reports them on the event bus.
#[derive(Clone)]
pub struct IterativeLoopEngine {
    bus: Arc<EventBus>,
}

impl IterativeLoopEngine {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    fn publish(&self, kind: EventKind, loop_name: &str, ctx: &ExecutionContext, payload: Value) {
        self.bus
            .publish(Event::new(kind, loop_name, &ctx.correlation_id).with_payload(payload));
    }

    /// Run one loop to a terminal state.
    #[instrument(
        skip(self, improver, evaluator, config, initial_input, ctx),
        fields(correlation_id = %ctx.correlation_id)
    )]
    pub async fn run(
        &self,
        loop_name: &str,
        improver: Arc<dyn Agent>,
        evaluator: Arc<dyn Agent>,
        config: &IterativeConfig,
        initial_input: Value,
        ctx: &ExecutionContext,
    ) -> IterativeLoopResult {
        let started = Instant::now();
        let threshold = config.effective_threshold();
        let timeout = config.timeout_per_iteration();
        let improver_key = config.improver_agent.as_str();
        let evaluator_key = config.evaluator_agent.as_str();
        let pairing = format!("{improver_key}+{evaluator_key}");

        info!(
            loop_name,
            max_iterations = config.max_iterations,
            threshold,
            "iterative loop started"
        );
        self.publish(
            EventKind::LoopStarted,
            loop_name,
            ctx,
            json!({
                "loop_name": loop_name,
                "improver": improver_key,
                "evaluator": evaluator_key,
                "max_iterations": config.max_iterations,
                "quality_threshold": threshold,
            }),
        );

        let mut iterations: Vec<IterationResult> = Vec::new();
        let mut trend: Vec<f64> = Vec::new();
        let mut final_output: Option<Value> = None;
        let mut final_score = 0.0;
        let mut previous_feedback: Option<Feedback> = None;
        let mut current_input = initial_input.clone();
        let mut outcome = LoopOutcome::Exhausted;

        for iteration in 1..=config.max_iterations {
            let iter_started = Instant::now();
            debug!(loop_name, iteration, "invoking improver");

            let output = match dispatch::process(
                improver_key,
                Arc::clone(&improver),
                current_input.clone(),
                ctx.clone(),
                timeout,
            )
            .await
            {
                Ok(output) => output,
                Err(e) => {
                    warn!(loop_name, iteration, error = %e, "improver failed");
                    iterations.push(IterationResult {
                        iteration,
                        agent_pairing: improver_key.to_string(),
                        input: current_input,
                        output: None,
                        feedback: None,
                        duration_ms: iter_started.elapsed().as_millis() as u64,
                        success: false,
                        error: Some(e.to_string()),
                    });
                    self.iteration_failed(loop_name, ctx, iteration, &e.to_string());
                    outcome = LoopOutcome::Aborted;
                    break;
                }
            };

            let evaluator_input = json!({
                "output": output,
                "iteration": iteration,
                "previous_feedback": previous_feedback,
            });
            let verdict = match dispatch::evaluate(
                evaluator_key,
                Arc::clone(&evaluator),
                evaluator_input,
                ctx.clone(),
                timeout,
            )
            .await
            {
                Ok(verdict) => verdict,
                Err(e) => {
                    warn!(loop_name, iteration, error = %e, "evaluator failed");
                    iterations.push(IterationResult {
                        iteration,
                        agent_pairing: pairing.clone(),
                        input: current_input,
                        output: Some(output),
                        feedback: None,
                        duration_ms: iter_started.elapsed().as_millis() as u64,
                        success: false,
                        error: Some(e.to_string()),
                    });
                    self.iteration_failed(loop_name, ctx, iteration, &e.to_string());
                    outcome = LoopOutcome::Aborted;
                    break;
                }
            };

            let feedback = normalize(verdict, iteration, evaluator_key);
            let score = feedback.quality_score;
            trend.push(score);
            final_score = score;
            final_output = Some(output.clone());
            METRICS.inc_iterations_run();
            obs::emit_loop_iteration(&ctx.correlation_id, loop_name, iteration, Some(score));

            let met = feedback.meets_threshold(threshold);
            self.publish(
                EventKind::IterationCompleted,
                loop_name,
                ctx,
                json!({
                    "loop_name": loop_name,
                    "iteration": iteration,
                    "quality_score": score,
                    "threshold_met": met,
                }),
            );

            let next_input = if !met && iteration < config.max_iterations {
                Some(json!({
                    "original_request": initial_input,
                    "current_output": output,
                    "feedback": format_for_agent(&feedback),
                    "iteration": iteration + 1,
                }))
            } else {
                None
            };

            iterations.push(IterationResult {
                iteration,
                agent_pairing: pairing.clone(),
                input: current_input,
                output: Some(output),
                feedback: Some(feedback.clone()),
                duration_ms: iter_started.elapsed().as_millis() as u64,
                success: true,
                error: None,
            });

            if met {
                outcome = LoopOutcome::ThresholdMet;
                break;
            }
            match next_input {
                Some(next) => current_input = next,
                None => break,
            }
            previous_feedback = Some(feedback);
        }

        let result = IterativeLoopResult {
            loop_name: loop_name.to_string(),
            total_iterations: iterations.len() as u32,
            final_quality_score: final_score,
            quality_threshold: threshold,
            threshold_met: outcome == LoopOutcome::ThresholdMet,
            outcome,
            iterations,
            final_output,
            total_duration_ms: started.elapsed().as_millis() as u64,
            improvement_trend: trend,
        };

        info!(
            loop_name,
            outcome = ?result.outcome,
            iterations = result.total_iterations,
            final_score = result.final_quality_score,
            "iterative loop finished"
        );
        self.publish(
            EventKind::LoopCompleted,
            loop_name,
            ctx,
            json!({
                "loop_name": loop_name,
                "outcome": result.outcome,
                "total_iterations": result.total_iterations,
                "final_quality_score": result.final_quality_score,
                "threshold_met": result.threshold_met,
            }),
        );
        result
    }

    fn iteration_failed(
        &self,
        loop_name: &str,
        ctx: &ExecutionContext,
        iteration: u32,
        error: &str,
    ) {
        obs::emit_loop_iteration(&ctx.correlation_id, loop_name, iteration, None);
        self.publish(
            EventKind::IterationFailed,
            loop_name,
            ctx,
            json!({
                "loop_name": loop_name,
                "iteration": iteration,
                "error": error,
            }),
        );
    }
}
