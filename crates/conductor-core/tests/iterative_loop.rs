//! Improve/evaluate loop behavior, standalone and inside a pipeline.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use conductor_core::{
    Agent, AgentError, AgentMetadata, AgentRegistry, EvaluatorOutput, EventBus, EventKind,
    ExecutionContext, Feedback, FnAgent, IterativeConfig, IterativeLoopEngine, LoopOutcome,
    Orchestrator, OrchestratorSettings, PipelineCatalog, PipelineConfig, QualityMetrics,
    StepConfig,
};
use serde_json::{json, Value};

/// Improver producing `"draft N"` and recording every input it receives.
struct Drafter {
    calls: AtomicUsize,
    inputs: Mutex<Vec<Value>>,
}

impl Drafter {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        })
    }

    fn agent(self: &Arc<Self>) -> Arc<dyn Agent> {
        let me = Arc::clone(self);
        Arc::new(FnAgent::new(
            AgentMetadata::new("drafter", "Drafter"),
            move |input, _ctx| {
                let me = Arc::clone(&me);
                async move {
                    me.inputs.lock().unwrap().push(input);
                    let n = me.calls.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok(json!(format!("draft {n}")))
                }
            },
        ))
    }
}

/// Evaluator answering structured feedback with the scripted scores in order.
fn scripted(scores: &[f64]) -> Arc<dyn Agent> {
    let scores = Arc::new(scores.to_vec());
    Arc::new(FnAgent::evaluator(
        AgentMetadata::new("critic", "Critic"),
        move |input, _ctx| {
            let scores = Arc::clone(&scores);
            async move {
                let iteration = input["iteration"].as_u64().unwrap_or(1) as usize;
                let score = scores[(iteration - 1).min(scores.len() - 1)];
                Ok(EvaluatorOutput::from(Feedback::new(
                    score,
                    QualityMetrics::uniform(score),
                )))
            }
        },
    ))
}

fn engine() -> (IterativeLoopEngine, Arc<EventBus>) {
    let bus = Arc::new(EventBus::default());
    (IterativeLoopEngine::new(Arc::clone(&bus)), bus)
}

fn config(max_iterations: u32, threshold: f64) -> IterativeConfig {
    IterativeConfig::new("drafter", "critic")
        .with_max_iterations(max_iterations)
        .with_threshold(threshold)
}

#[tokio::test]
async fn test_rising_scores_meet_threshold_on_third_iteration() {
    let (engine, _bus) = engine();
    let drafter = Drafter::new();

    let result = engine
        .run(
            "codegen",
            drafter.agent(),
            scripted(&[60.0, 78.0, 90.0]),
            &config(3, 85.0),
            json!("write a parser"),
            &ExecutionContext::default(),
        )
        .await;

    assert_eq!(result.total_iterations, 3);
    assert!(result.threshold_met);
    assert_eq!(result.outcome, LoopOutcome::ThresholdMet);
    assert_eq!(result.improvement_trend, vec![60.0, 78.0, 90.0]);
    assert_eq!(result.quality_improvement(), 30.0);
    assert_eq!(result.final_quality_score, 90.0);
    assert_eq!(result.final_output, Some(json!("draft 3")));
}

#[tokio::test]
async fn test_first_score_at_threshold_stops_immediately() {
    let (engine, _bus) = engine();
    let result = engine
        .run(
            "codegen",
            Drafter::new().agent(),
            scripted(&[85.0, 99.0]),
            &config(5, 85.0),
            json!("x"),
            &ExecutionContext::default(),
        )
        .await;

    assert_eq!(result.total_iterations, 1);
    assert!(result.threshold_met);
    assert_eq!(result.quality_improvement(), 0.0);
}

#[tokio::test]
async fn test_never_reaching_threshold_exhausts_iterations() {
    let (engine, _bus) = engine();
    let result = engine
        .run(
            "codegen",
            Drafter::new().agent(),
            scripted(&[40.0, 50.0, 60.0, 70.0]),
            &config(4, 95.0),
            json!("x"),
            &ExecutionContext::default(),
        )
        .await;

    assert_eq!(result.total_iterations, 4);
    assert!(!result.threshold_met);
    assert_eq!(result.outcome, LoopOutcome::Exhausted);
    assert!(result.success());
    assert_eq!(result.final_output, Some(json!("draft 4")));
}

#[tokio::test]
async fn test_next_input_carries_request_output_and_feedback() {
    let (engine, _bus) = engine();
    let drafter = Drafter::new();
    engine
        .run(
            "codegen",
            drafter.agent(),
            scripted(&[60.0, 90.0]),
            &config(3, 85.0),
            json!("write a parser"),
            &ExecutionContext::default(),
        )
        .await;

    let inputs = drafter.inputs.lock().unwrap().clone();
    assert_eq!(inputs.len(), 2);
    assert_eq!(inputs[0], json!("write a parser"));
    let second = &inputs[1];
    assert_eq!(second["original_request"], json!("write a parser"));
    assert_eq!(second["current_output"], json!("draft 1"));
    assert_eq!(second["iteration"], json!(2));
    assert!(second["feedback"]
        .as_str()
        .unwrap()
        .contains("Quality Score: 60.0/100"));
}

#[tokio::test]
async fn test_evaluator_sees_previous_feedback() {
    let (engine, _bus) = engine();
    let seen: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&seen);
    let critic: Arc<dyn Agent> = Arc::new(FnAgent::evaluator(
        AgentMetadata::new("critic", "Critic"),
        move |input, _ctx| {
            let record = Arc::clone(&record);
            async move {
                record.lock().unwrap().push(input);
                Ok(EvaluatorOutput::RawMap(
                    json!({ "quality_score": 70.0 }).as_object().cloned().unwrap_or_default(),
                ))
            }
        },
    ));

    engine
        .run(
            "codegen",
            Drafter::new().agent(),
            critic,
            &config(2, 85.0),
            json!("x"),
            &ExecutionContext::default(),
        )
        .await;

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 2);
    assert!(seen[0]["previous_feedback"].is_null());
    assert_eq!(seen[1]["previous_feedback"]["quality_score"], json!(70.0));
    assert_eq!(seen[1]["output"], json!("draft 2"));
}

#[tokio::test]
async fn test_text_feedback_is_scored_heuristically() {
    let (engine, _bus) = engine();
    let critic: Arc<dyn Agent> = Arc::new(FnAgent::new(
        AgentMetadata::new("critic", "Critic"),
        |_input, _ctx| async move { Ok(json!("Good structure and clear naming.")) },
    ));

    let result = engine
        .run(
            "codegen",
            Drafter::new().agent(),
            critic,
            &config(3, 80.0),
            json!("x"),
            &ExecutionContext::default(),
        )
        .await;

    assert_eq!(result.improvement_trend, vec![80.0]);
    assert!(result.threshold_met);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_improver_times_out_and_aborts() {
    let (engine, _bus) = engine();
    let slow: Arc<dyn Agent> = Arc::new(FnAgent::new(
        AgentMetadata::new("drafter", "Drafter"),
        |input, _ctx| async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(input)
        },
    ));

    let result = engine
        .run(
            "codegen",
            slow,
            scripted(&[99.0]),
            &config(3, 85.0).with_timeout_secs(1),
            json!("x"),
            &ExecutionContext::default(),
        )
        .await;

    assert_eq!(result.total_iterations, 1);
    assert!(!result.threshold_met);
    assert_eq!(result.outcome, LoopOutcome::Aborted);
    assert!(!result.iterations[0].success);
    assert_eq!(
        result.iterations[0].error.as_deref(),
        Some("agent drafter timed out after 1s")
    );
    assert!(result.final_output.is_none());
}

#[tokio::test]
async fn test_evaluator_failure_keeps_improver_output() {
    let (engine, _bus) = engine();
    let broken: Arc<dyn Agent> = Arc::new(FnAgent::evaluator(
        AgentMetadata::new("critic", "Critic"),
        |_input, _ctx| async move { Err(AgentError::failed("reviewer crashed")) },
    ));

    let result = engine
        .run(
            "codegen",
            Drafter::new().agent(),
            broken,
            &config(3, 85.0),
            json!("x"),
            &ExecutionContext::default(),
        )
        .await;

    assert_eq!(result.outcome, LoopOutcome::Aborted);
    let first = &result.iterations[0];
    assert!(!first.success);
    assert_eq!(first.output, Some(json!("draft 1")));
    assert!(first.error.as_deref().unwrap().contains("reviewer crashed"));
    assert!(result.abort_reason().is_some());
}

#[tokio::test]
async fn test_loop_events_share_correlation_id() {
    let (engine, bus) = engine();
    let mut stream = bus.stream();
    let ctx = ExecutionContext::new(Some("loop-corr".to_string()));

    engine
        .run(
            "codegen",
            Drafter::new().agent(),
            scripted(&[50.0, 90.0]),
            &config(3, 85.0),
            json!("x"),
            &ctx,
        )
        .await;

    let mut kinds = Vec::new();
    while let Ok(event) = stream.try_recv() {
        assert_eq!(event.correlation_id, "loop-corr");
        kinds.push(event.kind);
    }
    assert_eq!(
        kinds,
        vec![
            EventKind::LoopStarted,
            EventKind::IterationCompleted,
            EventKind::IterationCompleted,
            EventKind::LoopCompleted,
        ]
    );
}

fn loop_pipeline(critic: Arc<dyn Agent>, optional: bool) -> Orchestrator {
    let mut registry = AgentRegistry::new();
    registry.register_instance(Drafter::new().agent());
    registry.register_instance(critic);
    let mut step = StepConfig::iterative("iterative_codegen", config(3, 85.0));
    if optional {
        step = step.optional();
    }
    let mut orch = Orchestrator::new(
        Arc::new(registry),
        PipelineCatalog::new(),
        OrchestratorSettings::default(),
    );
    orch.initialize_with(PipelineConfig::new("loop", vec![step]))
        .unwrap();
    orch
}

#[tokio::test]
async fn test_iterative_step_result_shape() {
    let orch = loop_pipeline(scripted(&[70.0, 88.0]), false);

    let result = orch.execute(json!("x"), None).await.unwrap();

    assert!(result.success);
    let entry = &result.results["iterative_codegen"];
    assert_eq!(entry["output"], json!("draft 2"));
    assert_eq!(entry["quality_score"], json!(88.0));
    assert_eq!(entry["iterations_completed"], json!(2));
    assert_eq!(entry["threshold_met"], json!(true));
    assert_eq!(
        entry["iterative_result"]["improvement_trend"],
        json!([70.0, 88.0])
    );
    assert_eq!(result.final_output, Some(json!("draft 2")));
}

#[tokio::test]
async fn test_optional_iterative_failure_embeds_loop_result() {
    let broken: Arc<dyn Agent> = Arc::new(FnAgent::new(
        AgentMetadata::new("drafter", "Drafter"),
        |_input, _ctx| async move { Err(AgentError::failed("no model")) },
    ));
    let mut registry = AgentRegistry::new();
    registry.register_instance(broken);
    registry.register_instance(scripted(&[90.0]));
    let mut orch = Orchestrator::new(
        Arc::new(registry),
        PipelineCatalog::new(),
        OrchestratorSettings::default(),
    );
    orch.initialize_with(PipelineConfig::new(
        "loop",
        vec![StepConfig::iterative("iterative_codegen", config(3, 85.0)).optional()],
    ))
    .unwrap();

    let result = orch.execute(json!("x"), None).await.unwrap();

    assert!(result.success);
    let entry = &result.results["iterative_codegen"];
    assert_eq!(entry["optional"], json!(true));
    assert!(entry["error"].as_str().unwrap().contains("no model"));
    assert_eq!(entry["loop_result"]["outcome"], json!("aborted"));
}

#[tokio::test]
async fn test_required_iterative_step_with_usable_output_succeeds_when_exhausted() {
    let orch = loop_pipeline(scripted(&[10.0, 20.0, 30.0]), false);

    let result = orch.execute(json!("x"), None).await.unwrap();

    assert!(result.success);
    assert_eq!(
        result.results["iterative_codegen"]["threshold_met"],
        json!(false)
    );
}
