//! Fire-and-poll execution and best-effort publication.

use std::sync::Arc;
use std::time::Duration;

use conductor_core::metrics::METRICS;
use conductor_core::{
    publish_result, Agent, AgentError, AgentMetadata, AgentRegistry, ConductorError, FnAgent,
    Orchestrator, OrchestratorSettings, PipelineCatalog, PipelineConfig, PipelineRunResult,
    StepConfig,
};
use conductor_state::fakes::{MemoryExecutionStore, MemoryResultSink};
use conductor_state::{ExecutionId, ExecutionRecord, ExecutionStatus, ExecutionStore};
use serde_json::json;

fn echo(id: &str) -> Arc<dyn Agent> {
    Arc::new(FnAgent::new(AgentMetadata::new(id, id), |input, _ctx| async move {
        Ok(json!({ "echo": input }))
    }))
}

fn broken(id: &str) -> Arc<dyn Agent> {
    Arc::new(FnAgent::new(AgentMetadata::new(id, id), |_input, _ctx| async move {
        Err(AgentError::failed("disk full"))
    }))
}

fn initialized(agent: Arc<dyn Agent>) -> Arc<Orchestrator> {
    let key = agent.metadata().id.clone();
    let mut registry = AgentRegistry::new();
    registry.register_instance(agent);
    let mut orch = Orchestrator::new(
        Arc::new(registry),
        PipelineCatalog::new(),
        OrchestratorSettings::default(),
    );
    orch.initialize_with(PipelineConfig::new("bg", vec![StepConfig::regular(key)]))
        .unwrap();
    Arc::new(orch)
}

async fn wait_terminal(store: &dyn ExecutionStore, id: &ExecutionId) -> ExecutionRecord {
    for _ in 0..200 {
        let record = store.get(id).await.unwrap();
        if record.status.is_terminal() {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("execution {id} never finished");
}

#[tokio::test]
async fn test_spawned_execution_completes_in_store() {
    let store = Arc::new(MemoryExecutionStore::new());
    let orch = initialized(echo("worker"));

    let id = Arc::clone(&orch)
        .spawn_execution(store.clone(), json!("hello"), None)
        .await
        .unwrap();

    let record = wait_terminal(store.as_ref(), &id).await;
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.pipeline_name, "bg");
    let result = record.result.unwrap();
    assert_eq!(result["success"], json!(true));
    assert_eq!(result["results"]["worker"]["echo"], json!("hello"));
    assert_eq!(record.progress.unwrap()["progress_percentage"], json!(100.0));
}

#[tokio::test]
async fn test_spawned_failure_is_recorded() {
    let store = Arc::new(MemoryExecutionStore::new());
    let orch = initialized(broken("worker"));

    let id = orch
        .spawn_execution(store.clone(), json!("hello"), None)
        .await
        .unwrap();

    let record = wait_terminal(store.as_ref(), &id).await;
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert!(record.error.unwrap().contains("disk full"));
}

#[tokio::test]
async fn test_spawn_requires_initialization() {
    let store = Arc::new(MemoryExecutionStore::new());
    let orch = Arc::new(Orchestrator::new(
        Arc::new(AgentRegistry::new()),
        PipelineCatalog::new(),
        OrchestratorSettings::default(),
    ));

    let err = orch
        .spawn_execution(store.clone(), json!("x"), None)
        .await
        .unwrap_err();

    assert!(matches!(err, ConductorError::NotInitialized));
    assert!(store.list().await.unwrap().is_empty());
}

async fn successful_run() -> PipelineRunResult {
    initialized(echo("worker"))
        .execute(json!("hello"), None)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_publish_saves_once_per_run() {
    let sink = MemoryResultSink::new();
    let result = successful_run().await;
    let id = ExecutionId::new();

    assert!(publish_result(&sink, id.clone(), &json!("hello"), &result).await);
    assert!(publish_result(&sink, id.clone(), &json!("hello"), &result).await);

    assert_eq!(sink.len(), 1);
    assert_eq!(sink.records_for(&id)[0].pipeline_name, "bg");
}

#[tokio::test]
async fn test_publish_failure_never_fails_the_run() {
    let sink = MemoryResultSink::new();
    sink.set_failing(true);
    let result = successful_run().await;
    let before = METRICS.publish_failures();

    let saved = publish_result(&sink, ExecutionId::new(), &json!("hello"), &result).await;

    assert!(!saved);
    assert!(result.success);
    assert!(sink.is_empty());
    assert!(METRICS.publish_failures() > before);
}

#[tokio::test]
async fn test_unhealthy_sink_is_skipped() {
    let sink = MemoryResultSink::new();
    sink.set_healthy(false);
    let result = successful_run().await;

    assert!(!publish_result(&sink, ExecutionId::new(), &json!("hello"), &result).await);
    assert!(sink.is_empty());
}

#[tokio::test]
async fn test_failed_run_is_not_published() {
    let sink = MemoryResultSink::new();
    let result = initialized(broken("worker"))
        .execute(json!("hello"), None)
        .await
        .unwrap();

    assert!(!publish_result(&sink, ExecutionId::new(), &json!("hello"), &result).await);
    assert!(sink.is_empty());
}
