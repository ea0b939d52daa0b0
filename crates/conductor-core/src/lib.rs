//! Conductor Core Library
//!
//! Plans multi-agent pipelines into waves and runs them with bounded
//! concurrency, per-call timeouts and an iterative improve/evaluate loop.
//!
//! Agent and event-handler panics are caught and turned into failures, so the
//! crate needs unwinding panics.

#[cfg(panic = "abort")]
compile_error!("conductor-core catches agent and handler panics and requires panic = \"unwind\"");

pub mod agent;
pub mod context;
mod dispatch;
pub mod error;
pub mod events;
pub mod feedback;
pub mod iterative;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod telemetry;

pub use agent::{
    Agent, AgentError, AgentFactory, AgentMetadata, AgentRegistry, AgentResult, FnAgent,
    ValidationResult,
};
pub use context::{generate_correlation_id, ExecutionContext};
pub use error::{ConductorError, ConductorResult};
pub use events::{Event, EventBus, EventHandler, EventKind};
pub use feedback::{
    format_for_agent, normalize, EvaluatorOutput, Feedback, FeedbackKind, Issue, QualityMetrics,
    Severity,
};
pub use iterative::{IterationResult, IterativeLoopEngine, IterativeLoopResult, LoopOutcome};
pub use orchestrator::{
    publish_result, validate_request, Orchestrator, OrchestratorSettings, PipelineInfo,
    PipelineRunResult, StepResult,
};
pub use pipeline::{
    plan, ExecutionPlan, IterativeConfig, PipelineCatalog, PipelineConfig, StepConfig, Wave,
};
pub use progress::{ProgressSnapshot, ProgressTracker, StepProgress, StepStatus};
