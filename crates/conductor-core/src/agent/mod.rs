//! Agent capability interface.
//!
//! Every worker a pipeline can bind to implements [`Agent`]. The
//! orchestrator only ever sees agents through this trait; their internal
//! logic is opaque.
//!
//! # Module layout
//!
//! - this module: [`Agent`], [`AgentMetadata`], [`ValidationResult`], [`AgentError`]
//! - [`registry`]: [`AgentRegistry`], the catalog agents are instantiated from
//! - [`fn_agent`]: [`FnAgent`], an agent backed by an async closure

pub mod fn_agent;
pub mod registry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::context::ExecutionContext;
use crate::feedback::EvaluatorOutput;

pub use fn_agent::FnAgent;
pub use registry::{AgentFactory, AgentRegistry};

/// Immutable description of an agent, fixed at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetadata {
    /// Catalog key, e.g. `"python_coder"`.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Catalog keys of agents this one expects to exist.
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub version: String,
}

impl AgentMetadata {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            capabilities: Vec::new(),
            dependencies: Vec::new(),
            version: "1.0.0".to_string(),
        }
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    pub fn with_dependency(mut self, agent_id: impl Into<String>) -> Self {
        self.dependencies.push(agent_id.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
}

/// Outcome of an agent's input pre-check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub ok: bool,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            warnings: vec![reason.into()],
            suggestions: Vec::new(),
        }
    }

    pub fn warn(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }
}

/// Failure surfaced by an agent.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AgentError {
    pub fn failed(msg: impl Into<String>) -> Self {
        AgentError::Failed(msg.into())
    }
}

/// Result alias for agent operations.
pub type AgentResult<T> = std::result::Result<T, AgentError>;

/// A capability-bearing worker.
#[async_trait]
pub trait Agent: Send + Sync {
    fn metadata(&self) -> &AgentMetadata;

    /// Cheap pre-check run before `process`.
    fn validate_input(&self, _input: &Value) -> ValidationResult {
        ValidationResult::ok()
    }

    async fn process(&self, input: Value, context: &ExecutionContext) -> AgentResult<Value>;

    /// Critic entry point used by iterative loops.
    ///
    /// The default classifies the JSON returned by `process`. Agents that
    /// build typed [`crate::feedback::Feedback`] override this and answer
    /// with [`EvaluatorOutput::Structured`].
    async fn evaluate(
        &self,
        input: Value,
        context: &ExecutionContext,
    ) -> AgentResult<EvaluatorOutput> {
        self.process(input, context)
            .await
            .map(EvaluatorOutput::classify)
    }
}
