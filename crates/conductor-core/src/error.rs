//! Error taxonomy for pipeline configuration and execution.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by the orchestration layer.
#[derive(Debug, Error)]
pub enum ConductorError {
    /// The pipeline definition is malformed or unknown.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Step dependencies form a cycle.
    #[error("dependency cycle detected involving steps: {steps:?}")]
    DependencyCycle { steps: Vec<String> },

    /// An agent could not be created from the catalog.
    #[error("failed to instantiate agent '{agent}': {reason}")]
    AgentInstantiation { agent: String, reason: String },

    /// An agent invocation exceeded its time bound.
    #[error("agent {agent} timed out after {timeout:?}")]
    AgentTimeout { agent: String, timeout: Duration },

    /// An agent invocation failed for any other reason.
    #[error("agent '{agent}' failed: {reason}")]
    AgentExecution { agent: String, reason: String },

    /// `execute` was called before `initialize`.
    #[error("orchestrator not initialized: no pipeline configuration loaded")]
    NotInitialized,

    /// The execution store rejected a background-run update.
    #[error("storage error: {0}")]
    Storage(#[from] conductor_state::StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConductorError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        ConductorError::Configuration(msg.into())
    }

    /// True for errors that belong to the pipeline definition itself.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ConductorError::Configuration(_) | ConductorError::DependencyCycle { .. }
        )
    }

    /// True for failures of a single agent invocation.
    pub fn is_step_failure(&self) -> bool {
        matches!(
            self,
            ConductorError::AgentTimeout { .. } | ConductorError::AgentExecution { .. }
        )
    }
}

/// Convenience result alias.
pub type ConductorResult<T> = std::result::Result<T, ConductorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_displays_step_names() {
        let err = ConductorError::DependencyCycle {
            steps: vec!["coder".to_string(), "reviewer".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("coder"));
        assert!(msg.contains("reviewer"));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_timeout_error_names_agent_and_bound() {
        let err = ConductorError::AgentTimeout {
            agent: "python_coder".to_string(),
            timeout: Duration::from_secs(300),
        };
        assert_eq!(err.to_string(), "agent python_coder timed out after 300s");
        assert!(err.is_step_failure());
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_instantiation_error_is_not_step_failure() {
        let err = ConductorError::AgentInstantiation {
            agent: "documenter".to_string(),
            reason: "not registered".to_string(),
        };
        assert!(!err.is_step_failure());
        assert!(err.to_string().contains("documenter"));
    }
}
