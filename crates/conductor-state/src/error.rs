//! Error types for conductor-state

use thiserror::Error;

/// Errors produced by execution stores and result sinks.
#[derive(Error, Debug)]
pub enum StorageError {
    /// No execution exists under the given id
    #[error("execution not found: {execution_id}")]
    ExecutionNotFound { execution_id: String },

    /// The execution is already terminal and cannot change state
    #[error("invalid transition for execution {execution_id}: {from} -> {to}")]
    InvalidTransition {
        execution_id: String,
        from: String,
        to: String,
    },

    /// Transport failure talking to a remote backend
    #[error("http request failed: {0}")]
    Http(String),

    /// The remote backend answered but refused the record
    #[error("backend rejected record: status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Serialization error
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        StorageError::Http(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_names_both_states() {
        let err = StorageError::InvalidTransition {
            execution_id: "exec-1".to_string(),
            from: "Completed".to_string(),
            to: "Failed".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("exec-1"));
        assert!(msg.contains("Completed -> Failed"));
    }

    #[test]
    fn rejected_includes_status() {
        let err = StorageError::Rejected {
            status: 503,
            body: "busy".to_string(),
        };
        assert!(err.to_string().contains("503"));
    }
}
