//! Per-run execution context handed to every agent invocation.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

/// Context threaded through one pipeline run.
///
/// The scratch space is frozen when the run starts; agents can read it but
/// the orchestrator never writes to it on their behalf.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionContext {
    pub correlation_id: String,
    pub pipeline_name: Option<String>,
    /// Key of the step being executed, when invoked from a pipeline.
    pub step_key: Option<String>,
    scratch: Arc<BTreeMap<String, Value>>,
}

impl ExecutionContext {
    /// Create a context, generating a correlation id when none is given.
    pub fn new(correlation_id: Option<String>) -> Self {
        let correlation_id = correlation_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(generate_correlation_id);
        Self {
            correlation_id,
            pipeline_name: None,
            step_key: None,
            scratch: Arc::new(BTreeMap::new()),
        }
    }

    pub fn with_pipeline(mut self, name: impl Into<String>) -> Self {
        self.pipeline_name = Some(name.into());
        self
    }

    pub fn with_scratch(mut self, scratch: BTreeMap<String, Value>) -> Self {
        self.scratch = Arc::new(scratch);
        self
    }

    /// Child context for a single step; shares the same scratch space.
    pub fn for_step(&self, step_key: &str) -> Self {
        Self {
            step_key: Some(step_key.to_string()),
            ..self.clone()
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.scratch.get(key)
    }

    pub fn scratch(&self) -> &BTreeMap<String, Value> {
        &self.scratch
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Fresh opaque correlation id.
pub fn generate_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn generates_correlation_id_when_absent() {
        let a = ExecutionContext::new(None);
        let b = ExecutionContext::new(Some("   ".to_string()));
        assert!(!a.correlation_id.is_empty());
        assert!(!b.correlation_id.trim().is_empty());
        assert_ne!(a.correlation_id, b.correlation_id);
    }

    #[test]
    fn keeps_supplied_correlation_id() {
        let ctx = ExecutionContext::new(Some("corr-42".to_string()));
        assert_eq!(ctx.correlation_id, "corr-42");
    }

    #[test]
    fn step_context_shares_scratch() {
        let mut scratch = BTreeMap::new();
        scratch.insert("tenant".to_string(), json!("acme"));
        let ctx = ExecutionContext::new(None)
            .with_pipeline("default")
            .with_scratch(scratch);
        let step = ctx.for_step("coder");

        assert_eq!(step.step_key.as_deref(), Some("coder"));
        assert_eq!(step.correlation_id, ctx.correlation_id);
        assert_eq!(step.get("tenant"), Some(&json!("acme")));
        assert_eq!(step.pipeline_name.as_deref(), Some("default"));
    }

    #[test]
    fn serializes_with_scratch_values() {
        let mut scratch = BTreeMap::new();
        scratch.insert("tenant".to_string(), json!("acme"));
        let ctx = ExecutionContext::new(Some("corr-7".to_string())).with_scratch(scratch);

        let value = serde_json::to_value(&ctx).unwrap();
        assert_eq!(value["correlation_id"], json!("corr-7"));
        assert_eq!(value["scratch"]["tenant"], json!("acme"));
    }
}
