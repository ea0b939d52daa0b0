use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::progress::StepStatus;

/// How one step settled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub key: String,
    pub status: StepStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub optional: bool,
    /// 0-indexed wave the step ran in.
    pub wave: usize,
}

impl StepResult {
    pub fn succeeded(&self) -> bool {
        self.status == StepStatus::Completed
    }
}

/// Aggregated outcome of one `execute` call.
///
/// A failed run still carries every step that settled before the halt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRunResult {
    pub success: bool,
    pub pipeline_name: String,
    pub correlation_id: String,
    /// Step key to result payload.
    pub results: BTreeMap<String, Value>,
    /// Settled steps in execution order.
    pub steps: Vec<StepResult>,
    /// Value that would have fed the next wave.
    pub final_output: Option<Value>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl PipelineRunResult {
    pub fn step(&self, key: &str) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.key == key)
    }

    pub fn failed_steps(&self) -> impl Iterator<Item = &StepResult> {
        self.steps.iter().filter(|s| s.status == StepStatus::Failed)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
