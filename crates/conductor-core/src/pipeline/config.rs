//! Declarative pipeline definitions.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConductorError, ConductorResult};
use crate::feedback::clamp_score;

fn default_max_iterations() -> u32 {
    3
}

fn default_quality_threshold() -> f64 {
    85.0
}

fn default_iteration_timeout_secs() -> u64 {
    300
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// Producer/critic binding and loop bounds of an iterative step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterativeConfig {
    pub improver_agent: String,
    pub evaluator_agent: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,
    #[serde(default = "default_iteration_timeout_secs")]
    pub timeout_per_iteration_secs: u64,
}

impl IterativeConfig {
    pub fn new(improver_agent: impl Into<String>, evaluator_agent: impl Into<String>) -> Self {
        Self {
            improver_agent: improver_agent.into(),
            evaluator_agent: evaluator_agent.into(),
            max_iterations: default_max_iterations(),
            quality_threshold: default_quality_threshold(),
            timeout_per_iteration_secs: default_iteration_timeout_secs(),
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.quality_threshold = threshold;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_per_iteration_secs = secs;
        self
    }

    /// Threshold clamped into `[0, 100]`.
    pub fn effective_threshold(&self) -> f64 {
        clamp_score(self.quality_threshold)
    }

    pub fn timeout_per_iteration(&self) -> Duration {
        Duration::from_secs(self.timeout_per_iteration_secs)
    }

    fn validate(&self, step: &str) -> ConductorResult<()> {
        if self.improver_agent.trim().is_empty() || self.evaluator_agent.trim().is_empty() {
            return Err(ConductorError::configuration(format!(
                "step '{step}': iterative steps need both an improver and an evaluator agent"
            )));
        }
        if self.max_iterations == 0 {
            return Err(ConductorError::configuration(format!(
                "step '{step}': max_iterations must be at least 1"
            )));
        }
        if self.timeout_per_iteration_secs == 0 {
            return Err(ConductorError::configuration(format!(
                "step '{step}': timeout_per_iteration_secs must be positive"
            )));
        }
        Ok(())
    }
}

/// One unit of pipeline work.
///
/// `agent_type` is the step key. For a regular step it is also the agent to
/// run; an iterative step names its agents in `iterative` instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    pub agent_type: String,
    #[serde(default)]
    pub optional: bool,
    /// `None`: depends on every earlier step. `Some([])`: depends on nothing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<String>>,
    /// Per-step bound for regular steps; the orchestrator default applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterative: Option<IterativeConfig>,
}

impl StepConfig {
    pub fn regular(agent_type: impl Into<String>) -> Self {
        Self {
            agent_type: agent_type.into(),
            optional: false,
            depends_on: None,
            timeout_secs: None,
            description: None,
            iterative: None,
        }
    }

    pub fn iterative(key: impl Into<String>, config: IterativeConfig) -> Self {
        Self {
            iterative: Some(config),
            ..Self::regular(key)
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = Some(deps.into_iter().map(Into::into).collect());
        self
    }

    /// Explicitly independent of every other step.
    pub fn independent(mut self) -> Self {
        self.depends_on = Some(Vec::new());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn key(&self) -> &str {
        &self.agent_type
    }

    pub fn is_iterative(&self) -> bool {
        self.iterative.is_some()
    }

    /// Catalog keys of every agent this step needs.
    pub fn agent_keys(&self) -> Vec<&str> {
        match &self.iterative {
            Some(it) => vec![it.improver_agent.as_str(), it.evaluator_agent.as_str()],
            None => vec![self.agent_type.as_str()],
        }
    }
}

/// A named, versioned, ordered list of steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub steps: Vec<StepConfig>,
}

impl PipelineConfig {
    pub fn new(name: impl Into<String>, steps: Vec<StepConfig>) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            description: None,
            steps,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn from_toml_str(s: &str) -> ConductorResult<Self> {
        toml::from_str(s)
            .map_err(|e| ConductorError::configuration(format!("invalid TOML: {e}")))
    }

    pub fn from_json_str(s: &str) -> ConductorResult<Self> {
        serde_json::from_str(s)
            .map_err(|e| ConductorError::configuration(format!("invalid JSON: {e}")))
    }

    pub fn step(&self, key: &str) -> Option<&StepConfig> {
        self.steps.iter().find(|s| s.agent_type == key)
    }

    /// Structural checks that do not need the dependency graph.
    ///
    /// Cycles are reported by the planner.
    pub fn validate(&self) -> ConductorResult<()> {
        if self.name.trim().is_empty() {
            return Err(ConductorError::configuration("pipeline name must not be empty"));
        }
        if self.steps.is_empty() {
            return Err(ConductorError::configuration(format!(
                "pipeline '{}' has no steps",
                self.name
            )));
        }

        let mut keys = HashSet::new();
        for step in &self.steps {
            if step.agent_type.trim().is_empty() {
                return Err(ConductorError::configuration(format!(
                    "pipeline '{}' has a step without agent_type",
                    self.name
                )));
            }
            if !keys.insert(step.agent_type.as_str()) {
                return Err(ConductorError::configuration(format!(
                    "duplicate step '{}' in pipeline '{}'",
                    step.agent_type, self.name
                )));
            }
            if step.timeout_secs == Some(0) {
                return Err(ConductorError::configuration(format!(
                    "step '{}': timeout_secs must be positive",
                    step.agent_type
                )));
            }
            if let Some(it) = &step.iterative {
                it.validate(&step.agent_type)?;
            }
        }

        for step in &self.steps {
            for dep in step.depends_on.iter().flatten() {
                if dep == &step.agent_type {
                    return Err(ConductorError::configuration(format!(
                        "step '{dep}' depends on itself"
                    )));
                }
                if !keys.contains(dep.as_str()) {
                    return Err(ConductorError::configuration(format!(
                        "step '{}' depends on unknown step '{dep}'",
                        step.agent_type
                    )));
                }
            }
        }
        Ok(())
    }
}
