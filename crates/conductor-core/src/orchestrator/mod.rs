//! Pipeline orchestrator.
//!
//! An [`Orchestrator`] owns one loaded pipeline: its configuration, the wave
//! plan, the agent instances bound to its steps, and the progress of the
//! current run. Lifecycle:
//!
//! 1. [`Orchestrator::initialize`] (or [`Orchestrator::initialize_with`])
//!    validates and plans the pipeline and instantiates its agents.
//! 2. [`Orchestrator::execute`] runs it wave by wave. Any number of runs may
//!    follow one initialization, one at a time.
//! 3. [`Orchestrator::clear`] drops everything again.
//!
//! [`Orchestrator::get_progress`] is the only call meant to overlap a run;
//! take a [`Orchestrator::progress_handle`] to poll from another task.

mod background;
mod request;
mod result;
mod run;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, instrument, warn};

use crate::agent::{Agent, AgentMetadata, AgentRegistry, ValidationResult};
use crate::error::{ConductorError, ConductorResult};
use crate::events::{EventBus, EventHandler, EventKind, DEFAULT_EVENT_CAPACITY};
use crate::iterative::IterativeLoopEngine;
use crate::pipeline::{plan, ExecutionPlan, PipelineCatalog, PipelineConfig};
use crate::progress::{ProgressSnapshot, ProgressTracker};

pub use background::publish_result;
pub use request::validate_request;
pub use result::{PipelineRunResult, StepResult};

/// Tuning knobs shared by every run of one orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Steps of one wave allowed in flight at once.
    pub max_concurrency: usize,
    /// Bound for regular steps without their own `timeout_secs`.
    pub default_step_timeout: Duration,
    /// Capacity of the live event stream.
    pub event_capacity: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            default_step_timeout: Duration::from_secs(300),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Read-only view of the loaded pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineInfo {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub steps: Vec<String>,
    pub waves: Vec<Vec<String>>,
}

struct ActivePipeline {
    config: PipelineConfig,
    plan: ExecutionPlan,
    /// Instances by catalog key.
    agents: HashMap<String, Arc<dyn Agent>>,
    /// Optional steps whose agents could not be created, with the reason.
    unavailable: HashMap<String, String>,
}

pub struct Orchestrator {
    registry: Arc<AgentRegistry>,
    catalog: PipelineCatalog,
    settings: OrchestratorSettings,
    bus: Arc<EventBus>,
    progress: Arc<ProgressTracker>,
    engine: IterativeLoopEngine,
    active: Option<ActivePipeline>,
    scratch: BTreeMap<String, Value>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<AgentRegistry>,
        catalog: PipelineCatalog,
        settings: OrchestratorSettings,
    ) -> Self {
        let bus = Arc::new(EventBus::new(settings.event_capacity));
        let progress = Arc::new(ProgressTracker::new());
        let handler: Arc<dyn EventHandler> = progress.clone();
        bus.subscribe(EventKind::AgentCompleted, Arc::clone(&handler));
        bus.subscribe(EventKind::AgentFailed, handler);

        Self {
            registry,
            catalog,
            settings,
            engine: IterativeLoopEngine::new(Arc::clone(&bus)),
            bus,
            progress,
            active: None,
            scratch: BTreeMap::new(),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn catalog(&self) -> &PipelineCatalog {
        &self.catalog
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn is_initialized(&self) -> bool {
        self.active.is_some()
    }

    /// Load the catalog pipeline called `name`.
    #[instrument(skip(self))]
    pub fn initialize(&mut self, name: &str) -> ConductorResult<()> {
        self.unload();
        let config = self.catalog.get(name)?.clone();
        self.initialize_with(config)
    }

    /// Load `config`, replacing whatever was loaded before.
    ///
    /// On error the orchestrator is left uninitialized.
    #[instrument(skip(self, config), fields(pipeline = %config.name))]
    pub fn initialize_with(&mut self, config: PipelineConfig) -> ConductorResult<()> {
        self.unload();
        config.validate()?;
        let plan = plan(&config.steps)?;

        for issue in self.registry.validate_dependencies() {
            warn!(%issue, "agent catalog dependency problem");
        }

        let mut agents: HashMap<String, Arc<dyn Agent>> = HashMap::new();
        let mut unavailable = HashMap::new();
        for step in &config.steps {
            for key in step.agent_keys() {
                if agents.contains_key(key) {
                    continue;
                }
                match self.registry.create(key) {
                    Ok(agent) => {
                        agents.insert(key.to_string(), agent);
                    }
                    Err(e) if step.optional => {
                        warn!(
                            step = %step.key(),
                            agent = %key,
                            error = %e,
                            "optional step will be skipped"
                        );
                        unavailable.insert(step.key().to_string(), e.to_string());
                        break;
                    }
                    Err(e) => {
                        error!(
                            step = %step.key(),
                            agent = %key,
                            error = %e,
                            "required agent unavailable"
                        );
                        return Err(e);
                    }
                }
            }
        }

        self.progress
            .reset(plan.waves.iter().flat_map(|w| w.steps.iter().map(String::as_str)));
        info!(
            version = %config.version,
            steps = config.steps.len(),
            waves = plan.waves.len(),
            agents = agents.len(),
            skipped = unavailable.len(),
            "pipeline initialized"
        );
        self.active = Some(ActivePipeline {
            config,
            plan,
            agents,
            unavailable,
        });
        Ok(())
    }

    /// Forget the loaded pipeline and its progress.
    fn unload(&mut self) {
        self.active = None;
        self.progress.reset(std::iter::empty());
    }

    /// Drop configuration, agent instances, context and progress.
    pub fn clear(&mut self) {
        if let Some(active) = self.active.take() {
            info!(pipeline = %active.config.name, "pipeline cleared");
        }
        self.scratch.clear();
        self.registry.clear_instances();
        self.progress.reset(std::iter::empty());
    }

    pub fn get_progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    /// Shared tracker for polling while `execute` runs elsewhere.
    pub fn progress_handle(&self) -> Arc<ProgressTracker> {
        Arc::clone(&self.progress)
    }

    pub fn pipeline_info(&self) -> Option<PipelineInfo> {
        self.active.as_ref().map(|active| PipelineInfo {
            name: active.config.name.clone(),
            version: active.config.version.clone(),
            description: active.config.description.clone(),
            steps: active
                .config
                .steps
                .iter()
                .map(|s| s.key().to_string())
                .collect(),
            waves: active.plan.as_groups(),
        })
    }

    /// Step key to the name of the agent(s) bound to it.
    pub fn active_agents(&self) -> BTreeMap<String, String> {
        let Some(active) = &self.active else {
            return BTreeMap::new();
        };
        active
            .config
            .steps
            .iter()
            .filter_map(|step| {
                let names: Vec<&str> = step
                    .agent_keys()
                    .into_iter()
                    .filter_map(|key| active.agents.get(key))
                    .map(|agent| agent.metadata().name.as_str())
                    .collect();
                (!names.is_empty()).then(|| (step.key().to_string(), names.join(" + ")))
            })
            .collect()
    }

    pub fn available_agents(&self) -> Vec<AgentMetadata> {
        self.registry.available()
    }

    pub fn validate_request(&self, request: &str) -> ValidationResult {
        validate_request(request)
    }

    /// Add a value to the scratch space handed to every step of later runs.
    pub fn set_context_value(&mut self, key: impl Into<String>, value: Value) {
        self.scratch.insert(key.into(), value);
    }

    fn active(&self) -> ConductorResult<&ActivePipeline> {
        self.active.as_ref().ok_or(ConductorError::NotInitialized)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("pipeline", &self.active.as_ref().map(|a| a.config.name.as_str()))
            .field("settings", &self.settings)
            .field("registry", &self.registry)
            .finish()
    }
}
