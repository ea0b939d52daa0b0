//! Live progress of one pipeline run.
//!
//! The orchestrator updates step statuses directly; the tracker derives
//! counts, percentage and ETA from them. Reads take a short read lock and
//! never wait on agent work.

use std::sync::RwLock;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::{Event, EventHandler, EventKind};

/// Highest percentage reported before the run is marked finished.
const RUNNING_CEILING: f64 = 99.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn is_settled(self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed)
    }
}

/// Status line of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepProgress {
    pub key: String,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
}

impl StepProgress {
    fn pending(key: &str) -> Self {
        Self {
            key: key.to_string(),
            status: StepStatus::Pending,
            started_at: None,
            duration_ms: None,
            error: None,
        }
    }
}

/// Read-only projection handed to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub total_steps: usize,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub progress_percentage: f64,
    pub elapsed_ms: u64,
    pub estimated_remaining_ms: Option<u64>,
    pub steps: Vec<StepProgress>,
    pub current_step: Option<String>,
    pub is_running: bool,
    pub is_completed: bool,
    pub has_failures: bool,
}

#[derive(Debug, Default)]
struct State {
    steps: Vec<StepProgress>,
    completed: usize,
    failed: usize,
    started: Option<Instant>,
    finished_after_ms: Option<u64>,
    running_since: Vec<(String, Instant)>,
    high_water: f64,
}

impl State {
    fn step_mut(&mut self, key: &str) -> Option<&mut StepProgress> {
        self.steps.iter_mut().find(|s| s.key == key)
    }

    fn recount(&mut self) {
        self.completed = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count();
        self.failed = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .count();
    }

    fn settle(&mut self, key: &str, status: StepStatus, error: Option<String>) {
        let elapsed = self
            .running_since
            .iter()
            .position(|(k, _)| k == key)
            .map(|i| self.running_since.remove(i).1.elapsed().as_millis() as u64);
        if let Some(step) = self.step_mut(key) {
            step.status = status;
            step.duration_ms = elapsed.or(Some(0));
            step.error = error;
        }
        self.recount();
    }

    fn elapsed_ms(&self) -> u64 {
        match (self.finished_after_ms, self.started) {
            (Some(ms), _) => ms,
            (None, Some(started)) => started.elapsed().as_millis() as u64,
            (None, None) => 0,
        }
    }

    fn percentage(&mut self) -> f64 {
        if self.finished_after_ms.is_some() {
            self.high_water = 100.0;
            return 100.0;
        }
        let total = self.steps.len();
        let raw = if total == 0 {
            0.0
        } else {
            (self.completed + self.failed) as f64 / total as f64 * 100.0
        };
        self.high_water = self.high_water.max(raw.min(RUNNING_CEILING));
        self.high_water
    }

    fn estimate_remaining_ms(&self) -> Option<u64> {
        if self.finished_after_ms.is_some() {
            return Some(0);
        }
        let settled: Vec<u64> = self
            .steps
            .iter()
            .filter(|s| s.status.is_settled())
            .filter_map(|s| s.duration_ms)
            .collect();
        if settled.is_empty() {
            return None;
        }
        let mean = settled.iter().sum::<u64>() / settled.len() as u64;
        let remaining = self.steps.iter().filter(|s| !s.status.is_settled()).count() as u64;
        Some(mean * remaining)
    }
}

/// Shared, lock-protected progress state.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    state: RwLock<State>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Every step pending, nothing started.
    pub fn reset<'a>(&self, keys: impl IntoIterator<Item = &'a str>) {
        let mut state = self.write();
        *state = State {
            steps: keys.into_iter().map(StepProgress::pending).collect(),
            ..State::default()
        };
    }

    /// Reset and start the clock.
    pub fn start<'a>(&self, keys: impl IntoIterator<Item = &'a str>) {
        self.reset(keys);
        self.write().started = Some(Instant::now());
    }

    pub fn mark_running(&self, key: &str) {
        let mut state = self.write();
        state.running_since.push((key.to_string(), Instant::now()));
        if let Some(step) = state.step_mut(key) {
            step.status = StepStatus::Running;
            step.started_at = Some(Utc::now());
        }
    }

    pub fn mark_completed(&self, key: &str) {
        self.write().settle(key, StepStatus::Completed, None);
    }

    pub fn mark_failed(&self, key: &str, error: impl Into<String>) {
        self.write().settle(key, StepStatus::Failed, Some(error.into()));
    }

    /// The run is over, whether or not every step ran.
    pub fn finish(&self) {
        let mut state = self.write();
        let elapsed = state.elapsed_ms();
        state.finished_after_ms = Some(elapsed);
        state.running_since.clear();
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        // Write lock: the high-water mark moves on read.
        let mut state = self.write();
        let progress_percentage = state.percentage();
        let is_completed = state.finished_after_ms.is_some();
        ProgressSnapshot {
            total_steps: state.steps.len(),
            completed_steps: state.completed,
            failed_steps: state.failed,
            progress_percentage,
            elapsed_ms: state.elapsed_ms(),
            estimated_remaining_ms: state.estimate_remaining_ms(),
            steps: state.steps.clone(),
            current_step: state.running_since.last().map(|(k, _)| k.clone()),
            is_running: state.started.is_some() && !is_completed,
            is_completed,
            has_failures: state.failed > 0,
        }
    }
}

/// Keeps derived counters in line with step statuses on settlement events.
impl EventHandler for ProgressTracker {
    fn handle(&self, event: &Event) -> anyhow::Result<()> {
        if matches!(event.kind, EventKind::AgentCompleted | EventKind::AgentFailed) {
            self.write().recount();
        }
        Ok(())
    }
}
