//! Dependency resolution into execution waves.
//!
//! Steps are nodes of a directed graph. An edge `A → B` means "B depends on
//! A". A step without an explicit `depends_on` depends on every step declared
//! before it, so the default plan is a sequential chain. An explicit empty
//! list makes a step independent.
//!
//! Waves are computed with Kahn's algorithm and level tracking: a step's wave
//! is one past the deepest wave among its dependencies. Steps in one wave are
//! listed in declaration order.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;

use super::config::StepConfig;
use crate::error::{ConductorError, ConductorResult};

/// A set of steps that may run concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Wave {
    /// 0-indexed position in the plan.
    pub index: usize,
    /// Step keys in declaration order.
    pub steps: Vec<String>,
}

impl Wave {
    /// The declared last step, whose result feeds the next wave.
    pub fn last_step(&self) -> Option<&str> {
        self.steps.last().map(String::as_str)
    }
}

/// Ordered waves covering every step exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionPlan {
    pub waves: Vec<Wave>,
}

impl ExecutionPlan {
    pub fn step_count(&self) -> usize {
        self.waves.iter().map(|w| w.steps.len()).sum()
    }

    pub fn wave_of(&self, key: &str) -> Option<usize> {
        self.waves
            .iter()
            .find(|w| w.steps.iter().any(|s| s == key))
            .map(|w| w.index)
    }

    /// Waves as plain key lists.
    pub fn as_groups(&self) -> Vec<Vec<String>> {
        self.waves.iter().map(|w| w.steps.clone()).collect()
    }
}

/// Effective dependencies of each step, by declaration index.
fn dependencies(steps: &[StepConfig]) -> ConductorResult<Vec<Vec<usize>>> {
    let index: HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.agent_type.as_str(), i))
        .collect();

    steps
        .iter()
        .enumerate()
        .map(|(i, step)| match &step.depends_on {
            None => Ok((0..i).collect()),
            Some(deps) => deps
                .iter()
                .map(|dep| {
                    index.get(dep.as_str()).copied().ok_or_else(|| {
                        ConductorError::configuration(format!(
                            "step '{}' depends on unknown step '{dep}'",
                            step.agent_type
                        ))
                    })
                })
                .collect(),
        })
        .collect()
}

/// Build the wave plan for `steps`.
///
/// Fails with [`ConductorError::DependencyCycle`] naming the unresolved
/// steps when the graph is not acyclic.
pub fn plan(steps: &[StepConfig]) -> ConductorResult<ExecutionPlan> {
    if steps.is_empty() {
        return Ok(ExecutionPlan { waves: Vec::new() });
    }

    let deps = dependencies(steps)?;

    let mut in_degree: Vec<usize> = deps.iter().map(Vec::len).collect();
    let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
    for (step, step_deps) in deps.iter().enumerate() {
        for &dep in step_deps {
            downstream[dep].push(step);
        }
    }

    // Kahn's algorithm with level tracking.
    let mut queue: VecDeque<usize> = (0..steps.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut level: Vec<usize> = vec![0; steps.len()];
    let mut resolved = 0usize;

    while let Some(node) = queue.pop_front() {
        resolved += 1;
        for &next in &downstream[node] {
            level[next] = level[next].max(level[node] + 1);
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if resolved != steps.len() {
        let stuck = (0..steps.len())
            .filter(|&i| in_degree[i] > 0)
            .map(|i| steps[i].agent_type.clone())
            .collect();
        return Err(ConductorError::DependencyCycle { steps: stuck });
    }

    let depth = level.iter().copied().max().unwrap_or(0) + 1;
    let mut waves: Vec<Wave> = (0..depth)
        .map(|index| Wave {
            index,
            steps: Vec::new(),
        })
        .collect();
    for (i, step) in steps.iter().enumerate() {
        waves[level[i]].steps.push(step.agent_type.clone());
    }

    Ok(ExecutionPlan { waves })
}
