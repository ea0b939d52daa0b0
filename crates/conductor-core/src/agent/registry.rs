//! Agent catalog.
//!
//! An explicit value mapping catalog keys to factories. Instances are
//! created on first request and cached per key until
//! [`AgentRegistry::clear_instances`].

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use super::{Agent, AgentMetadata, AgentResult};
use crate::error::{ConductorError, ConductorResult};

/// Builds agent instances for one catalog key.
pub trait AgentFactory: Send + Sync {
    fn metadata(&self) -> AgentMetadata;

    fn create(&self) -> AgentResult<Arc<dyn Agent>>;
}

struct FnFactory<F> {
    meta: AgentMetadata,
    build: F,
}

impl<F> AgentFactory for FnFactory<F>
where
    F: Fn() -> AgentResult<Arc<dyn Agent>> + Send + Sync,
{
    fn metadata(&self) -> AgentMetadata {
        self.meta.clone()
    }

    fn create(&self) -> AgentResult<Arc<dyn Agent>> {
        (self.build)()
    }
}

struct SharedInstance(Arc<dyn Agent>);

impl AgentFactory for SharedInstance {
    fn metadata(&self) -> AgentMetadata {
        self.0.metadata().clone()
    }

    fn create(&self) -> AgentResult<Arc<dyn Agent>> {
        Ok(Arc::clone(&self.0))
    }
}

/// Catalog of agents a pipeline may bind to.
#[derive(Default)]
pub struct AgentRegistry {
    factories: BTreeMap<String, Arc<dyn AgentFactory>>,
    instances: Mutex<HashMap<String, Arc<dyn Agent>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `key`, replacing any previous one.
    pub fn register(&mut self, key: impl Into<String>, factory: Arc<dyn AgentFactory>) {
        let key = key.into();
        if self.factories.insert(key.clone(), factory).is_some() {
            warn!(agent = %key, "replacing registered agent factory");
        }
        self.instances().remove(&key);
    }

    /// Register a closure factory; the key is `metadata.id`.
    pub fn register_fn<F>(&mut self, metadata: AgentMetadata, build: F)
    where
        F: Fn() -> AgentResult<Arc<dyn Agent>> + Send + Sync + 'static,
    {
        let key = metadata.id.clone();
        self.register(
            key,
            Arc::new(FnFactory {
                meta: metadata,
                build,
            }),
        );
    }

    /// Register an existing instance shared by every pipeline; the key is its id.
    pub fn register_instance(&mut self, agent: Arc<dyn Agent>) {
        let key = agent.metadata().id.clone();
        self.register(key, Arc::new(SharedInstance(agent)));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Metadata of every registered agent, sorted by key.
    pub fn available(&self) -> Vec<AgentMetadata> {
        self.factories.values().map(|f| f.metadata()).collect()
    }

    /// Return the cached instance for `key`, creating it if needed.
    pub fn create(&self, key: &str) -> ConductorResult<Arc<dyn Agent>> {
        if let Some(agent) = self.instances().get(key) {
            return Ok(Arc::clone(agent));
        }

        let factory = self
            .factories
            .get(key)
            .ok_or_else(|| ConductorError::AgentInstantiation {
                agent: key.to_string(),
                reason: "no agent registered under this key".to_string(),
            })?;

        let agent = factory
            .create()
            .map_err(|e| ConductorError::AgentInstantiation {
                agent: key.to_string(),
                reason: e.to_string(),
            })?;
        debug!(agent = %key, name = %agent.metadata().name, "agent instantiated");

        self.instances()
            .insert(key.to_string(), Arc::clone(&agent));
        Ok(agent)
    }

    /// Drop every cached instance; the next `create` builds fresh ones.
    pub fn clear_instances(&self) {
        self.instances().clear();
    }

    pub fn cached_instances(&self) -> usize {
        self.instances().len()
    }

    /// Declared dependencies that point at unregistered agents.
    pub fn validate_dependencies(&self) -> Vec<String> {
        let mut issues = Vec::new();
        for (key, factory) in &self.factories {
            for dep in factory.metadata().dependencies {
                if !self.factories.contains_key(&dep) {
                    issues.push(format!("agent '{key}' depends on unregistered agent '{dep}'"));
                }
            }
        }
        issues
    }

    fn instances(&self) -> MutexGuard<'_, HashMap<String, Arc<dyn Agent>>> {
        self.instances
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentError, FnAgent};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn echo(id: &str) -> Arc<dyn Agent> {
        Arc::new(FnAgent::new(AgentMetadata::new(id, id), |input, _| async move {
            Ok(input)
        }))
    }

    #[test]
    fn create_caches_until_cleared() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        let mut registry = AgentRegistry::new();
        registry.register_fn(AgentMetadata::new("coder", "Coder"), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(echo("coder"))
        });

        let a = registry.create("coder").unwrap();
        let b = registry.create("coder").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(built.load(Ordering::SeqCst), 1);

        registry.clear_instances();
        assert_eq!(registry.cached_instances(), 0);
        registry.create("coder").unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unknown_key_is_instantiation_error() {
        let registry = AgentRegistry::new();
        let err = registry.create("ghost").err().unwrap();
        assert!(matches!(
            err,
            ConductorError::AgentInstantiation { ref agent, .. } if agent == "ghost"
        ));
    }

    #[test]
    fn factory_failure_is_instantiation_error() {
        let mut registry = AgentRegistry::new();
        registry.register_fn(AgentMetadata::new("broken", "Broken"), || {
            Err(AgentError::failed("missing model credentials"))
        });
        let err = registry.create("broken").err().unwrap();
        assert!(err.to_string().contains("missing model credentials"));
    }

    #[test]
    fn available_is_sorted_and_dependencies_checked() {
        let mut registry = AgentRegistry::new();
        registry.register_instance(echo("zeta"));
        registry.register_fn(
            AgentMetadata::new("alpha", "Alpha").with_dependency("missing"),
            || Ok(echo("alpha")),
        );

        let ids: Vec<_> = registry.available().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);

        let issues = registry.validate_dependencies();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].contains("missing"));
    }
}
