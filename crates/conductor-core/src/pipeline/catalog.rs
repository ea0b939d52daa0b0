//! Named pipeline definitions.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, info};

use super::config::PipelineConfig;
use crate::error::{ConductorError, ConductorResult};

/// Pipelines available to `initialize`, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct PipelineCatalog {
    pipelines: BTreeMap<String, PipelineConfig>,
}

impl PipelineCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a definition under its own name.
    pub fn insert(&mut self, config: PipelineConfig) {
        debug!(pipeline = %config.name, steps = config.steps.len(), "pipeline registered");
        self.pipelines.insert(config.name.clone(), config);
    }

    pub fn with(mut self, config: PipelineConfig) -> Self {
        self.insert(config);
        self
    }

    pub fn get(&self, name: &str) -> ConductorResult<&PipelineConfig> {
        self.pipelines.get(name).ok_or_else(|| {
            ConductorError::configuration(format!(
                "unknown pipeline '{name}' (available: {})",
                self.names().join(", ")
            ))
        })
    }

    pub fn names(&self) -> Vec<String> {
        self.pipelines.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PipelineConfig> {
        self.pipelines.values()
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Parse one definition file; the format follows the extension.
    pub fn load_file(path: &Path) -> ConductorResult<PipelineConfig> {
        let content = std::fs::read_to_string(path)?;
        let parsed = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => PipelineConfig::from_toml_str(&content),
            Some("json") => PipelineConfig::from_json_str(&content),
            _ => {
                return Err(ConductorError::configuration(format!(
                    "unsupported pipeline file: {}",
                    path.display()
                )))
            }
        };
        parsed.map_err(|e| {
            ConductorError::configuration(format!("{}: {e}", path.display()))
        })
    }

    /// Load every `*.toml` and `*.json` file in `dir`, sorted by file name.
    pub fn load_dir(&mut self, dir: &Path) -> ConductorResult<usize> {
        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && matches!(
                        p.extension().and_then(|e| e.to_str()),
                        Some("toml") | Some("json")
                    )
            })
            .collect();
        paths.sort();

        for path in &paths {
            let config = Self::load_file(path)?;
            self.insert(config);
        }
        info!(dir = %dir.display(), loaded = paths.len(), "pipeline definitions loaded");
        Ok(paths.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::StepConfig;

    #[test]
    fn unknown_name_lists_available() {
        let catalog = PipelineCatalog::new()
            .with(PipelineConfig::new("default", vec![StepConfig::regular("a")]));
        let err = catalog.get("nightly").unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("default"));
        assert_eq!(catalog.get("default").unwrap().steps.len(), 1);
    }

    #[test]
    fn load_dir_reads_toml_and_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("alpha.toml"),
            "name = \"alpha\"\n[[steps]]\nagent_type = \"a\"\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("beta.json"),
            r#"{"name": "beta", "steps": [{"agent_type": "b"}]}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut catalog = PipelineCatalog::new();
        assert_eq!(catalog.load_dir(dir.path()).unwrap(), 2);
        assert_eq!(catalog.names(), vec!["alpha", "beta"]);
    }

    #[test]
    fn broken_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "name = ").unwrap();
        let err = PipelineCatalog::load_file(&path).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }
}
