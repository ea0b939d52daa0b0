//! Pipeline configuration model and execution planning.
//!
//! # Module layout
//!
//! - [`config`]: `PipelineConfig`, `StepConfig`, `IterativeConfig`
//! - [`catalog`]: `PipelineCatalog`, named definitions from TOML/JSON
//! - [`planner`]: `plan`, `ExecutionPlan`, `Wave`

pub mod catalog;
pub mod config;
pub mod planner;

pub use catalog::PipelineCatalog;
pub use config::{IterativeConfig, PipelineConfig, StepConfig};
pub use planner::{plan, ExecutionPlan, Wave};
