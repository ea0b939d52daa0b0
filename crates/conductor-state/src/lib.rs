//! Conductor-State: execution tracking and result publication
//!
//! Backends that live next to the orchestrator without owning any of its
//! state: a store of fire-and-poll executions keyed by id, and a sink that
//! receives finished run records.
//!
//! ## Layer 0 - Data/Persistence
//!
//! ## Key Components
//!
//! - `ExecutionStore`: running/completed/failed records for background runs
//! - `ResultSink`: best-effort `save` + `health_check` contract
//! - `HttpResultSink`: `reqwest` client for the project backend
//! - `fakes`: in-memory implementations for tests and local runs

mod error;
pub mod fakes;
pub mod http_sink;
pub mod storage_traits;

pub use error::StorageError;
pub use http_sink::HttpResultSink;
pub use storage_traits::{
    ExecutionId, ExecutionRecord, ExecutionStatus, ExecutionStore, ResultSink, RunRecord,
    StorageResult,
};
