//! Global atomic counters for orchestration observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a run).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters.
pub struct Metrics {
    pipelines_run: AtomicU64,
    pipelines_failed: AtomicU64,
    steps_failed: AtomicU64,
    iterations_run: AtomicU64,
    subscriber_errors: AtomicU64,
    publish_failures: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! counter {
    ($inc:ident, $get:ident, $field:ident) => {
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(metric = stringify!($field), "counter incremented");
        }

        pub fn $get(&self) -> u64 {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            pipelines_run: AtomicU64::new(0),
            pipelines_failed: AtomicU64::new(0),
            steps_failed: AtomicU64::new(0),
            iterations_run: AtomicU64::new(0),
            subscriber_errors: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
        }
    }

    counter!(inc_pipelines_run, pipelines_run, pipelines_run);
    counter!(inc_pipelines_failed, pipelines_failed, pipelines_failed);
    counter!(inc_steps_failed, steps_failed, steps_failed);
    counter!(inc_iterations_run, iterations_run, iterations_run);
    counter!(inc_subscriber_errors, subscriber_errors, subscriber_errors);
    counter!(inc_publish_failures, publish_failures, publish_failures);

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            pipelines_run = self.pipelines_run(),
            pipelines_failed = self.pipelines_failed(),
            steps_failed = self.steps_failed(),
            iterations_run = self.iterations_run(),
            subscriber_errors = self.subscriber_errors(),
            publish_failures = self.publish_failures(),
        );
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.pipelines_run.store(0, Ordering::Relaxed);
        self.pipelines_failed.store(0, Ordering::Relaxed);
        self.steps_failed.store(0, Ordering::Relaxed);
        self.iterations_run.store(0, Ordering::Relaxed);
        self.subscriber_errors.store(0, Ordering::Relaxed);
        self.publish_failures.store(0, Ordering::Relaxed);
    }
}
