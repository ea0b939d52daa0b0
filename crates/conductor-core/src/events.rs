//! In-process lifecycle event bus.
//!
//! Two delivery paths share one [`EventBus::publish`] call:
//!
//! - Handlers registered per [`EventKind`] (or for all kinds) run inline.
//!   Each call is isolated: an error or panic is logged and counted, never
//!   returned to the publisher.
//! - A bounded `tokio::sync::broadcast` stream for async consumers. A
//!   receiver that falls behind loses the oldest events; publishing with no
//!   receivers is not an error.
//!
//! Publishing never fails and never waits on a consumer.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{trace, warn};
use uuid::Uuid;

use crate::metrics::METRICS;

/// Default capacity of the live event stream.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Lifecycle event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PipelineStarted,
    PipelineCompleted,
    PipelineFailed,
    AgentStarted,
    AgentCompleted,
    AgentFailed,
    LoopStarted,
    IterationCompleted,
    IterationFailed,
    LoopCompleted,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::PipelineStarted => "pipeline_started",
            EventKind::PipelineCompleted => "pipeline_completed",
            EventKind::PipelineFailed => "pipeline_failed",
            EventKind::AgentStarted => "agent_started",
            EventKind::AgentCompleted => "agent_completed",
            EventKind::AgentFailed => "agent_failed",
            EventKind::LoopStarted => "loop_started",
            EventKind::IterationCompleted => "iteration_completed",
            EventKind::IterationFailed => "iteration_failed",
            EventKind::LoopCompleted => "loop_completed",
        }
    }

    /// Events emitted from inside an iterative loop.
    pub fn is_loop_scoped(self) -> bool {
        matches!(
            self,
            EventKind::LoopStarted
                | EventKind::IterationCompleted
                | EventKind::IterationFailed
                | EventKind::LoopCompleted
        )
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub kind: EventKind,
    /// Component or agent that emitted the event.
    pub source: String,
    pub correlation_id: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn new(
        kind: EventKind,
        source: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            source: source.into(),
            correlation_id: correlation_id.into(),
            payload: Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Subscriber callback.
///
/// Handlers run on the publisher's thread and must return quickly; anything
/// slow belongs on [`EventBus::stream`].
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

impl<F> EventHandler for F
where
    F: Fn(&Event) -> anyhow::Result<()> + Send + Sync,
{
    fn handle(&self, event: &Event) -> anyhow::Result<()> {
        self(event)
    }
}

#[derive(Default)]
struct Subscribers {
    by_kind: HashMap<EventKind, Vec<Arc<dyn EventHandler>>>,
    all: Vec<Arc<dyn EventHandler>>,
}

/// Publish/subscribe channel keyed by event type.
pub struct EventBus {
    subscribers: RwLock<Subscribers>,
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            subscribers: RwLock::new(Subscribers::default()),
            tx,
        }
    }

    /// Register a handler for one event type.
    pub fn subscribe(&self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        let mut subs = self
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subs.by_kind.entry(kind).or_default().push(handler);
    }

    /// Register a handler for every event type.
    pub fn subscribe_all(&self, handler: Arc<dyn EventHandler>) {
        let mut subs = self
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subs.all.push(handler);
    }

    /// Live stream of every published event.
    pub fn stream(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Handlers that would receive an event of `kind`.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        let subs = self
            .subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subs.by_kind.get(&kind).map_or(0, Vec::len) + subs.all.len()
    }

    /// Deliver `event` to its handlers and the live stream.
    pub fn publish(&self, event: Event) {
        // Snapshot so handlers may subscribe without deadlocking.
        let handlers: Vec<Arc<dyn EventHandler>> = {
            let subs = self
                .subscribers
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            subs.by_kind
                .get(&event.kind)
                .into_iter()
                .flatten()
                .chain(subs.all.iter())
                .cloned()
                .collect()
        };

        trace!(
            kind = %event.kind,
            source = %event.source,
            correlation_id = %event.correlation_id,
            handlers = handlers.len(),
            "publishing event"
        );

        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler.handle(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    METRICS.inc_subscriber_errors();
                    warn!(
                        kind = %event.kind,
                        correlation_id = %event.correlation_id,
                        error = %e,
                        "event handler failed"
                    );
                }
                Err(_) => {
                    METRICS.inc_subscriber_errors();
                    warn!(
                        kind = %event.kind,
                        correlation_id = %event.correlation_id,
                        "event handler panicked"
                    );
                }
            }
        }

        // No receivers is not an error.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
