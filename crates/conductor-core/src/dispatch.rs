//! Bounded agent invocation.
//!
//! Every agent call runs off the calling task and is bounded with
//! `tokio::time::timeout`. On a multi-thread runtime the call is spawned onto
//! the worker pool. A current-thread runtime has no other worker, so the call
//! is driven on the blocking pool instead; an agent that blocks its thread
//! still cannot hold back the timer. A timed-out call is aborted at its next
//! await point and its result discarded.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{abortable, Aborted};
use serde_json::Value;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::JoinHandle;
use tracing::{warn, Instrument};

use crate::agent::{Agent, AgentResult};
use crate::context::ExecutionContext;
use crate::error::{ConductorError, ConductorResult};
use crate::feedback::EvaluatorOutput;

fn spawn_off_thread<R, Fut>(fut: Fut) -> JoinHandle<R>
where
    R: Send + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    let runtime = Handle::current();
    match runtime.runtime_flavor() {
        RuntimeFlavor::CurrentThread => tokio::task::spawn_blocking(move || runtime.block_on(fut)),
        _ => tokio::spawn(fut),
    }
}

/// Run `fut` off the calling task, bounded by `timeout`.
pub(crate) async fn bounded<T, Fut>(agent: &str, timeout: Duration, fut: Fut) -> ConductorResult<T>
where
    T: Send + 'static,
    Fut: Future<Output = AgentResult<T>> + Send + 'static,
{
    let (fut, abort) = abortable(fut.in_current_span());
    let mut handle = spawn_off_thread(fut);
    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(Ok(Ok(value)))) => Ok(value),
        Ok(Ok(Ok(Err(e)))) => Err(ConductorError::AgentExecution {
            agent: agent.to_string(),
            reason: e.to_string(),
        }),
        Ok(Ok(Err(Aborted))) => Err(ConductorError::AgentExecution {
            agent: agent.to_string(),
            reason: "agent task cancelled".to_string(),
        }),
        Ok(Err(join_err)) => {
            let reason = if join_err.is_panic() {
                "agent panicked".to_string()
            } else {
                "agent task cancelled".to_string()
            };
            warn!(agent = %agent, reason = %reason, "agent task did not complete");
            Err(ConductorError::AgentExecution {
                agent: agent.to_string(),
                reason,
            })
        }
        Err(_) => {
            abort.abort();
            handle.abort();
            Err(ConductorError::AgentTimeout {
                agent: agent.to_string(),
                timeout,
            })
        }
    }
}

/// `agent.process(input, ctx)` with a time bound.
pub(crate) async fn process(
    key: &str,
    agent: Arc<dyn Agent>,
    input: Value,
    ctx: ExecutionContext,
    timeout: Duration,
) -> ConductorResult<Value> {
    bounded(key, timeout, async move { agent.process(input, &ctx).await }).await
}

/// `agent.evaluate(input, ctx)` with a time bound.
pub(crate) async fn evaluate(
    key: &str,
    agent: Arc<dyn Agent>,
    input: Value,
    ctx: ExecutionContext,
    timeout: Duration,
) -> ConductorResult<EvaluatorOutput> {
    bounded(key, timeout, async move { agent.evaluate(input, &ctx).await }).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentError;

    #[tokio::test]
    async fn returns_value_within_bound() {
        let out = bounded("fast", Duration::from_secs(1), async { Ok(7u32) }).await;
        assert_eq!(out.unwrap(), 7);
    }

    #[tokio::test]
    async fn agent_error_becomes_execution_error() {
        let out: ConductorResult<u32> = bounded("flaky", Duration::from_secs(1), async {
            Err(AgentError::failed("model refused"))
        })
        .await;
        match out.unwrap_err() {
            ConductorError::AgentExecution { agent, reason } => {
                assert_eq!(agent, "flaky");
                assert_eq!(reason, "model refused");
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slow_agent_times_out() {
        let out: ConductorResult<u32> = bounded("slow", Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(1)
        })
        .await;
        assert!(matches!(out, Err(ConductorError::AgentTimeout { .. })));
    }

    #[tokio::test]
    async fn panic_is_contained() {
        let out: ConductorResult<u32> = bounded("buggy", Duration::from_secs(1), async {
            let empty: Vec<u32> = Vec::new();
            Ok(empty[3])
        })
        .await;
        assert!(out.unwrap_err().to_string().contains("panicked"));
    }

    #[tokio::test]
    async fn blocking_agent_cannot_outlast_its_bound_on_current_thread_runtime() {
        let started = std::time::Instant::now();
        let out: ConductorResult<u32> = bounded("heavy", Duration::from_millis(100), async {
            std::thread::sleep(Duration::from_millis(1500));
            Ok(1)
        })
        .await;

        assert!(matches!(out, Err(ConductorError::AgentTimeout { .. })));
        assert!(started.elapsed() < Duration::from_millis(1000));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocking_agent_cannot_outlast_its_bound_on_worker_pool() {
        let started = std::time::Instant::now();
        let out: ConductorResult<u32> = bounded("heavy", Duration::from_millis(100), async {
            std::thread::sleep(Duration::from_millis(1500));
            Ok(1)
        })
        .await;

        assert!(matches!(out, Err(ConductorError::AgentTimeout { .. })));
        assert!(started.elapsed() < Duration::from_millis(1000));
    }
}
