//! Agents backed by async closures.
//!
//! Used for stub agents in tests and for small built-in workers. Inject a
//! deterministic closure in tests; wire a real agent type in production.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use super::{Agent, AgentError, AgentMetadata, AgentResult, ValidationResult};
use crate::context::ExecutionContext;
use crate::feedback::EvaluatorOutput;

type ProcessFn =
    dyn Fn(Value, ExecutionContext) -> BoxFuture<'static, AgentResult<Value>> + Send + Sync;
type EvaluateFn = dyn Fn(Value, ExecutionContext) -> BoxFuture<'static, AgentResult<EvaluatorOutput>>
    + Send
    + Sync;
type ValidateFn = dyn Fn(&Value) -> ValidationResult + Send + Sync;

enum Handler {
    Process(Arc<ProcessFn>),
    Evaluate(Arc<EvaluateFn>),
}

/// An [`Agent`] whose behaviour is a closure `(input, context) -> output`.
pub struct FnAgent {
    meta: AgentMetadata,
    handler: Handler,
    validator: Option<Arc<ValidateFn>>,
}

impl FnAgent {
    /// Producer-style agent: the closure answers `process`.
    pub fn new<F, Fut>(meta: AgentMetadata, f: F) -> Self
    where
        F: Fn(Value, ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AgentResult<Value>> + Send + 'static,
    {
        Self {
            meta,
            handler: Handler::Process(Arc::new(
                move |input: Value, ctx: ExecutionContext| -> BoxFuture<'static, AgentResult<Value>> {
                    Box::pin(f(input, ctx))
                },
            )),
            validator: None,
        }
    }

    /// Critic-style agent: the closure answers `evaluate` with any feedback shape.
    pub fn evaluator<F, Fut>(meta: AgentMetadata, f: F) -> Self
    where
        F: Fn(Value, ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AgentResult<EvaluatorOutput>> + Send + 'static,
    {
        Self {
            meta,
            handler: Handler::Evaluate(Arc::new(
                move |input: Value,
                      ctx: ExecutionContext|
                      -> BoxFuture<'static, AgentResult<EvaluatorOutput>> {
                    Box::pin(f(input, ctx))
                },
            )),
            validator: None,
        }
    }

    pub fn with_validator<V>(mut self, validator: V) -> Self
    where
        V: Fn(&Value) -> ValidationResult + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }
}

fn output_to_value(output: EvaluatorOutput) -> AgentResult<Value> {
    match output {
        EvaluatorOutput::Structured(feedback) => serde_json::to_value(*feedback)
            .map_err(|e| AgentError::Internal(anyhow::Error::new(e))),
        EvaluatorOutput::RawMap(map) => Ok(Value::Object(map)),
        EvaluatorOutput::Text(text) => Ok(Value::String(text)),
    }
}

#[async_trait]
impl Agent for FnAgent {
    fn metadata(&self) -> &AgentMetadata {
        &self.meta
    }

    fn validate_input(&self, input: &Value) -> ValidationResult {
        match &self.validator {
            Some(v) => v(input),
            None => ValidationResult::ok(),
        }
    }

    async fn process(&self, input: Value, context: &ExecutionContext) -> AgentResult<Value> {
        match &self.handler {
            Handler::Process(f) => f(input, context.clone()).await,
            Handler::Evaluate(f) => output_to_value(f(input, context.clone()).await?),
        }
    }

    async fn evaluate(
        &self,
        input: Value,
        context: &ExecutionContext,
    ) -> AgentResult<EvaluatorOutput> {
        match &self.handler {
            Handler::Process(f) => f(input, context.clone())
                .await
                .map(EvaluatorOutput::classify),
            Handler::Evaluate(f) => f(input, context.clone()).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::{Feedback, QualityMetrics};
    use serde_json::json;

    #[tokio::test]
    async fn process_closure_receives_context() {
        let agent = FnAgent::new(AgentMetadata::new("echo", "Echo"), |input, ctx| async move {
            Ok(json!({"input": input, "corr": ctx.correlation_id}))
        });
        let ctx = ExecutionContext::new(Some("c-1".to_string()));
        let out = agent.process(json!("hi"), &ctx).await.unwrap();
        assert_eq!(out, json!({"input": "hi", "corr": "c-1"}));
    }

    #[tokio::test]
    async fn evaluator_closure_serves_both_entry_points() {
        let agent = FnAgent::evaluator(AgentMetadata::new("critic", "Critic"), |_, _| async {
            Ok(EvaluatorOutput::from(Feedback::new(
                77.0,
                QualityMetrics::uniform(77.0),
            )))
        });
        let ctx = ExecutionContext::default();

        let out = agent.evaluate(json!({}), &ctx).await.unwrap();
        assert_eq!(out.shape(), "structured");

        let value = agent.process(json!({}), &ctx).await.unwrap();
        assert_eq!(value["quality_score"], 77.0);
    }

    #[test]
    fn validator_is_consulted() {
        let agent = FnAgent::new(AgentMetadata::new("strict", "Strict"), |i, _| async move {
            Ok(i)
        })
        .with_validator(|input| {
            if input.is_null() {
                ValidationResult::invalid("input required")
            } else {
                ValidationResult::ok()
            }
        });
        assert!(!agent.validate_input(&Value::Null).ok);
        assert!(agent.validate_input(&json!("x")).ok);
    }
}
