//! Conversion of evaluator output into [`Feedback`].
//!
//! Evaluators answer in one of three shapes, modelled by [`EvaluatorOutput`].
//! [`normalize`] resolves all of them into a single `Feedback` and never
//! fails: unreadable input becomes [`Feedback::neutral`].

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use super::{clamp_score, Feedback, Issue, QualityMetrics, NEUTRAL_SCORE};

const BASE_TEXT_SCORE: f64 = 70.0;
const POSITIVE_WEIGHT: f64 = 5.0;
const NEGATIVE_WEIGHT: f64 = 10.0;
const TEST_COVERAGE_PENALTY: f64 = 20.0;
const MAX_TEXT_SUGGESTIONS: usize = 5;

const POSITIVE_KEYWORDS: [&str; 6] = ["good", "excellent", "well", "clear", "efficient", "secure"];
const NEGATIVE_KEYWORDS: [&str; 6] = [
    "bad",
    "poor",
    "unclear",
    "inefficient",
    "insecure",
    "complex",
];
const SUGGESTION_KEYWORDS: [&str; 5] = ["suggest", "recommend", "should", "could", "improve"];

/// The shapes an evaluator may answer with.
#[derive(Debug, Clone)]
pub enum EvaluatorOutput {
    /// Typed feedback built by the evaluator itself.
    Structured(Box<Feedback>),
    /// A JSON object carrying `quality_score` and/or `quality_metrics`.
    RawMap(Map<String, Value>),
    /// Free-form review text.
    Text(String),
}

impl EvaluatorOutput {
    /// Classify an arbitrary JSON value.
    ///
    /// Objects with a quality indicator are maps; strings are text; anything
    /// else is rendered to text.
    pub fn classify(value: Value) -> Self {
        match value {
            Value::String(text) => EvaluatorOutput::Text(text),
            Value::Object(map)
                if map.contains_key("quality_score") || map.contains_key("quality_metrics") =>
            {
                EvaluatorOutput::RawMap(map)
            }
            other => EvaluatorOutput::Text(other.to_string()),
        }
    }

    pub fn shape(&self) -> &'static str {
        match self {
            EvaluatorOutput::Structured(_) => "structured",
            EvaluatorOutput::RawMap(_) => "map",
            EvaluatorOutput::Text(_) => "text",
        }
    }
}

impl From<Feedback> for EvaluatorOutput {
    fn from(feedback: Feedback) -> Self {
        EvaluatorOutput::Structured(Box::new(feedback))
    }
}

impl From<Value> for EvaluatorOutput {
    fn from(value: Value) -> Self {
        EvaluatorOutput::classify(value)
    }
}

/// Why an evaluator map could not be read.
#[derive(Debug, Error)]
pub(crate) enum FeedbackParseError {
    #[error("field '{field}' is not numeric")]
    NotNumeric { field: String },

    #[error("field '{field}' is not an object")]
    NotAnObject { field: String },
}

/// Resolve any evaluator output into stamped, clamped feedback.
pub fn normalize(output: EvaluatorOutput, iteration: u32, evaluator: &str) -> Feedback {
    let shape = output.shape();
    let parsed = match output {
        EvaluatorOutput::Structured(feedback) => Ok((*feedback).clamped()),
        EvaluatorOutput::RawMap(map) => from_map(&map),
        EvaluatorOutput::Text(text) => Ok(from_text(&text)),
    };

    match parsed {
        Ok(feedback) => {
            debug!(
                shape,
                iteration,
                evaluator,
                score = feedback.quality_score,
                "normalized evaluator output"
            );
            feedback.stamp(iteration, evaluator)
        }
        Err(e) => {
            warn!(shape, iteration, evaluator, error = %e, "failed to parse evaluator output");
            Feedback::neutral(iteration, evaluator)
        }
    }
}

fn number(map: &Map<String, Value>, field: &str) -> Result<Option<f64>, FeedbackParseError> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(|n| Some(clamp_score(n)))
            .ok_or_else(|| FeedbackParseError::NotNumeric {
                field: field.to_string(),
            }),
    }
}

fn strings(map: &Map<String, Value>, field: &str) -> Vec<String> {
    map.get(field)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn issues(map: &Map<String, Value>) -> Vec<Issue> {
    let Some(items) = map.get("issues").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match serde_json::from_value::<Issue>(item.clone()) {
            Ok(issue) => Some(issue),
            Err(e) => {
                debug!(error = %e, "skipping malformed issue entry");
                None
            }
        })
        .collect()
}

fn metrics(map: &Map<String, Value>) -> Result<QualityMetrics, FeedbackParseError> {
    let raw = match map.get("quality_metrics") {
        None | Some(Value::Null) => return Ok(QualityMetrics::neutral()),
        Some(Value::Object(raw)) => raw,
        Some(_) => {
            return Err(FeedbackParseError::NotAnObject {
                field: "quality_metrics".to_string(),
            })
        }
    };

    let read = |field: &str| number(raw, field).map(|v| v.unwrap_or(NEUTRAL_SCORE));
    Ok(QualityMetrics {
        complexity: read("complexity_score")?,
        maintainability: read("maintainability_score")?,
        readability: read("readability_score")?,
        test_coverage: read("test_coverage")?,
        performance: read("performance_score")?,
        security: read("security_score")?,
    })
}

fn from_map(map: &Map<String, Value>) -> Result<Feedback, FeedbackParseError> {
    let metrics = metrics(map)?;
    let score = number(map, "quality_score")?.unwrap_or_else(|| metrics.overall());

    let mut feedback = Feedback::new(score, metrics);
    feedback.suggestions = strings(map, "suggestions");
    feedback.positives = strings(map, "positive_aspects");
    feedback.issues = issues(map);
    Ok(feedback)
}

/// Keyword heuristic for free-form review text.
pub(crate) fn text_score(text: &str) -> f64 {
    let lower = text.to_lowercase();
    let positive = POSITIVE_KEYWORDS
        .iter()
        .filter(|k| lower.contains(*k))
        .count() as f64;
    let negative = NEGATIVE_KEYWORDS
        .iter()
        .filter(|k| lower.contains(*k))
        .count() as f64;
    clamp_score(BASE_TEXT_SCORE + positive * POSITIVE_WEIGHT - negative * NEGATIVE_WEIGHT)
}

fn text_suggestions(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| {
            let lower = line.to_lowercase();
            SUGGESTION_KEYWORDS.iter().any(|k| lower.contains(k))
        })
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .take(MAX_TEXT_SUGGESTIONS)
        .collect()
}

fn from_text(text: &str) -> Feedback {
    let score = text_score(text);
    let mut metrics = QualityMetrics::uniform(score);
    metrics.test_coverage = (score - TEST_COVERAGE_PENALTY).max(0.0);

    let mut feedback = Feedback::new(score, metrics);
    feedback.suggestions = text_suggestions(text);
    feedback
}
