//! Evaluator feedback for iterative improve/evaluate loops.
//!
//! # Module layout
//!
//! - this module: [`Feedback`], [`QualityMetrics`], [`Issue`] and friends
//! - [`normalize`]: [`EvaluatorOutput`] and the shape → `Feedback` conversion
//! - [`format`]: plain-text rendering handed back to the improver

pub mod format;
pub mod normalize;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use format::format_for_agent;
pub use normalize::{normalize, EvaluatorOutput};

/// Lower and upper bound of every score.
pub const SCORE_MIN: f64 = 0.0;
pub const SCORE_MAX: f64 = 100.0;

/// Score used whenever a value is missing or unreadable.
pub const NEUTRAL_SCORE: f64 = 50.0;

/// Clamp a score into `[0, 100]`. NaN maps to the neutral score.
pub fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        return NEUTRAL_SCORE;
    }
    value.clamp(SCORE_MIN, SCORE_MAX)
}

/// Area of the output an issue refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    CodeQuality,
    Functionality,
    Performance,
    Security,
    Maintainability,
    Style,
}

impl FeedbackKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedbackKind::CodeQuality => "code_quality",
            FeedbackKind::Functionality => "functionality",
            FeedbackKind::Performance => "performance",
            FeedbackKind::Security => "security",
            FeedbackKind::Maintainability => "maintainability",
            FeedbackKind::Style => "style",
        }
    }
}

/// Severity of an issue, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }
}

/// One concrete problem found by an evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(rename = "type")]
    pub kind: FeedbackKind,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl Issue {
    pub fn new(kind: FeedbackKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
            line_number: None,
            code_snippet: None,
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// The six sub-metric scores every feedback carries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    #[serde(rename = "complexity_score")]
    pub complexity: f64,
    #[serde(rename = "maintainability_score")]
    pub maintainability: f64,
    #[serde(rename = "readability_score")]
    pub readability: f64,
    pub test_coverage: f64,
    #[serde(rename = "performance_score")]
    pub performance: f64,
    #[serde(rename = "security_score")]
    pub security: f64,
}

impl QualityMetrics {
    /// Metric names as they appear on the wire, in declaration order.
    pub const FIELDS: [&'static str; 6] = [
        "complexity_score",
        "maintainability_score",
        "readability_score",
        "test_coverage",
        "performance_score",
        "security_score",
    ];

    /// All six metrics set to the same value.
    pub fn uniform(score: f64) -> Self {
        let score = clamp_score(score);
        Self {
            complexity: score,
            maintainability: score,
            readability: score,
            test_coverage: score,
            performance: score,
            security: score,
        }
    }

    pub fn neutral() -> Self {
        Self::uniform(NEUTRAL_SCORE)
    }

    fn values(&self) -> [f64; 6] {
        [
            self.complexity,
            self.maintainability,
            self.readability,
            self.test_coverage,
            self.performance,
            self.security,
        ]
    }

    /// Mean of the six metrics.
    pub fn overall(&self) -> f64 {
        clamp_score(self.values().iter().sum::<f64>() / 6.0)
    }

    pub fn clamped(self) -> Self {
        Self {
            complexity: clamp_score(self.complexity),
            maintainability: clamp_score(self.maintainability),
            readability: clamp_score(self.readability),
            test_coverage: clamp_score(self.test_coverage),
            performance: clamp_score(self.performance),
            security: clamp_score(self.security),
        }
    }
}

impl Default for QualityMetrics {
    fn default() -> Self {
        Self::neutral()
    }
}

/// An evaluator's verdict on one iteration's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub quality_score: f64,
    #[serde(rename = "quality_metrics")]
    pub metrics: QualityMetrics,
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default, rename = "positive_aspects")]
    pub positives: Vec<String>,
    #[serde(default)]
    pub iteration: u32,
    #[serde(default)]
    pub evaluator: String,
    pub created_at: DateTime<Utc>,
}

impl Feedback {
    pub fn new(quality_score: f64, metrics: QualityMetrics) -> Self {
        Self {
            quality_score: clamp_score(quality_score),
            metrics: metrics.clamped(),
            issues: Vec::new(),
            suggestions: Vec::new(),
            positives: Vec::new(),
            iteration: 0,
            evaluator: String::new(),
            created_at: Utc::now(),
        }
    }

    /// Feedback built from the metric average.
    pub fn from_metrics(metrics: QualityMetrics) -> Self {
        Self::new(metrics.overall(), metrics)
    }

    /// Fallback used when an evaluator's output cannot be read.
    pub fn neutral(iteration: u32, evaluator: &str) -> Self {
        let mut feedback = Self::new(NEUTRAL_SCORE, QualityMetrics::neutral());
        feedback.suggestions = vec!["Unable to parse detailed feedback".to_string()];
        feedback.stamp(iteration, evaluator)
    }

    /// Attach provenance and refresh the timestamp.
    pub fn stamp(mut self, iteration: u32, evaluator: &str) -> Self {
        self.iteration = iteration;
        self.evaluator = evaluator.to_string();
        self.created_at = Utc::now();
        self
    }

    pub fn with_issue(mut self, issue: Issue) -> Self {
        self.issues.push(issue);
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_positive(mut self, positive: impl Into<String>) -> Self {
        self.positives.push(positive.into());
        self
    }

    pub fn meets_threshold(&self, threshold: f64) -> bool {
        self.quality_score >= clamp_score(threshold)
    }

    pub fn critical_issues(&self) -> Vec<&Issue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Critical)
            .collect()
    }

    /// Enforce score bounds on a value that came from outside.
    pub fn clamped(mut self) -> Self {
        self.quality_score = clamp_score(self.quality_score);
        self.metrics = self.metrics.clamped();
        self
    }

    /// Combine several verdicts into one.
    ///
    /// Scores and metrics are averaged, issues concatenated, suggestions and
    /// positives de-duplicated in first-seen order. An empty slice yields a
    /// zero score.
    pub fn aggregate(feedback: &[Feedback]) -> Feedback {
        if feedback.is_empty() {
            return Feedback::new(0.0, QualityMetrics::uniform(0.0)).stamp(0, "aggregated");
        }

        let n = feedback.len() as f64;
        let mean = |f: fn(&Feedback) -> f64| feedback.iter().map(f).sum::<f64>() / n;

        let metrics = QualityMetrics {
            complexity: mean(|f| f.metrics.complexity),
            maintainability: mean(|f| f.metrics.maintainability),
            readability: mean(|f| f.metrics.readability),
            test_coverage: mean(|f| f.metrics.test_coverage),
            performance: mean(|f| f.metrics.performance),
            security: mean(|f| f.metrics.security),
        };

        let mut aggregated = Feedback::new(mean(|f| f.quality_score), metrics);
        aggregated.issues = feedback.iter().flat_map(|f| f.issues.clone()).collect();
        aggregated.suggestions = dedup(feedback.iter().flat_map(|f| f.suggestions.iter()));
        aggregated.positives = dedup(feedback.iter().flat_map(|f| f.positives.iter()));
        aggregated.stamp(feedback.iter().map(|f| f.iteration).max().unwrap_or(0), "aggregated")
    }
}

fn dedup<'a>(items: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for item in items {
        if seen.insert(item.clone()) {
            out.push(item.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_handles_out_of_range_and_nan() {
        assert_eq!(clamp_score(-4.0), 0.0);
        assert_eq!(clamp_score(140.0), 100.0);
        assert_eq!(clamp_score(f64::NAN), NEUTRAL_SCORE);
        assert_eq!(clamp_score(42.5), 42.5);
    }

    #[test]
    fn overall_is_mean_of_metrics() {
        let metrics = QualityMetrics {
            complexity: 60.0,
            maintainability: 80.0,
            readability: 70.0,
            test_coverage: 40.0,
            performance: 90.0,
            security: 80.0,
        };
        assert!((metrics.overall() - 70.0).abs() < f64::EPSILON);
        assert_eq!(Feedback::from_metrics(metrics).quality_score, 70.0);
    }

    #[test]
    fn new_clamps_inputs() {
        let feedback = Feedback::new(120.0, QualityMetrics::uniform(-5.0));
        assert_eq!(feedback.quality_score, 100.0);
        assert_eq!(feedback.metrics.security, 0.0);
    }

    #[test]
    fn critical_issues_filters_by_severity() {
        let feedback = Feedback::new(40.0, QualityMetrics::neutral())
            .with_issue(Issue::new(
                FeedbackKind::Security,
                Severity::Critical,
                "SQL built from user input",
            ))
            .with_issue(Issue::new(FeedbackKind::Style, Severity::Low, "long line"));

        let critical = feedback.critical_issues();
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].kind, FeedbackKind::Security);
    }

    #[test]
    fn meets_threshold_is_inclusive() {
        let feedback = Feedback::new(85.0, QualityMetrics::neutral());
        assert!(feedback.meets_threshold(85.0));
        assert!(!feedback.meets_threshold(85.1));
        assert!(feedback.meets_threshold(-10.0));
    }

    #[test]
    fn aggregate_averages_and_dedups() {
        let a = Feedback::new(60.0, QualityMetrics::uniform(60.0))
            .with_suggestion("add tests")
            .with_positive("clear names");
        let b = Feedback::new(80.0, QualityMetrics::uniform(80.0))
            .with_suggestion("add tests")
            .with_suggestion("split main")
            .with_issue(Issue::new(FeedbackKind::Functionality, Severity::High, "crash"));

        let agg = Feedback::aggregate(&[a, b]);
        assert_eq!(agg.quality_score, 70.0);
        assert_eq!(agg.metrics.readability, 70.0);
        assert_eq!(agg.suggestions, vec!["add tests", "split main"]);
        assert_eq!(agg.positives, vec!["clear names"]);
        assert_eq!(agg.issues.len(), 1);
        assert_eq!(agg.evaluator, "aggregated");
    }

    #[test]
    fn aggregate_of_nothing_is_zero() {
        let agg = Feedback::aggregate(&[]);
        assert_eq!(agg.quality_score, 0.0);
        assert_eq!(agg.metrics.overall(), 0.0);
    }

    #[test]
    fn serializes_with_wire_names() {
        let feedback = Feedback::neutral(2, "code_reviewer");
        let value = serde_json::to_value(&feedback).unwrap();
        assert_eq!(value["quality_metrics"]["complexity_score"], 50.0);
        assert_eq!(value["iteration"], 2);
        assert!(value.get("positive_aspects").is_some());
    }
}
