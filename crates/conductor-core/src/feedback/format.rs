//! Plain-text rendering of feedback for the next improver iteration.

use std::fmt::Write;

use super::Feedback;

/// Render feedback as the review text handed back to the improver.
pub fn format_for_agent(feedback: &Feedback) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail.
    let _ = write_feedback(&mut out, feedback);
    out
}

fn write_feedback(out: &mut String, feedback: &Feedback) -> std::fmt::Result {
    writeln!(
        out,
        "Code Review Feedback (Quality Score: {:.1}/100)",
        feedback.quality_score
    )?;
    writeln!(out)?;

    if !feedback.positives.is_empty() {
        writeln!(out, "Positive Aspects:")?;
        for positive in &feedback.positives {
            writeln!(out, "  - {positive}")?;
        }
        writeln!(out)?;
    }

    if !feedback.issues.is_empty() {
        let mut issues: Vec<_> = feedback.issues.iter().collect();
        issues.sort_by_key(|i| i.severity);

        writeln!(out, "Issues to Address:")?;
        for issue in issues {
            write!(
                out,
                "  [{}] [{}] {}",
                issue.severity.as_str().to_uppercase(),
                issue.kind.as_str().to_uppercase(),
                issue.message
            )?;
            if let Some(line) = issue.line_number {
                write!(out, " (line {line})")?;
            }
            writeln!(out)?;
            if let Some(suggestion) = &issue.suggestion {
                writeln!(out, "    Suggestion: {suggestion}")?;
            }
            if let Some(snippet) = &issue.code_snippet {
                writeln!(out, "    Code: {snippet}")?;
            }
        }
        writeln!(out)?;
    }

    if !feedback.suggestions.is_empty() {
        writeln!(out, "General Suggestions:")?;
        for suggestion in &feedback.suggestions {
            writeln!(out, "  - {suggestion}")?;
        }
        writeln!(out)?;
    }

    let m = &feedback.metrics;
    writeln!(out, "Quality Metrics:")?;
    writeln!(out, "  - Complexity: {:.1}/100", m.complexity)?;
    writeln!(out, "  - Maintainability: {:.1}/100", m.maintainability)?;
    writeln!(out, "  - Readability: {:.1}/100", m.readability)?;
    writeln!(out, "  - Test Coverage: {:.1}%", m.test_coverage)?;
    writeln!(out, "  - Performance: {:.1}/100", m.performance)?;
    writeln!(out, "  - Security: {:.1}/100", m.security)?;
    Ok(())
}
