//! Pre-flight heuristics for free-text development requests.

use crate::agent::ValidationResult;

const MIN_CHARS: usize = 10;
const MAX_CHARS: usize = 5000;
const MIN_WORDS: usize = 5;

const ACTION_WORDS: &[&str] = &["create", "build", "develop"];

const TECH_KEYWORDS: &[&str] = &[
    "api", "app", "application", "backend", "cli", "database", "frontend", "function",
    "library", "python", "rest", "rust", "script", "server", "service", "web",
];

/// Judge whether `request` is actionable before starting a run.
///
/// Only an empty request is invalid; everything else yields warnings or
/// suggestions.
pub fn validate_request(request: &str) -> ValidationResult {
    let trimmed = request.trim();
    if trimmed.is_empty() {
        return ValidationResult::invalid("request is empty");
    }

    let mut result = ValidationResult::ok();
    let chars = trimmed.chars().count();
    if chars < MIN_CHARS {
        result = result.warn("request is very short; add more detail");
    }
    if chars > MAX_CHARS {
        result = result.warn(format!("request is longer than {MAX_CHARS} characters"));
    }

    let lower = trimmed.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    if !ACTION_WORDS.iter().any(|a| lower.contains(a)) {
        result = result.suggest("state what to do, e.g. \"create\", \"build\" or \"develop\"");
    }
    if !words.iter().any(|w| TECH_KEYWORDS.contains(w)) {
        result = result.suggest("name the kind of software or technology involved");
    }
    if words.len() < MIN_WORDS {
        result = result.suggest("describe the expected behavior in a full sentence");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_request_is_invalid() {
        let result = validate_request("   ");
        assert!(!result.ok);
        assert_eq!(result.warnings, vec!["request is empty"]);
    }

    #[test]
    fn complete_request_has_no_notes() {
        let result = validate_request("Create a REST API service that stores todo items");
        assert!(result.ok);
        assert!(result.warnings.is_empty());
        assert!(result.suggestions.is_empty());
    }

    #[test]
    fn terse_request_collects_suggestions() {
        let result = validate_request("todo");
        assert!(result.ok);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.suggestions.len(), 3);
    }

    #[test]
    fn oversized_request_warns() {
        let long = format!("build a web app {}", "x ".repeat(MAX_CHARS));
        let result = validate_request(&long);
        assert!(result.warnings.iter().any(|w| w.contains("5000")));
    }
}
