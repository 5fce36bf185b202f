//! Types for content policy validation

use super::csp::CspDirective;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Severity level of a policy violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Low severity - informational
    Low,
    /// Medium severity - potential issue
    Medium,
    /// High severity - security concern
    High,
    /// Critical severity - must be blocked
    Critical,
}

impl Severity {
    /// Get a human-readable name
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// Content blocked by the policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CspViolation {
    /// Directive that blocked the content
    pub directive: CspDirective,
    /// The offending value (URL or matched source fragment)
    pub blocked_value: String,
    /// Human-readable reason
    pub reason: String,
    pub severity: Severity,
}

impl CspViolation {
    pub fn new(
        directive: CspDirective,
        blocked_value: impl Into<String>,
        reason: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            directive,
            blocked_value: blocked_value.into(),
            reason: reason.into(),
            severity,
        }
    }
}

/// Suspicious but permitted content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CspWarning {
    /// Warning message
    pub message: String,
    /// Optional suggestion for fixing
    pub suggestion: Option<String>,
}

impl CspWarning {
    /// Create a new warning
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestion: None,
        }
    }

    /// Create a warning with a suggestion
    pub fn with_suggestion(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestion: Some(suggestion.into()),
        }
    }
}

/// Result of a policy check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CspReport {
    /// Whether no violation was found
    pub valid: bool,
    pub violations: Vec<CspViolation>,
    pub warnings: Vec<CspWarning>,
}

impl CspReport {
    /// Build a report; validity is derived from the violation list
    pub fn new(violations: Vec<CspViolation>, warnings: Vec<CspWarning>) -> Self {
        Self {
            valid: violations.is_empty(),
            violations,
            warnings,
        }
    }

    /// A passing report with no findings
    pub fn pass() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    /// Fold another report into this one
    pub fn merge(&mut self, other: CspReport) {
        self.violations.extend(other.violations);
        self.warnings.extend(other.warnings);
        self.valid = self.violations.is_empty();
    }

    /// Highest severity among the violations
    pub fn max_severity(&self) -> Option<Severity> {
        self.violations.iter().map(|v| v.severity).max()
    }
}

/// Raised instead of returning a failing report when `throw_on_violation` is set
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Content policy violation: {}", summarize(.violations))]
pub struct PolicyViolation {
    /// Every violation found by the failing check
    pub violations: Vec<CspViolation>,
}

fn summarize(violations: &[CspViolation]) -> String {
    match violations {
        [] => "no details".to_string(),
        [only] => format!("{} ({})", only.reason, only.directive),
        [first, rest @ ..] => format!(
            "{} ({}) and {} more",
            first.reason,
            first.directive,
            rest.len()
        ),
    }
}
