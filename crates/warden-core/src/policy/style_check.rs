//! Inline style checks

use super::csp::{CspDirective, CspPolicy, UNSAFE_INLINE};
use super::types::{CspReport, CspViolation, CspWarning, Severity};
use regex::Regex;
use std::sync::LazyLock;

/// Legacy IE CSS expressions execute script
static EXPRESSION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)expression\s*\("#).unwrap());

/// url(javascript:...)
static JAVASCRIPT_URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)url\s*\(\s*["']?\s*javascript\s*:"#).unwrap()
});

/// XBL bindings
static MOZ_BINDING_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)-moz-binding\s*:"#).unwrap());

static IMPORT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)@import\b"#).unwrap());

static BEHAVIOR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bbehavior\s*:"#).unwrap());

/// Check inline style text against the policy's style-src rules
pub fn check_inline_style(style: &str, policy: &CspPolicy) -> CspReport {
    let mut violations = Vec::new();
    let mut warnings = Vec::new();

    if !policy.allows_keyword(CspDirective::StyleSrc, UNSAFE_INLINE) {
        violations.push(CspViolation::new(
            CspDirective::StyleSrc,
            "inline",
            "Inline styles are not allowed by style-src",
            Severity::Medium,
        ));
    }

    let blocking: [(&Regex, &str, Severity); 3] = [
        (
            &EXPRESSION_PATTERN,
            "CSS expression() is not allowed - executes script",
            Severity::High,
        ),
        (
            &JAVASCRIPT_URL_PATTERN,
            "javascript: URLs are not allowed in styles",
            Severity::High,
        ),
        (
            &MOZ_BINDING_PATTERN,
            "-moz-binding is not allowed",
            Severity::Medium,
        ),
    ];

    for (pattern, reason, severity) in blocking {
        if let Some(found) = pattern.find(style) {
            violations.push(CspViolation::new(
                CspDirective::StyleSrc,
                found.as_str(),
                reason,
                severity,
            ));
        }
    }

    if IMPORT_PATTERN.is_match(style) {
        warnings.push(CspWarning::with_suggestion(
            "Style uses @import",
            "Imported stylesheets are fetched outside the render protocol",
        ));
    }

    if BEHAVIOR_PATTERN.is_match(style) {
        warnings.push(CspWarning::new("Style uses the legacy behavior property"));
    }

    CspReport::new(violations, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_style_passes() {
        let report = check_inline_style("color: red; margin: 0 auto;", &CspPolicy::default());
        assert!(report.valid);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_expression_blocked() {
        let report = check_inline_style(
            "width: expression(alert(1))",
            &CspPolicy::default(),
        );
        assert!(!report.valid);
        assert_eq!(report.violations[0].severity, Severity::High);
    }

    #[test]
    fn test_javascript_url_blocked() {
        let report = check_inline_style(
            "background: url('javascript:alert(1)')",
            &CspPolicy::default(),
        );
        assert_eq!(report.violations.len(), 1);
    }

    #[test]
    fn test_import_warns() {
        let report = check_inline_style("@import url(theme.css);", &CspPolicy::default());
        assert!(report.valid);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_strict_policy_blocks_inline_styles() {
        let report = check_inline_style("color: red", &CspPolicy::strict());
        assert!(!report.valid);
        assert_eq!(report.violations[0].directive, CspDirective::StyleSrc);
    }
}
