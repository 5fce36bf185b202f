//! Dangerous construct detection in guest script text.
//!
//! Blocks (unless the policy grants the matching keyword):
//! - eval calls
//! - dynamic Function construction
//! - string-argument timers
//! - inline event attributes inside markup literals
//!
//! Warns about:
//! - event handler property assignment
//! - document.write / document.writeln
//! - innerHTML / outerHTML assignment
//! - javascript: URLs

use super::csp::{CspDirective, CspPolicy, UNSAFE_EVAL, UNSAFE_INLINE};
use super::types::{CspReport, CspViolation, CspWarning, Severity};
use regex::Regex;
use std::sync::LazyLock;

/// Pattern for eval calls
static EVAL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\beval\s*\("#).unwrap());

/// Pattern for dynamic function construction
static FUNCTION_CONSTRUCTOR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\bnew\s+Function\s*\("#).unwrap());

/// Pattern for timers scheduled with a code string
static STRING_TIMER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(setTimeout|setInterval)\s*\(\s*["'`]"#).unwrap()
});

/// Pattern for on* attributes inside a markup literal
static INLINE_EVENT_ATTR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<[a-z][^>]*\s(on[a-z]+)\s*="#).unwrap()
});

/// Pattern for handler property assignment (el.onclick = ...)
static HANDLER_PROPERTY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\.(on[a-z]+)\s*=[^=]"#).unwrap());

/// Pattern for legacy document writes
static DOCUMENT_WRITE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\bdocument\.write(ln)?\s*\("#).unwrap());

/// Pattern for raw markup injection
static INNER_HTML_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\.(innerHTML|outerHTML)\s*=[^=]"#).unwrap());

/// Pattern for javascript: URLs
static JAVASCRIPT_URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)javascript\s*:"#).unwrap());

/// Check script text against the policy's script-src rules
pub fn check_script(script: &str, policy: &CspPolicy) -> CspReport {
    let mut violations = Vec::new();
    let mut warnings = Vec::new();

    let allows_eval = policy.allows_keyword(CspDirective::ScriptSrc, UNSAFE_EVAL);
    let allows_inline = policy.allows_keyword(CspDirective::ScriptSrc, UNSAFE_INLINE);

    let eval_checks: [(&Regex, &str, Severity); 3] = [
        (
            &EVAL_PATTERN,
            "eval() is not allowed - potential code injection",
            Severity::High,
        ),
        (
            &FUNCTION_CONSTRUCTOR_PATTERN,
            "new Function() is not allowed - dynamic code construction",
            Severity::High,
        ),
        (
            &STRING_TIMER_PATTERN,
            "setTimeout/setInterval with a code string is not allowed",
            Severity::Medium,
        ),
    ];

    for (pattern, reason, severity) in eval_checks {
        if let Some(found) = pattern.find(script) {
            if allows_eval {
                warnings.push(CspWarning::new(format!(
                    "{} (permitted by 'unsafe-eval')",
                    reason
                )));
            } else {
                violations.push(CspViolation::new(
                    CspDirective::ScriptSrc,
                    found.as_str(),
                    reason,
                    severity,
                ));
            }
        }
    }

    if let Some(captures) = INLINE_EVENT_ATTR_PATTERN.captures(script) {
        let attr = captures.get(1).map(|m| m.as_str()).unwrap_or("on*");
        if allows_inline {
            warnings.push(CspWarning::new(format!(
                "Markup contains inline '{}' handler (permitted by 'unsafe-inline')",
                attr
            )));
        } else {
            violations.push(CspViolation::new(
                CspDirective::ScriptSrc,
                attr,
                format!("Inline event attribute '{}' is not allowed", attr),
                Severity::High,
            ));
        }
    }

    if let Some(captures) = HANDLER_PROPERTY_PATTERN.captures(script) {
        let prop = captures.get(1).map(|m| m.as_str()).unwrap_or("on*");
        warnings.push(CspWarning::with_suggestion(
            format!("Script assigns inline event handler '{}'", prop),
            "Use addEventListener instead",
        ));
    }

    if DOCUMENT_WRITE_PATTERN.is_match(script) {
        warnings.push(CspWarning::with_suggestion(
            "Script uses document.write",
            "Build nodes through the render protocol instead",
        ));
    }

    if let Some(captures) = INNER_HTML_PATTERN.captures(script) {
        let prop = captures.get(1).map(|m| m.as_str()).unwrap_or("innerHTML");
        warnings.push(CspWarning::new(format!(
            "Script assigns raw markup through '{}'",
            prop
        )));
    }

    if JAVASCRIPT_URL_PATTERN.is_match(script) {
        warnings.push(CspWarning::new("Script contains a javascript: URL"));
    }

    CspReport::new(violations, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_check(script: &str) -> CspReport {
        check_script(script, &CspPolicy::default())
    }

    #[test]
    fn test_eval_is_single_high_violation() {
        let report = default_check("eval('x')");
        assert!(!report.valid);
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].severity, Severity::High);
        assert_eq!(report.violations[0].directive, CspDirective::ScriptSrc);
    }

    #[test]
    fn test_function_constructor_and_string_timer() {
        let report = default_check("const f = new Function('return 1'); setTimeout(\"f()\", 10);");
        assert_eq!(report.violations.len(), 2);
        assert_eq!(report.max_severity(), Some(Severity::High));
    }

    #[test]
    fn test_function_timer_is_fine() {
        let report = default_check("setTimeout(() => render(), 10); const evaluate = 1;");
        assert!(report.valid);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_unsafe_eval_demotes_to_warning() {
        let policy = CspPolicy::builder()
            .directive(CspDirective::ScriptSrc, ["'self'", UNSAFE_EVAL])
            .build();
        let report = check_script("eval('1 + 1')", &policy);
        assert!(report.valid);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_inline_event_attribute_in_markup() {
        let report = default_check(r#"el.innerHTML = '<img src="x" onerror="steal()">';"#);
        assert!(!report.valid);
        assert_eq!(report.violations[0].blocked_value, "onerror");
        // innerHTML assignment is a warning on top
        assert!(!report.warnings.is_empty());
    }

    #[test]
    fn test_warnings_only() {
        let report = default_check("button.onclick = go; document.write('hi');");
        assert!(report.valid);
        assert_eq!(report.warnings.len(), 2);
    }
}
