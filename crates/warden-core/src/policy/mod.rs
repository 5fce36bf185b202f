//! Content policy validation
//!
//! A CSP-style allow-list evaluated before guest content reaches the host:
//!
//! - script text is scanned for dynamic code construction and inline handlers
//! - URLs are matched against the source list of the directive that loads them
//! - inline style text is scanned for script-bearing CSS
//!
//! The validator holds only its immutable configuration, so one instance can be
//! shared across sessions behind an `Arc`.

mod csp;
mod script_check;
mod style_check;
mod types;
mod url_match;

pub use csp::{CspDirective, CspPolicy, CspPolicyBuilder, NONE, SELF, UNSAFE_EVAL, UNSAFE_INLINE};
pub use script_check::check_script;
pub use style_check::check_inline_style;
pub use types::{CspReport, CspViolation, CspWarning, PolicyViolation, Severity};

use crate::error::SandboxError;
use serde::{Deserialize, Serialize};
use url::{ParseError, Url};
use url_match::UrlMatcher;

/// Configuration for the policy validator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CspConfig {
    /// Directive source lists
    pub policy: CspPolicy,
    /// Return `Err(PolicyViolation)` instead of a failing report
    pub throw_on_violation: bool,
    /// Origin that `'self'` refers to; loopback only when unset
    pub self_origin: Option<String>,
    /// Emit a warning log line per violation
    pub log_violations: bool,
}

impl Default for CspConfig {
    fn default() -> Self {
        Self {
            policy: CspPolicy::default(),
            throw_on_violation: false,
            self_origin: None,
            log_violations: true,
        }
    }
}

impl CspConfig {
    /// Parse the configured self origin
    pub fn parsed_self_origin(&self) -> Result<Option<Url>, SandboxError> {
        self.self_origin
            .as_deref()
            .map(|origin| {
                Url::parse(origin).map_err(|e| {
                    SandboxError::invalid_config(format!(
                        "invalid self origin '{}': {}",
                        origin, e
                    ))
                })
            })
            .transpose()
    }
}

/// Stateless policy checks over script, URL, style and markup attribute input
#[derive(Debug, Clone)]
pub struct PolicyValidator {
    config: CspConfig,
    self_origin: Option<Url>,
    matcher: UrlMatcher,
}

impl PolicyValidator {
    /// Build a validator; malformed sources or self origin fail here
    pub fn new(config: CspConfig) -> Result<Self, SandboxError> {
        let self_origin = config.parsed_self_origin()?;
        let matcher = UrlMatcher::new(&config.policy, self_origin.as_ref())?;
        Ok(Self {
            config,
            self_origin,
            matcher,
        })
    }

    /// Validator over a policy with default settings
    pub fn with_policy(policy: CspPolicy) -> Result<Self, SandboxError> {
        Self::new(CspConfig {
            policy,
            ..CspConfig::default()
        })
    }

    pub fn policy(&self) -> &CspPolicy {
        &self.config.policy
    }

    pub fn config(&self) -> &CspConfig {
        &self.config
    }

    /// Scan script text for constructs blocked by `script-src`
    pub fn validate_script(&self, script: &str) -> Result<CspReport, PolicyViolation> {
        self.finish(check_script(script, &self.config.policy))
    }

    /// Check a URL against the source list governing `directive`
    pub fn validate_url(
        &self,
        url: &str,
        directive: CspDirective,
    ) -> Result<CspReport, PolicyViolation> {
        self.finish(self.matcher.check(url, directive))
    }

    /// Scan inline style text against `style-src`
    pub fn validate_inline_style(&self, style: &str) -> Result<CspReport, PolicyViolation> {
        self.finish(check_inline_style(style, &self.config.policy))
    }

    /// Check the attributes a renderer is about to apply to an element
    ///
    /// URL-bearing attributes are matched against the directive that would load
    /// them, `style` goes through the inline style rules and any `on*` attribute
    /// is rejected outright.
    pub fn validate_markup_attributes<'a, I>(
        &self,
        tag: &str,
        attributes: I,
    ) -> Result<CspReport, PolicyViolation>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let tag = tag.to_ascii_lowercase();
        let mut report = CspReport::pass();

        for (name, value) in attributes {
            let name = name.to_ascii_lowercase();

            if name.starts_with("on") && name.len() > 2 {
                report.merge(CspReport::new(
                    vec![CspViolation::new(
                        CspDirective::ScriptSrc,
                        name.as_str(),
                        format!("Inline event attribute '{}' is not allowed", name),
                        Severity::High,
                    )],
                    Vec::new(),
                ));
                continue;
            }

            if name == "style" {
                report.merge(check_inline_style(value, &self.config.policy));
                continue;
            }

            // Any attribute a renderer may treat as a URL, mapped or not
            if is_script_url(value) {
                report.merge(CspReport::new(
                    vec![CspViolation::new(
                        CspDirective::ScriptSrc,
                        value,
                        format!("javascript: URL is not allowed in '{}'", name),
                        Severity::High,
                    )],
                    Vec::new(),
                ));
                continue;
            }

            if let Some(directive) = directive_for_attribute(&tag, &name) {
                report.merge(self.check_attribute_url(value, directive));
            }
        }

        self.finish(report)
    }

    fn check_attribute_url(&self, value: &str, directive: CspDirective) -> CspReport {
        let value = value.trim();
        match Url::parse(value) {
            Ok(_) => self.matcher.check(value, directive),
            // Relative references resolve against the document's own origin
            Err(ParseError::RelativeUrlWithoutBase) => match &self.self_origin {
                Some(base) => match base.join(value) {
                    Ok(resolved) => self.matcher.check(resolved.as_str(), directive),
                    Err(_) => self.matcher.check(value, directive),
                },
                None => CspReport::pass(),
            },
            Err(_) => self.matcher.check(value, directive),
        }
    }

    fn finish(&self, report: CspReport) -> Result<CspReport, PolicyViolation> {
        if self.config.log_violations {
            for violation in &report.violations {
                tracing::warn!(
                    directive = %violation.directive,
                    blocked = %violation.blocked_value,
                    severity = violation.severity.as_str(),
                    "CSP violation: {}",
                    violation.reason
                );
            }
        }

        if self.config.throw_on_violation && !report.valid {
            return Err(PolicyViolation {
                violations: report.violations,
            });
        }
        Ok(report)
    }
}

/// `javascript:` scheme as a browser would read it
///
/// Browsers drop leading control characters and spaces and ignore tabs and
/// newlines inside the scheme, so all of them are stripped before comparing.
fn is_script_url(value: &str) -> bool {
    const SCHEME: &str = "javascript:";
    let mut scheme = value
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .take(SCHEME.len());
    SCHEME
        .chars()
        .all(|expected| scheme.next().is_some_and(|c| c.eq_ignore_ascii_case(&expected)))
}

/// Fetch directive that governs a URL-bearing attribute
///
/// Navigation targets (`a`/`area` `href`, `xlink:href`) load nothing into the
/// document, so only the script-scheme check applies to them.
fn directive_for_attribute(tag: &str, attribute: &str) -> Option<CspDirective> {
    let directive = match (tag, attribute) {
        ("img", "src" | "srcset") | (_, "poster") => CspDirective::ImgSrc,
        ("script", "src") => CspDirective::ScriptSrc,
        ("iframe" | "frame", "src") => CspDirective::FrameSrc,
        ("video" | "audio" | "source" | "track", "src") => CspDirective::MediaSrc,
        ("object", "data") | ("embed", "src") => CspDirective::ObjectSrc,
        ("link", "href") => CspDirective::StyleSrc,
        ("base", "href") => CspDirective::BaseUri,
        ("form", "action") | (_, "formaction") => CspDirective::FormAction,
        (_, "ping") => CspDirective::ConnectSrc,
        _ => return None,
    };
    Some(directive)
}
