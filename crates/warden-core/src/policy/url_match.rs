//! Source-list matching for URLs

use super::csp::{CspDirective, CspPolicy, NONE, SELF};
use super::types::{CspReport, CspViolation, Severity};
use crate::error::SandboxError;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use url::{Host, Origin, Url};

/// `https:`, `data:`, `wss:` ...
static SCHEME_SOURCE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.\-]*:$").unwrap());

/// Characters a host wildcard may expand to
const HOST_WILDCARD: &str = "[^/?#:@]*";

/// One entry of a directive's source list, compiled once
#[derive(Debug, Clone)]
enum CompiledSource {
    SelfOrigin,
    None,
    /// Keywords without URL meaning ('unsafe-inline', nonces, ...)
    Keyword,
    Wildcard,
    Scheme(String),
    Origin { origin: Origin, path: Option<String> },
    Glob(Regex),
}

impl CompiledSource {
    fn compile(token: &str) -> Result<Self, SandboxError> {
        if token.is_empty() || token.chars().any(char::is_whitespace) {
            return Err(SandboxError::invalid_config(format!(
                "invalid CSP source '{}'",
                token
            )));
        }

        if token == SELF {
            return Ok(CompiledSource::SelfOrigin);
        }
        if token == NONE {
            return Ok(CompiledSource::None);
        }
        if token.starts_with('\'') {
            return Ok(CompiledSource::Keyword);
        }
        if token == "*" {
            return Ok(CompiledSource::Wildcard);
        }
        if SCHEME_SOURCE_PATTERN.is_match(token) {
            let scheme = token.trim_end_matches(':').to_ascii_lowercase();
            return Ok(CompiledSource::Scheme(scheme));
        }

        if !token.contains('*') && token.contains("://") {
            let url = Url::parse(token).map_err(|e| {
                SandboxError::invalid_config(format!("invalid CSP source '{}': {}", token, e))
            })?;
            let path = match url.path() {
                "" | "/" => None,
                p => Some(p.to_string()),
            };
            return Ok(CompiledSource::Origin {
                origin: url.origin(),
                path,
            });
        }

        glob_to_regex(token).map(CompiledSource::Glob)
    }

    fn matches(&self, url: &Url, self_origin: Option<&Origin>) -> bool {
        match self {
            CompiledSource::SelfOrigin => match self_origin {
                Some(origin) => &url.origin() == origin,
                None => is_loopback(url),
            },
            CompiledSource::None | CompiledSource::Keyword => false,
            CompiledSource::Wildcard => true,
            CompiledSource::Scheme(scheme) => url.scheme() == scheme,
            CompiledSource::Origin { origin, path } => {
                &url.origin() == origin
                    && path.as_ref().is_none_or(|p| url.path().starts_with(p.as_str()))
            }
            CompiledSource::Glob(regex) => match normalized(url) {
                Some(text) => regex.is_match(&text),
                None => false,
            },
        }
    }
}

/// Translate a host-source glob into an anchored regex
///
/// `*.example.com`, `https://*.cdn.net:*`, `api.example.com/v1/`
fn glob_to_regex(token: &str) -> Result<Regex, SandboxError> {
    let (scheme, rest) = match token.split_once("://") {
        Some((scheme, rest)) => (regex::escape(&scheme.to_ascii_lowercase()), rest),
        None => ("(?:https?|wss?)".to_string(), token),
    };

    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], Some(&rest[idx..])),
        None => (rest, None),
    };
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (authority, None),
    };
    if host.is_empty() {
        return Err(SandboxError::invalid_config(format!(
            "invalid CSP source '{}': missing host",
            token
        )));
    }

    let host_pattern = regex::escape(&host.to_ascii_lowercase()).replace(r"\*", HOST_WILDCARD);
    let port_pattern = match port {
        Some("*") => r":\d+".to_string(),
        Some(p) if p.chars().all(|c| c.is_ascii_digit()) && !p.is_empty() => {
            format!(":{}", p)
        }
        Some(_) => {
            return Err(SandboxError::invalid_config(format!(
                "invalid CSP source '{}': bad port",
                token
            )));
        }
        None => "(?::\\d+)?".to_string(),
    };
    let path_pattern = match path {
        Some(p) => format!("{}.*", regex::escape(p).replace(r"\*", ".*")),
        None => "(?:/.*)?".to_string(),
    };

    let pattern = format!("^{}://{}{}{}$", scheme, host_pattern, port_pattern, path_pattern);
    Regex::new(&pattern).map_err(|e| {
        SandboxError::invalid_config(format!("invalid CSP source '{}': {}", token, e))
    })
}

/// `scheme://host[:port]/path` without userinfo, query or fragment
fn normalized(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    let port = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
    Some(format!(
        "{}://{}{}{}",
        url.scheme(),
        host.to_ascii_lowercase(),
        port,
        url.path()
    ))
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

/// Loaded resources in these directives can run code or frame content
fn severity_for(directive: CspDirective) -> Severity {
    match directive {
        CspDirective::ScriptSrc
        | CspDirective::ObjectSrc
        | CspDirective::FrameSrc
        | CspDirective::ChildSrc
        | CspDirective::WorkerSrc
        | CspDirective::ConnectSrc => Severity::High,
        _ => Severity::Medium,
    }
}

/// A policy with every source list pre-compiled
#[derive(Debug, Clone)]
pub(crate) struct UrlMatcher {
    directives: BTreeMap<CspDirective, Vec<CompiledSource>>,
    self_origin: Option<Origin>,
}

impl UrlMatcher {
    pub(crate) fn new(policy: &CspPolicy, self_origin: Option<&Url>) -> Result<Self, SandboxError> {
        let directives = policy
            .directives()
            .map(|(directive, sources)| {
                let compiled = sources
                    .iter()
                    .map(|s| CompiledSource::compile(s))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((directive, compiled))
            })
            .collect::<Result<BTreeMap<_, _>, SandboxError>>()?;

        Ok(Self {
            directives,
            self_origin: self_origin.map(Url::origin),
        })
    }

    fn effective(&self, directive: CspDirective) -> Option<&[CompiledSource]> {
        self.directives
            .get(&directive)
            .or_else(|| {
                if directive.falls_back_to_default() {
                    self.directives.get(&CspDirective::DefaultSrc)
                } else {
                    None
                }
            })
            .map(Vec::as_slice)
    }

    pub(crate) fn check(&self, raw: &str, directive: CspDirective) -> CspReport {
        let url = match Url::parse(raw) {
            Ok(url) => url,
            Err(e) => {
                return CspReport::new(
                    vec![CspViolation::new(
                        directive,
                        raw,
                        format!("URL could not be parsed: {}", e),
                        Severity::Medium,
                    )],
                    Vec::new(),
                );
            }
        };

        let Some(sources) = self.effective(directive) else {
            return CspReport::pass();
        };

        if sources
            .iter()
            .any(|s| s.matches(&url, self.self_origin.as_ref()))
        {
            return CspReport::pass();
        }

        CspReport::new(
            vec![CspViolation::new(
                directive,
                raw,
                format!("URL is not allowed by {}", directive),
                severity_for(directive),
            )],
            Vec::new(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(policy: CspPolicy, self_origin: Option<&str>) -> UrlMatcher {
        let origin = self_origin.map(|o| Url::parse(o).unwrap());
        UrlMatcher::new(&policy, origin.as_ref()).unwrap()
    }

    #[test]
    fn test_self_without_origin_is_loopback_only() {
        let m = matcher(CspPolicy::default(), None);
        assert!(m.check("http://localhost:3000/api", CspDirective::ConnectSrc).valid);
        assert!(m.check("http://127.0.0.1/api", CspDirective::ConnectSrc).valid);
        assert!(!m.check("https://evil.example.com/", CspDirective::ConnectSrc).valid);
    }

    #[test]
    fn test_self_with_configured_origin() {
        let m = matcher(CspPolicy::default(), Some("https://app.example.com"));
        assert!(m.check("https://app.example.com/data", CspDirective::ConnectSrc).valid);
        assert!(!m.check("http://app.example.com/data", CspDirective::ConnectSrc).valid);
        assert!(!m.check("http://localhost/data", CspDirective::ConnectSrc).valid);
    }

    #[test]
    fn test_cross_origin_connect_denied() {
        let m = matcher(CspPolicy::default(), Some("https://app.example.com"));
        let report = m.check("https://tracker.example.net/beacon", CspDirective::ConnectSrc);
        assert!(!report.valid);
        assert_eq!(report.violations[0].directive, CspDirective::ConnectSrc);
        assert_eq!(report.violations[0].severity, Severity::High);
    }

    #[test]
    fn test_scheme_sources() {
        let m = matcher(CspPolicy::default(), None);
        assert!(m.check("https://images.example.org/a.png", CspDirective::ImgSrc).valid);
        assert!(m.check("data:image/png;base64,AAAA", CspDirective::ImgSrc).valid);
        assert!(!m.check("http://images.example.org/a.png", CspDirective::ImgSrc).valid);
    }

    #[test]
    fn test_none_blocks_everything() {
        let m = matcher(CspPolicy::default(), None);
        assert!(!m.check("http://localhost/plugin.swf", CspDirective::ObjectSrc).valid);
    }

    #[test]
    fn test_host_globs() {
        let policy = CspPolicy::builder()
            .directive(CspDirective::ConnectSrc, ["*.example.com", "https://api.other.io:*"])
            .build();
        let m = matcher(policy, None);
        assert!(m.check("https://cdn.example.com/x.js", CspDirective::ConnectSrc).valid);
        assert!(m.check("wss://live.example.com/socket", CspDirective::ConnectSrc).valid);
        assert!(m.check("https://api.other.io:8443/v1", CspDirective::ConnectSrc).valid);
        assert!(!m.check("https://example.com.evil.net/", CspDirective::ConnectSrc).valid);
        assert!(!m.check("https://cdn.example.com@evil.net/", CspDirective::ConnectSrc).valid);
    }

    #[test]
    fn test_origin_with_path_prefix() {
        let policy = CspPolicy::builder()
            .directive(CspDirective::ScriptSrc, ["https://static.example.com/js/"])
            .build();
        let m = matcher(policy, None);
        assert!(m.check("https://static.example.com/js/app.js", CspDirective::ScriptSrc).valid);
        assert!(!m.check("https://static.example.com/uploads/x.js", CspDirective::ScriptSrc).valid);
    }

    #[test]
    fn test_unparsable_url_is_violation() {
        let m = matcher(CspPolicy::permissive(), None);
        assert!(!m.check("not a url", CspDirective::ImgSrc).valid);
    }

    #[test]
    fn test_missing_directive_without_default_allows() {
        let policy = CspPolicy::builder()
            .directive(CspDirective::ScriptSrc, [SELF])
            .build();
        let m = matcher(policy, None);
        assert!(m.check("https://anywhere.example/", CspDirective::ImgSrc).valid);
        assert!(m.check("https://anywhere.example/", CspDirective::FormAction).valid);
    }

    #[test]
    fn test_invalid_source_fails_construction() {
        let policy = CspPolicy::builder()
            .directive(CspDirective::ImgSrc, ["https://cdn.example.com:port"])
            .build();
        assert!(UrlMatcher::new(&policy, None).is_err());
    }
}
