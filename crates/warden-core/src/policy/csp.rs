//! CSP directives and policies

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Fetch and navigation directives understood by the validator
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CspDirective {
    DefaultSrc,
    ScriptSrc,
    StyleSrc,
    ImgSrc,
    ConnectSrc,
    FontSrc,
    ObjectSrc,
    MediaSrc,
    FrameSrc,
    ChildSrc,
    WorkerSrc,
    FormAction,
    FrameAncestors,
    BaseUri,
}

impl CspDirective {
    /// Get the header name of the directive
    pub fn as_str(&self) -> &'static str {
        match self {
            CspDirective::DefaultSrc => "default-src",
            CspDirective::ScriptSrc => "script-src",
            CspDirective::StyleSrc => "style-src",
            CspDirective::ImgSrc => "img-src",
            CspDirective::ConnectSrc => "connect-src",
            CspDirective::FontSrc => "font-src",
            CspDirective::ObjectSrc => "object-src",
            CspDirective::MediaSrc => "media-src",
            CspDirective::FrameSrc => "frame-src",
            CspDirective::ChildSrc => "child-src",
            CspDirective::WorkerSrc => "worker-src",
            CspDirective::FormAction => "form-action",
            CspDirective::FrameAncestors => "frame-ancestors",
            CspDirective::BaseUri => "base-uri",
        }
    }

    /// Whether a missing entry for this directive falls back to `default-src`
    pub fn falls_back_to_default(&self) -> bool {
        !matches!(
            self,
            CspDirective::DefaultSrc
                | CspDirective::FormAction
                | CspDirective::FrameAncestors
                | CspDirective::BaseUri
        )
    }
}

impl fmt::Display for CspDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CspDirective {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let directive = match s {
            "default-src" => CspDirective::DefaultSrc,
            "script-src" => CspDirective::ScriptSrc,
            "style-src" => CspDirective::StyleSrc,
            "img-src" => CspDirective::ImgSrc,
            "connect-src" => CspDirective::ConnectSrc,
            "font-src" => CspDirective::FontSrc,
            "object-src" => CspDirective::ObjectSrc,
            "media-src" => CspDirective::MediaSrc,
            "frame-src" => CspDirective::FrameSrc,
            "child-src" => CspDirective::ChildSrc,
            "worker-src" => CspDirective::WorkerSrc,
            "form-action" => CspDirective::FormAction,
            "frame-ancestors" => CspDirective::FrameAncestors,
            "base-uri" => CspDirective::BaseUri,
            other => return Err(format!("unknown CSP directive '{}'", other)),
        };
        Ok(directive)
    }
}

/// Source keywords
pub const SELF: &str = "'self'";
pub const NONE: &str = "'none'";
pub const UNSAFE_INLINE: &str = "'unsafe-inline'";
pub const UNSAFE_EVAL: &str = "'unsafe-eval'";

/// Allow-list policy keyed by directive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CspPolicy {
    directives: BTreeMap<CspDirective, Vec<String>>,
}

impl Default for CspPolicy {
    /// Same-origin network only, no inline or eval script, inline styles allowed,
    /// no plugins and no frames.
    fn default() -> Self {
        Self::builder()
            .directive(CspDirective::DefaultSrc, [SELF])
            .directive(CspDirective::ScriptSrc, [SELF])
            .directive(CspDirective::StyleSrc, [SELF, UNSAFE_INLINE])
            .directive(CspDirective::ImgSrc, [SELF, "data:", "https:"])
            .directive(CspDirective::ConnectSrc, [SELF])
            .directive(CspDirective::FontSrc, [SELF])
            .directive(CspDirective::ObjectSrc, [NONE])
            .directive(CspDirective::MediaSrc, [SELF])
            .directive(CspDirective::FrameSrc, [NONE])
            .directive(CspDirective::ChildSrc, [NONE])
            .directive(CspDirective::FrameAncestors, [NONE])
            .build()
    }
}

impl CspPolicy {
    /// Start an empty policy
    pub fn builder() -> CspPolicyBuilder {
        CspPolicyBuilder::default()
    }

    /// Nothing but same-origin resources; inline styles blocked too
    pub fn strict() -> Self {
        Self::builder()
            .directive(CspDirective::DefaultSrc, [NONE])
            .directive(CspDirective::ScriptSrc, [SELF])
            .directive(CspDirective::StyleSrc, [SELF])
            .directive(CspDirective::ImgSrc, [SELF])
            .directive(CspDirective::ConnectSrc, [SELF])
            .directive(CspDirective::FontSrc, [SELF])
            .directive(CspDirective::ObjectSrc, [NONE])
            .directive(CspDirective::FrameSrc, [NONE])
            .directive(CspDirective::FrameAncestors, [NONE])
            .directive(CspDirective::BaseUri, [SELF])
            .directive(CspDirective::FormAction, [SELF])
            .build()
    }

    /// Any https resource, inline and eval allowed; plugins still blocked
    pub fn permissive() -> Self {
        Self::builder()
            .directive(CspDirective::DefaultSrc, [SELF, "https:"])
            .directive(CspDirective::ScriptSrc, [SELF, "https:", UNSAFE_INLINE, UNSAFE_EVAL])
            .directive(CspDirective::StyleSrc, [SELF, "https:", UNSAFE_INLINE])
            .directive(CspDirective::ImgSrc, ["*", "data:", "blob:"])
            .directive(CspDirective::ConnectSrc, [SELF, "https:", "wss:"])
            .directive(CspDirective::ObjectSrc, [NONE])
            .build()
    }

    /// Sources listed for exactly this directive
    pub fn sources(&self, directive: CspDirective) -> Option<&[String]> {
        self.directives.get(&directive).map(Vec::as_slice)
    }

    /// Sources that govern a directive, applying the `default-src` fallback
    pub fn effective_sources(&self, directive: CspDirective) -> Option<&[String]> {
        self.sources(directive).or_else(|| {
            if directive.falls_back_to_default() {
                self.sources(CspDirective::DefaultSrc)
            } else {
                None
            }
        })
    }

    /// Whether the effective sources of a directive contain a keyword
    pub fn allows_keyword(&self, directive: CspDirective, keyword: &str) -> bool {
        self.effective_sources(directive)
            .is_some_and(|sources| sources.iter().any(|s| s == keyword))
    }

    /// Iterate over all configured directives
    pub fn directives(&self) -> impl Iterator<Item = (CspDirective, &[String])> {
        self.directives.iter().map(|(d, s)| (*d, s.as_slice()))
    }

    /// Render as a `Content-Security-Policy` header value
    pub fn to_header_value(&self) -> String {
        self.directives
            .iter()
            .map(|(directive, sources)| {
                if sources.is_empty() {
                    directive.as_str().to_string()
                } else {
                    format!("{} {}", directive, sources.join(" "))
                }
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Builder for [`CspPolicy`]
#[derive(Debug, Default)]
pub struct CspPolicyBuilder {
    directives: BTreeMap<CspDirective, Vec<String>>,
}

impl CspPolicyBuilder {
    /// Set (replace) the sources of a directive
    pub fn directive<I, S>(mut self, directive: CspDirective, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.directives
            .insert(directive, sources.into_iter().map(Into::into).collect());
        self
    }

    pub fn build(self) -> CspPolicy {
        CspPolicy {
            directives: self.directives,
        }
    }
}
