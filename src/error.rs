use std::fmt;

use thiserror::Error;

/// Why a response failed cacheability classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotCachableReason {
    /// No rule matched the response's path and status.
    NoRuleMatched,
    /// The matched rule resolves to a zero TTL.
    ZeroTtl,
    /// The rule has no status filter and the status is outside the default
    /// cachable set.
    StatusNotCachable,
    /// The body arrived in multiple chunks.
    Streaming,
    /// The response sets a cookie while the request carried none.
    CookieBootstrap,
}

impl NotCachableReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoRuleMatched => "no_rule_matched",
            Self::ZeroTtl => "zero_ttl",
            Self::StatusNotCachable => "status_not_cachable",
            Self::Streaming => "is_streaming",
            Self::CookieBootstrap => "cookie_bootstrap",
        }
    }
}

impl fmt::Display for NotCachableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    /// The request is ineligible for cache lookup. Recovered locally: the
    /// request proceeds to the handler uncached.
    #[error("request is not cachable")]
    RequestNotCachable,
    /// The response failed classification. Recovered locally: the response
    /// is forwarded unpatched and unstored.
    #[error("response is not cachable: {reason}")]
    ResponseNotCachable { reason: NotCachableReason },
    /// More than one response cache layer is attached to the same request
    /// scope. A configuration error; surfaced to the caller, never swallowed.
    #[error(
        "another response cache layer was detected in this request scope; \
         the caching layer is installed twice"
    )]
    DuplicateInterception,
    /// A cache helper was used outside an active interception scope.
    #[error("no response cache layer is active for this request")]
    MissingInterceptorContext,
}

impl CacheError {
    pub fn response_not_cachable(reason: NotCachableReason) -> Self {
        Self::ResponseNotCachable { reason }
    }
}
