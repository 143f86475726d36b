//! Caching rules.
//!
//! A rule pairs a path matcher with an optional response-status filter and
//! an optional TTL override. Rules are evaluated in declaration order: the
//! first rule whose matcher accepts the request path is the *request rule*;
//! the first rule whose matcher and status filter both accept the response
//! is the *response rule*. Order decides, not specificity.
//!
//! A TTL of zero means "explicitly never cache this match" and is distinct
//! from an unset TTL, which falls back to the store-wide default.

use std::time::Duration;

use regex::Regex;

/// Path matcher for a rule.
#[derive(Debug, Clone)]
pub enum PathMatch {
    /// Matches every path.
    Any,
    /// Matches on exact path equality.
    Exact(String),
    /// Matches when the pattern matches anchored at the start of the path.
    Pattern(Regex),
    /// Matches when any member matches.
    AnyOf(Vec<PathMatch>),
}

impl PathMatch {
    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(exact) => exact == path,
            // Leftmost-match semantics: a match starting at offset zero
            // exists iff the leftmost match starts there.
            Self::Pattern(pattern) => pattern.find(path).is_some_and(|m| m.start() == 0),
            Self::AnyOf(members) => members.iter().any(|member| member.matches(path)),
        }
    }
}

/// A caching rule.
#[derive(Debug, Clone)]
pub struct Rule {
    matcher: PathMatch,
    status: Option<Vec<u16>>,
    ttl: Option<Duration>,
}

impl Default for Rule {
    fn default() -> Self {
        Self::new()
    }
}

impl Rule {
    /// Catch-all rule: every path, default status set, store-default TTL.
    pub fn new() -> Self {
        Self::for_path(PathMatch::Any)
    }

    /// Rule scoped to the given matcher.
    pub fn for_path(matcher: PathMatch) -> Self {
        Self {
            matcher,
            status: None,
            ttl: None,
        }
    }

    /// Rule matching one exact path.
    pub fn exact(path: impl Into<String>) -> Self {
        Self::for_path(PathMatch::Exact(path.into()))
    }

    /// Rule matching a pattern anchored at the start of the path.
    pub fn pattern(pattern: Regex) -> Self {
        Self::for_path(PathMatch::Pattern(pattern))
    }

    /// Restrict the rule to the given response statuses.
    pub fn with_status(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.status = Some(statuses.into_iter().collect());
        self
    }

    /// Cache matching responses for this long.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Never cache responses matched by this rule.
    pub fn never_cache(mut self) -> Self {
        self.ttl = Some(Duration::ZERO);
        self
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Whether the rule declares an explicit status filter.
    pub fn has_status_filter(&self) -> bool {
        self.status.is_some()
    }

    pub fn matches_path(&self, path: &str) -> bool {
        self.matcher.matches(path)
    }

    /// A rule with no status filter matches every status.
    pub fn matches_status(&self, status: u16) -> bool {
        match &self.status {
            Some(statuses) => statuses.contains(&status),
            None => true,
        }
    }
}

/// First rule (in declaration order) whose matcher accepts the path.
pub fn match_request<'r>(rules: &'r [Rule], path: &str) -> Option<&'r Rule> {
    rules.iter().find(|rule| rule.matches_path(path))
}

/// First rule (in declaration order) whose matcher and status filter both
/// accept the response.
pub fn match_response<'r>(rules: &'r [Rule], path: &str, status: u16) -> Option<&'r Rule> {
    rules
        .iter()
        .find(|rule| rule.matches_path(path) && rule.matches_status(status))
}
