//! Cache-Control directive patching.
//!
//! Merges a declared directive set into existing response headers:
//! directives present in the call overwrite same-named existing ones,
//! existing directives absent from the call are preserved. Boolean
//! directives render as bare tokens, numeric ones as `name=value`. When
//! `max-age` is given and the response has no `Expires`, one is added in
//! the RFC 7231 IMF-fixdate format.

use axum::http::{HeaderMap, HeaderValue, header};
use serde::Deserialize;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Duration as TimeDuration, OffsetDateTime, UtcOffset};

/// RFC 7231 IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
const IMF_FIXDATE: &[BorrowedFormatItem<'_>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

/// Cache-Control directives understood by the patcher.
///
/// `None` leaves an existing directive untouched; `Some(false)` on a
/// boolean directive removes it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CacheDirectives {
    pub max_age: Option<u64>,
    pub s_maxage: Option<u64>,
    pub no_cache: Option<bool>,
    pub no_store: Option<bool>,
    pub no_transform: Option<bool>,
    pub must_revalidate: Option<bool>,
    pub proxy_revalidate: Option<bool>,
    pub must_understand: Option<bool>,
    pub private: Option<bool>,
    pub public: Option<bool>,
    pub immutable: Option<bool>,
    pub stale_while_revalidate: Option<u64>,
    pub stale_if_error: Option<u64>,
}

impl CacheDirectives {
    /// Directive set carrying only `max-age`.
    pub fn max_age(secs: u64) -> Self {
        Self {
            max_age: Some(secs),
            ..Default::default()
        }
    }
}

enum DirectiveOverride {
    Token,
    Value(u64),
    Remove,
}

impl CacheDirectives {
    fn overrides(&self) -> Vec<(&'static str, DirectiveOverride)> {
        let mut out = Vec::new();
        numeric("max-age", self.max_age, &mut out);
        numeric("s-maxage", self.s_maxage, &mut out);
        flag("no-cache", self.no_cache, &mut out);
        flag("no-store", self.no_store, &mut out);
        flag("no-transform", self.no_transform, &mut out);
        flag("must-revalidate", self.must_revalidate, &mut out);
        flag("proxy-revalidate", self.proxy_revalidate, &mut out);
        flag("must-understand", self.must_understand, &mut out);
        flag("private", self.private, &mut out);
        flag("public", self.public, &mut out);
        flag("immutable", self.immutable, &mut out);
        numeric("stale-while-revalidate", self.stale_while_revalidate, &mut out);
        numeric("stale-if-error", self.stale_if_error, &mut out);
        out
    }
}

fn numeric(
    name: &'static str,
    value: Option<u64>,
    out: &mut Vec<(&'static str, DirectiveOverride)>,
) {
    if let Some(value) = value {
        out.push((name, DirectiveOverride::Value(value)));
    }
}

fn flag(
    name: &'static str,
    value: Option<bool>,
    out: &mut Vec<(&'static str, DirectiveOverride)>,
) {
    match value {
        Some(true) => out.push((name, DirectiveOverride::Token)),
        Some(false) => out.push((name, DirectiveOverride::Remove)),
        None => {}
    }
}

/// Merge `directives` into an existing `Cache-Control` value.
///
/// Returns `None` when the merged set is empty.
pub fn merge_cache_control(existing: Option<&str>, directives: &CacheDirectives) -> Option<String> {
    let mut entries: Vec<(String, Option<String>)> = existing
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(|part| match part.split_once('=') {
                    Some((name, value)) => (name.trim().to_string(), Some(value.trim().to_string())),
                    None => (part.to_string(), None),
                })
                .collect()
        })
        .unwrap_or_default();

    for (name, patch) in directives.overrides() {
        entries.retain(|(existing_name, _)| !existing_name.eq_ignore_ascii_case(name));
        match patch {
            DirectiveOverride::Token => entries.push((name.to_string(), None)),
            DirectiveOverride::Value(value) => {
                entries.push((name.to_string(), Some(value.to_string())));
            }
            DirectiveOverride::Remove => {}
        }
    }

    if entries.is_empty() {
        return None;
    }
    Some(
        entries
            .iter()
            .map(|(name, value)| match value {
                Some(value) => format!("{name}={value}"),
                None => name.clone(),
            })
            .collect::<Vec<_>>()
            .join(", "),
    )
}

/// Format an instant as an HTTP date (IMF-fixdate).
pub fn http_date(at: OffsetDateTime) -> String {
    at.to_offset(UtcOffset::UTC)
        .format(&IMF_FIXDATE)
        .unwrap_or_default()
}

/// Patch captured-response headers in place.
pub fn patch_headers(headers: &mut Vec<(String, String)>, directives: &CacheDirectives) {
    let existing = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("cache-control"))
        .map(|(_, value)| value.clone());

    if let Some(merged) = merge_cache_control(existing.as_deref(), directives) {
        headers.retain(|(name, _)| !name.eq_ignore_ascii_case("cache-control"));
        headers.push(("cache-control".to_string(), merged));
    }

    let has_expires = headers
        .iter()
        .any(|(name, _)| name.eq_ignore_ascii_case("expires"));
    if let Some(max_age) = directives.max_age
        && !has_expires
    {
        let at = OffsetDateTime::now_utc() + TimeDuration::seconds(max_age as i64);
        headers.push(("expires".to_string(), http_date(at)));
    }
}

/// Patch an axum header map in place.
pub fn patch_header_map(headers: &mut HeaderMap, directives: &CacheDirectives) {
    let existing = headers
        .get(header::CACHE_CONTROL)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    if let Some(merged) = merge_cache_control(existing.as_deref(), directives)
        && let Ok(value) = HeaderValue::from_str(&merged)
    {
        headers.insert(header::CACHE_CONTROL, value);
    }

    if let Some(max_age) = directives.max_age
        && !headers.contains_key(header::EXPIRES)
    {
        let at = OffsetDateTime::now_utc() + TimeDuration::seconds(max_age as i64);
        if let Ok(value) = HeaderValue::from_str(&http_date(at)) {
            headers.insert(header::EXPIRES, value);
        }
    }
}
