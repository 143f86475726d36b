//! Cacheability classification.
//!
//! Request-side: gates lookup before the handler runs. Response-side:
//! decides storage once the response is fully materialized, and resolves
//! the effective TTL for the store write.

use std::time::Duration;

use tracing::debug;

use crate::codec::CapturedResponse;
use crate::config::CacheConfig;
use crate::error::{CacheError, NotCachableReason};
use crate::request::RequestDescriptor;
use crate::rules::{self, Rule};

/// Statuses cached when the matched rule declares no explicit filter.
const DEFAULT_CACHABLE_STATUSES: &[u16] = &[200];

/// Request-side gate.
///
/// Returns the request rule when lookup may proceed. Only idempotent reads
/// (GET, HEAD) are eligible; a path no rule matches, or one matched by a
/// zero-TTL rule, skips the cache entirely.
pub fn check_request<'r>(
    rules: &'r [Rule],
    config: &CacheConfig,
    request: &RequestDescriptor,
) -> Result<&'r Rule, CacheError> {
    if !request.is_lookup_method() {
        return Err(CacheError::RequestNotCachable);
    }

    let rule = rules::match_request(rules, request.path()).ok_or(CacheError::RequestNotCachable)?;
    if effective_ttl(rule, config).is_zero() {
        return Err(CacheError::RequestNotCachable);
    }
    Ok(rule)
}

/// Response-side gate. On success returns the effective TTL for the write.
pub fn classify_response(
    rules: &[Rule],
    config: &CacheConfig,
    request: &RequestDescriptor,
    response: &CapturedResponse,
) -> Result<Duration, CacheError> {
    if response.streaming {
        return not_cachable(request, NotCachableReason::Streaming);
    }

    let Some(rule) = rules::match_response(rules, request.path(), response.status) else {
        return not_cachable(request, NotCachableReason::NoRuleMatched);
    };

    let ttl = effective_ttl(rule, config);
    if ttl.is_zero() {
        return not_cachable(request, NotCachableReason::ZeroTtl);
    }

    if !rule.has_status_filter() && !DEFAULT_CACHABLE_STATUSES.contains(&response.status) {
        return not_cachable(request, NotCachableReason::StatusNotCachable);
    }

    // A response bootstrapping a session must not be shared across clients.
    if response.has_header("set-cookie") && !request.has_cookies() {
        return not_cachable(request, NotCachableReason::CookieBootstrap);
    }

    Ok(ttl)
}

fn effective_ttl(rule: &Rule, config: &CacheConfig) -> Duration {
    rule.ttl().unwrap_or_else(|| config.default_ttl())
}

fn not_cachable(request: &RequestDescriptor, reason: NotCachableReason) -> Result<Duration, CacheError> {
    debug!(
        path = %request.path(),
        reason = reason.as_str(),
        "response_not_cachable"
    );
    Err(CacheError::response_not_cachable(reason))
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, Method, header};
    use bytes::Bytes;

    use super::*;

    fn get_request(path_query: &str) -> RequestDescriptor {
        RequestDescriptor::new(Method::GET, path_query, HeaderMap::new())
    }

    fn response(status: u16) -> CapturedResponse {
        CapturedResponse {
            status,
            headers: vec![("content-type".to_string(), "text/plain".to_string())],
            body: Bytes::from("Hello, world!"),
            streaming: false,
        }
    }

    #[test]
    fn mutating_methods_fail_request_gate() {
        let rules = vec![Rule::new()];
        let config = CacheConfig::default();
        let request = RequestDescriptor::new(Method::POST, "/", HeaderMap::new());
        assert!(matches!(
            check_request(&rules, &config, &request),
            Err(CacheError::RequestNotCachable),
        ));
    }

    #[test]
    fn head_passes_request_gate() {
        let rules = vec![Rule::new()];
        let config = CacheConfig::default();
        let request = RequestDescriptor::new(Method::HEAD, "/", HeaderMap::new());
        assert!(check_request(&rules, &config, &request).is_ok());
    }

    #[test]
    fn unmatched_path_fails_request_gate() {
        let rules = vec![Rule::exact("/cache")];
        let config = CacheConfig::default();
        assert!(check_request(&rules, &config, &get_request("/other")).is_err());
    }

    #[test]
    fn zero_ttl_rule_fails_request_gate() {
        let rules = vec![Rule::exact("/no_cache").never_cache(), Rule::new()];
        let config = CacheConfig::default();
        assert!(check_request(&rules, &config, &get_request("/no_cache")).is_err());
        assert!(check_request(&rules, &config, &get_request("/other")).is_ok());
    }

    #[test]
    fn effective_ttl_falls_back_to_config_default() {
        let rules = vec![Rule::new()];
        let config = CacheConfig {
            default_ttl_secs: 300,
            ..Default::default()
        };
        let ttl = classify_response(&rules, &config, &get_request("/"), &response(200))
            .expect("should be cachable");
        assert_eq!(ttl, Duration::from_secs(300));
    }

    #[test]
    fn rule_ttl_overrides_default() {
        let rules = vec![Rule::new().with_ttl(Duration::from_secs(5))];
        let config = CacheConfig::default();
        let ttl = classify_response(&rules, &config, &get_request("/"), &response(200))
            .expect("should be cachable");
        assert_eq!(ttl, Duration::from_secs(5));
    }

    #[test]
    fn streaming_is_never_cachable() {
        let rules = vec![Rule::new()];
        let config = CacheConfig::default();
        let mut streaming = response(200);
        streaming.streaming = true;
        assert!(matches!(
            classify_response(&rules, &config, &get_request("/"), &streaming),
            Err(CacheError::ResponseNotCachable {
                reason: NotCachableReason::Streaming,
            }),
        ));
    }

    #[test]
    fn statusless_rule_caches_only_200() {
        let rules = vec![Rule::new()];
        let config = CacheConfig::default();
        for status in [201, 202, 307, 308, 400, 401, 403, 404, 500, 502, 503] {
            assert!(matches!(
                classify_response(&rules, &config, &get_request("/"), &response(status)),
                Err(CacheError::ResponseNotCachable {
                    reason: NotCachableReason::StatusNotCachable,
                }),
            ));
        }
        assert!(classify_response(&rules, &config, &get_request("/"), &response(200)).is_ok());
    }

    #[test]
    fn explicit_status_filter_overrides_default_set() {
        let rules = vec![Rule::new().with_status([404])];
        let config = CacheConfig::default();
        assert!(classify_response(&rules, &config, &get_request("/"), &response(404)).is_ok());
        // 200 is outside the declared filter, so no rule matches it.
        assert!(matches!(
            classify_response(&rules, &config, &get_request("/"), &response(200)),
            Err(CacheError::ResponseNotCachable {
                reason: NotCachableReason::NoRuleMatched,
            }),
        ));
    }

    #[test]
    fn zero_ttl_response_rule_wins_over_later_rules() {
        let rules = vec![Rule::exact("/no_cache").never_cache(), Rule::new()];
        let config = CacheConfig::default();
        assert!(matches!(
            classify_response(&rules, &config, &get_request("/no_cache"), &response(200)),
            Err(CacheError::ResponseNotCachable {
                reason: NotCachableReason::ZeroTtl,
            }),
        ));
        assert!(classify_response(&rules, &config, &get_request("/other"), &response(200)).is_ok());
    }

    #[test]
    fn cookie_setting_response_to_cookieless_request_is_not_cached() {
        let rules = vec![Rule::new()];
        let config = CacheConfig::default();
        let mut with_cookie = response(200);
        with_cookie.set_header("set-cookie", "session_id=1234");

        assert!(matches!(
            classify_response(&rules, &config, &get_request("/"), &with_cookie),
            Err(CacheError::ResponseNotCachable {
                reason: NotCachableReason::CookieBootstrap,
            }),
        ));

        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, "session_id=1234".parse().expect("valid"));
        let cookied_request = RequestDescriptor::new(Method::GET, "/", headers);
        assert!(classify_response(&rules, &config, &cookied_request, &with_cookie).is_ok());
    }
}
