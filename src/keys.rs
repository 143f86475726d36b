//! Cache key derivation.
//!
//! Two-phase Vary-aware scheme. The *vary index* entry, keyed by the URL
//! alone, records which request headers the stored response varies on. The
//! *payload* entry is keyed by method class, URL, and the values of exactly
//! those headers, so:
//!
//! - requests differing only in a header not listed in `Vary` collapse to
//!   the same entry;
//! - requests differing in a listed header's value get distinct entries;
//! - GET and HEAD share a method class, so a HEAD-populated entry is later
//!   served to GET.
//!
//! URL and header-value parts are SHA-256 hashed so arbitrary bytes cannot
//! corrupt key syntax in the backing store.

use axum::http::{HeaderMap, Method};
use sha2::{Digest, Sha256};

const PAYLOAD_PREFIX: &str = "riserva:rsp";
const VARY_INDEX_PREFIX: &str = "riserva:vary";

/// Key of the vary index entry for a URL.
pub fn vary_index_key(path_query: &str) -> String {
    format!("{VARY_INDEX_PREFIX}:{}", hash_hex(path_query.as_bytes()))
}

/// Key of the payload entry for a URL and its varying header values.
///
/// `vary_names` is the ordered, lower-cased name list learned from the
/// stored response; a request lacking one of those headers contributes an
/// empty value for that slot. Values are hashed case-sensitively as
/// delivered; name matching is case-insensitive by construction.
pub fn payload_key(
    method: &Method,
    path_query: &str,
    vary_names: &[String],
    headers: &HeaderMap,
) -> String {
    let mut hasher = Sha256::new();
    for name in vary_names {
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(header_value(headers, name).as_bytes());
        hasher.update(b"\n");
    }
    format!(
        "{PAYLOAD_PREFIX}:{}:{}:{}",
        method_class(method),
        hash_hex(path_query.as_bytes()),
        hex::encode(hasher.finalize()),
    )
}

/// Lower-cased header names listed in a response's `Vary` header(s).
///
/// Order is preserved as declared; the list is what the vary index stores.
pub fn vary_names_from_headers(headers: &[(String, String)]) -> Vec<String> {
    headers
        .iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case("vary"))
        .flat_map(|(_, value)| value.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect()
}

/// HEAD responses populate entries retrievable by GET.
fn method_class(method: &Method) -> &str {
    if *method == Method::HEAD {
        Method::GET.as_str()
    } else {
        method.as_str()
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> String {
    let values: Vec<&str> = headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect();
    values.join(", ")
}

fn hash_hex(input: &[u8]) -> String {
    hex::encode(Sha256::digest(input))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(entries: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in entries {
            headers.append(
                axum::http::HeaderName::try_from(*name).expect("valid name"),
                value.parse().expect("valid value"),
            );
        }
        headers
    }

    #[test]
    fn unlisted_headers_collapse_to_same_key() {
        let vary = vec!["accept-encoding".to_string()];
        let a = headers_with(&[("accept-encoding", "gzip"), ("user-agent", "curl")]);
        let b = headers_with(&[("accept-encoding", "gzip"), ("user-agent", "firefox")]);
        assert_eq!(
            payload_key(&Method::GET, "/", &vary, &a),
            payload_key(&Method::GET, "/", &vary, &b),
        );
    }

    #[test]
    fn listed_header_values_partition_keys() {
        let vary = vec!["accept-encoding".to_string()];
        let gzip = headers_with(&[("accept-encoding", "gzip")]);
        let identity = headers_with(&[("accept-encoding", "identity")]);
        assert_ne!(
            payload_key(&Method::GET, "/", &vary, &gzip),
            payload_key(&Method::GET, "/", &vary, &identity),
        );
    }

    #[test]
    fn missing_listed_header_uses_empty_slot() {
        let vary = vec!["accept-encoding".to_string()];
        let absent = headers_with(&[]);
        let empty = headers_with(&[("accept-encoding", "")]);
        assert_eq!(
            payload_key(&Method::GET, "/", &vary, &absent),
            payload_key(&Method::GET, "/", &vary, &empty),
        );
    }

    #[test]
    fn header_values_compare_case_sensitively() {
        let vary = vec!["accept-encoding".to_string()];
        let lower = headers_with(&[("accept-encoding", "gzip")]);
        let upper = headers_with(&[("accept-encoding", "GZIP")]);
        assert_ne!(
            payload_key(&Method::GET, "/", &vary, &lower),
            payload_key(&Method::GET, "/", &vary, &upper),
        );
    }

    #[test]
    fn head_and_get_share_a_key() {
        let vary = Vec::new();
        let headers = HeaderMap::new();
        assert_eq!(
            payload_key(&Method::HEAD, "/", &vary, &headers),
            payload_key(&Method::GET, "/", &vary, &headers),
        );
    }

    #[test]
    fn different_paths_get_different_keys() {
        let vary = Vec::new();
        let headers = HeaderMap::new();
        assert_ne!(
            payload_key(&Method::GET, "/a", &vary, &headers),
            payload_key(&Method::GET, "/b", &vary, &headers),
        );
        assert_ne!(vary_index_key("/a"), vary_index_key("/b"));
    }

    #[test]
    fn query_string_partitions_keys() {
        let vary = Vec::new();
        let headers = HeaderMap::new();
        assert_ne!(
            payload_key(&Method::GET, "/posts?page=1", &vary, &headers),
            payload_key(&Method::GET, "/posts?page=2", &vary, &headers),
        );
    }

    #[test]
    fn vary_names_are_lowercased_and_split() {
        let headers = vec![
            ("Content-Type".to_string(), "text/plain".to_string()),
            ("Vary".to_string(), "Accept-Encoding, User-Agent".to_string()),
        ];
        assert_eq!(
            vary_names_from_headers(&headers),
            vec!["accept-encoding".to_string(), "user-agent".to_string()],
        );
    }

    #[test]
    fn vary_names_merge_repeated_headers() {
        let headers = vec![
            ("vary".to_string(), "Accept-Encoding".to_string()),
            ("VARY".to_string(), "Cookie".to_string()),
        ];
        assert_eq!(
            vary_names_from_headers(&headers),
            vec!["accept-encoding".to_string(), "cookie".to_string()],
        );
    }
}
