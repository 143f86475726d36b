//! Captured response serialization.
//!
//! Owns the store's value format: a JSON envelope with a base64 body field,
//! so status, headers, and body round-trip byte-identically regardless of
//! body content.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A fully materialized response.
///
/// Owned by exactly one interceptor for the lifetime of one request; never
/// shared across requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    /// The body arrived in multiple chunks. Streaming responses are never
    /// stored; decoded entries are always complete.
    pub streaming: bool,
}

impl CapturedResponse {
    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header_name, _)| header_name.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    /// Replace every value of `name`, or append when absent.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers
            .retain(|(header_name, _)| !header_name.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode cached response: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode cached response: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("cached response body is not valid base64: {0}")]
    Body(#[source] base64::DecodeError),
}

#[derive(Serialize, Deserialize)]
struct WireResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

/// Encode a captured response into the store's value type.
pub fn encode_response(response: &CapturedResponse) -> Result<Bytes, CodecError> {
    let wire = WireResponse {
        status: response.status,
        headers: response.headers.clone(),
        body: BASE64.encode(&response.body),
    };
    let raw = serde_json::to_vec(&wire).map_err(CodecError::Encode)?;
    Ok(Bytes::from(raw))
}

/// Decode a stored entry back into a captured response.
pub fn decode_response(raw: &[u8]) -> Result<CapturedResponse, CodecError> {
    let wire: WireResponse = serde_json::from_slice(raw).map_err(CodecError::Decode)?;
    let body = BASE64.decode(wire.body).map_err(CodecError::Body)?;
    Ok(CapturedResponse {
        status: wire.status,
        headers: wire.headers,
        body: Bytes::from(body),
        streaming: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CapturedResponse {
        CapturedResponse {
            status: 200,
            headers: vec![
                ("content-type".to_string(), "text/plain".to_string()),
                ("vary".to_string(), "Accept-Encoding".to_string()),
            ],
            body: Bytes::from("Hello, world!"),
            streaming: false,
        }
    }

    #[test]
    fn round_trip_is_byte_identical() {
        let original = sample();
        let encoded = encode_response(&original).expect("encode should succeed");
        let decoded = decode_response(&encoded).expect("decode should succeed");
        assert_eq!(decoded, original);
    }

    #[test]
    fn round_trips_binary_bodies() {
        let mut response = sample();
        response.body = Bytes::from(vec![0u8, 159, 146, 150, 255]);
        let encoded = encode_response(&response).expect("encode should succeed");
        let decoded = decode_response(&encoded).expect("decode should succeed");
        assert_eq!(decoded.body, response.body);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_response(b"not json").is_err());
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let response = sample();
        assert_eq!(response.header("Content-Type"), Some("text/plain"));
        assert_eq!(response.header("VARY"), Some("Accept-Encoding"));
        assert!(response.header("x-missing").is_none());
    }

    #[test]
    fn set_header_replaces_existing_values() {
        let mut response = sample();
        response.set_header("X-Cache", "miss");
        response.set_header("x-cache", "hit");
        let values: Vec<_> = response
            .headers
            .iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case("x-cache"))
            .collect();
        assert_eq!(values.len(), 1);
        assert_eq!(response.header("x-cache"), Some("hit"));
    }
}
