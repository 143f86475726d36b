//! Inbound request descriptor.
//!
//! The slice of a request the cache consults: method, path with query, and
//! headers. Built once per request by the middleware and handed to the
//! classifier, key deriver, and interceptor.

use axum::http::{HeaderMap, Method, Request, header};

/// Methods that trigger invalidation when their response succeeds.
const MUTATING_METHODS: [Method; 4] = [Method::POST, Method::PUT, Method::PATCH, Method::DELETE];

#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    method: Method,
    path_query: String,
    headers: HeaderMap,
}

impl RequestDescriptor {
    pub fn new(method: Method, path_query: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            method,
            path_query: path_query.into(),
            headers,
        }
    }

    pub fn from_request<B>(request: &Request<B>) -> Self {
        let path_query = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| request.uri().path().to_string());
        Self::new(request.method().clone(), path_query, request.headers().clone())
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path and query string, as keyed into the store.
    pub fn path_query(&self) -> &str {
        &self.path_query
    }

    /// Path without the query string, as matched by rules.
    pub fn path(&self) -> &str {
        match self.path_query.split_once('?') {
            Some((path, _)) => path,
            None => &self.path_query,
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// GET and HEAD are the only methods eligible for cache lookup.
    pub fn is_lookup_method(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD
    }

    /// Whether a successful response to this request invalidates the entry.
    pub fn is_mutating_method(&self) -> bool {
        MUTATING_METHODS.contains(&self.method)
    }

    pub fn has_cookies(&self) -> bool {
        self.headers.contains_key(header::COOKIE)
    }
}
