//! Response cache middleware.
//!
//! Serves stored responses for rule-eligible GET/HEAD requests and attaches
//! the interceptor to everything that misses. Mutating requests bypass
//! lookup and invalidate their resource's entry once the response status
//! confirms success.
//!
//! Attaching the layer twice in one request scope is a configuration error
//! and fails the request with [`CacheError::DuplicateInterception`] rather
//! than caching twice.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode, response::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use http_body_util::BodyExt;
use metrics::counter;
use tracing::{debug, error, instrument, warn};
use url::Url;

use crate::classify;
use crate::codec::{self, CapturedResponse};
use crate::config::CacheConfig;
use crate::control::{self, CacheDirectives};
use crate::error::CacheError;
use crate::events::{BodyChunk, BufferSink, ResponseEvent, ResponseStart};
use crate::interceptor::ResponseInterceptor;
use crate::invalidate;
use crate::keys;
use crate::request::RequestDescriptor;
use crate::rules::Rule;
use crate::store::{CacheStore, MemoryStore, StoreError};

/// Shared cache state for the middleware.
#[derive(Clone)]
pub struct CacheState {
    pub config: CacheConfig,
    pub rules: Arc<[Rule]>,
    pub store: Arc<dyn CacheStore>,
}

impl CacheState {
    /// An empty rule list defaults to a single catch-all rule.
    pub fn new(config: CacheConfig, rules: Vec<Rule>, store: Arc<dyn CacheStore>) -> Self {
        let rules = if rules.is_empty() {
            vec![Rule::new()]
        } else {
            rules
        };
        Self {
            config,
            rules: rules.into(),
            store,
        }
    }

    /// State backed by the bundled in-memory store.
    pub fn with_memory_store(config: CacheConfig, rules: Vec<Rule>) -> Self {
        let store = Arc::new(MemoryStore::with_config(&config));
        Self::new(config, rules, store)
    }
}

/// Marker detecting a second cache layer in the same request scope.
#[derive(Clone)]
struct InterceptionMarker;

/// Request-scoped handle for manual invalidation.
///
/// Inserted into request extensions by [`response_cache_layer`]; handlers
/// extract it with `Extension<CacheScope>` or [`CacheScope::from_request`].
#[derive(Clone)]
pub struct CacheScope {
    store: Arc<dyn CacheStore>,
}

impl CacheScope {
    /// Fetch the scope from a request.
    ///
    /// Fails with [`CacheError::MissingInterceptorContext`] when no cache
    /// layer is active for the request.
    pub fn from_request<B>(request: &Request<B>) -> Result<Self, CacheError> {
        request
            .extensions()
            .get::<CacheScope>()
            .cloned()
            .ok_or(CacheError::MissingInterceptorContext)
    }

    /// Invalidate the entry for a path or absolute URL.
    ///
    /// `headers` reconstructs the same key-derivation inputs used at store
    /// time for `Vary`-partitioned entries.
    pub async fn invalidate_url(&self, url: &str, headers: Option<&HeaderMap>) {
        let target = match Url::parse(url) {
            Ok(parsed) => match parsed.query() {
                Some(query) => format!("{}?{query}", parsed.path()),
                None => parsed.path().to_string(),
            },
            // Relative targets are already path(+query) strings.
            Err(_) => url.to_string(),
        };
        let empty = HeaderMap::new();
        invalidate::invalidate(self.store.as_ref(), &target, headers.unwrap_or(&empty)).await;
    }
}

/// Middleware for response caching.
///
/// Install with `middleware::from_fn_with_state(state, response_cache_layer)`.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn response_cache_layer(
    State(cache): State<CacheState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if !cache.config.enabled {
        return next.run(request).await;
    }

    if request.extensions().get::<InterceptionMarker>().is_some() {
        let err = CacheError::DuplicateInterception;
        error!(error = %err, "refusing to attach a second response cache layer");
        return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
    }
    request.extensions_mut().insert(InterceptionMarker);
    request.extensions_mut().insert(CacheScope {
        store: cache.store.clone(),
    });

    let descriptor = RequestDescriptor::from_request(&request);

    if classify::check_request(&cache.rules, &cache.config, &descriptor).is_err() {
        if descriptor.is_mutating_method() {
            let response = next.run(request).await;
            if invalidate::is_invalidating_status(response.status().as_u16()) {
                invalidate::invalidate(
                    cache.store.as_ref(),
                    descriptor.path_query(),
                    descriptor.headers(),
                )
                .await;
            }
            return response;
        }
        return next.run(request).await;
    }

    let cached = match lookup(&cache, &descriptor).await {
        Ok(found) => found,
        Err(err) => {
            warn!(error = %err, "cache lookup failed; treating as miss");
            counter!("riserva_cache_store_error_total").increment(1);
            None
        }
    };

    if let Some(stored) = cached {
        counter!("riserva_cache_hit_total").increment(1);
        debug!(outcome = "hit", "serving cached response");
        return replay(stored);
    }

    counter!("riserva_cache_miss_total").increment(1);
    debug!(outcome = "miss", "cache miss, executing handler");

    let response = next.run(request).await;
    intercept(cache, descriptor, response).await
}

/// Middleware that applies configured `Cache-Control` directives to every
/// response passing through it.
pub async fn cache_control_layer(
    State(directives): State<CacheDirectives>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    control::patch_header_map(response.headers_mut(), &directives);
    response
}

/// Two-phase lookup: vary index first, then the payload entry keyed by the
/// index's header names and this request's header values.
async fn lookup(
    cache: &CacheState,
    request: &RequestDescriptor,
) -> Result<Option<CapturedResponse>, StoreError> {
    let index_key = keys::vary_index_key(request.path_query());
    let Some(raw_vary) = cache.store.get(&index_key).await? else {
        return Ok(None);
    };
    let vary: Vec<String> = serde_json::from_slice(&raw_vary).unwrap_or_default();

    let payload_key = keys::payload_key(
        request.method(),
        request.path_query(),
        &vary,
        request.headers(),
    );
    let Some(raw) = cache.store.get(&payload_key).await? else {
        return Ok(None);
    };

    match codec::decode_response(&raw) {
        Ok(response) => Ok(Some(response)),
        Err(err) => {
            warn!(error = %err, "dropping undecodable cache entry");
            let _ = cache.store.delete(&payload_key).await;
            Ok(None)
        }
    }
}

fn replay(mut stored: CapturedResponse) -> Response {
    stored.set_header("x-cache", "hit");
    build_response(stored)
}

/// Build a response from cached data.
fn build_response(cached: CapturedResponse) -> Response {
    let mut builder = Response::builder().status(cached.status);
    for (name, value) in &cached.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::from_str(value),
        ) {
            builder = builder.header(name, value);
        }
    }
    builder
        .body(Body::from(cached.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Drive the interceptor state machine over the handler's response.
///
/// The first body frame decides the branch: a single-frame body is
/// materialized, classified, and possibly stored before anything flushes;
/// a multi-frame body flushes immediately and passes through.
async fn intercept(
    cache: CacheState,
    request: RequestDescriptor,
    response: Response,
) -> Response {
    let (parts, body) = response.into_parts();

    let start = ResponseStart {
        status: parts.status.as_u16(),
        headers: parts
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect(),
    };

    let mut interceptor = ResponseInterceptor::new(
        request,
        cache.rules.clone(),
        cache.config.clone(),
        cache.store.clone(),
        BufferSink::new(),
    );
    if interceptor
        .on_event(ResponseEvent::Start(start))
        .await
        .is_err()
    {
        // A fresh interceptor always accepts a start event.
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let mut body = body;
    let first = match next_data_frame(&mut body).await {
        Ok(frame) => frame,
        Err(err) => {
            warn!(error = %err, "failed to read response body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let Some(first) = first else {
        return finish_complete(interceptor, parts, Bytes::new()).await;
    };

    // Peek one frame ahead: a second frame means the body is streaming.
    let second = match next_data_frame(&mut body).await {
        Ok(frame) => frame,
        Err(err) => {
            warn!(error = %err, "failed to read response body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match second {
        None => finish_complete(interceptor, parts, first).await,
        Some(second) => stream_passthrough(interceptor, parts, body, first, second),
    }
}

async fn finish_complete(
    mut interceptor: ResponseInterceptor<BufferSink>,
    mut parts: Parts,
    bytes: Bytes,
) -> Response {
    if interceptor
        .on_event(ResponseEvent::Body(BodyChunk::last(bytes)))
        .await
        .is_err()
    {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let mut start = None;
    let mut body = Bytes::new();
    for event in interceptor.into_sink().drain() {
        match event {
            ResponseEvent::Start(flushed) => start = Some(flushed),
            ResponseEvent::Body(chunk) => body = chunk.bytes,
        }
    }
    let Some(start) = start else {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    apply_start(&mut parts, &start);
    Response::from_parts(parts, Body::from(body))
}

fn stream_passthrough(
    mut interceptor: ResponseInterceptor<BufferSink>,
    parts: Parts,
    mut body: Body,
    first: Bytes,
    second: Bytes,
) -> Response {
    let stream = async_stream::stream! {
        if interceptor
            .on_event(ResponseEvent::Body(BodyChunk::partial(first)))
            .await
            .is_err()
        {
            return;
        }
        for event in interceptor.sink_mut().drain() {
            if let ResponseEvent::Body(chunk) = event {
                yield Ok::<Bytes, axum::Error>(chunk.bytes);
            }
        }

        let mut pending = Some(second);
        while let Some(current) = pending.take() {
            let upcoming = match next_data_frame(&mut body).await {
                Ok(frame) => frame,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };
            let chunk = BodyChunk {
                bytes: current,
                has_more: upcoming.is_some(),
            };
            if interceptor.on_event(ResponseEvent::Body(chunk)).await.is_err() {
                return;
            }
            for event in interceptor.sink_mut().drain() {
                if let ResponseEvent::Body(chunk) = event {
                    yield Ok(chunk.bytes);
                }
            }
            pending = upcoming;
        }
    };

    // Streaming responses pass through with their original status and
    // headers; only the body is re-chunked through the interceptor.
    Response::from_parts(parts, Body::from_stream(stream))
}

fn apply_start(parts: &mut Parts, start: &ResponseStart) {
    if let Ok(status) = StatusCode::from_u16(start.status) {
        parts.status = status;
    }
    parts.headers.clear();
    for (name, value) in &start.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::from_str(value),
        ) {
            parts.headers.append(name, value);
        }
    }
}

/// Pull the next data frame, skipping non-data frames such as trailers.
async fn next_data_frame(body: &mut Body) -> Result<Option<Bytes>, axum::Error> {
    while let Some(frame) = body.frame().await {
        let frame = frame?;
        if let Ok(data) = frame.into_data() {
            return Ok(Some(data));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_rule_list_defaults_to_catch_all() {
        let state = CacheState::with_memory_store(CacheConfig::default(), Vec::new());
        assert_eq!(state.rules.len(), 1);
        assert!(state.rules[0].matches_path("/anything"));
    }

    #[test]
    fn scope_lookup_fails_outside_interception() {
        let request = Request::builder()
            .uri("/")
            .body(Body::empty())
            .expect("request should build");
        assert!(matches!(
            CacheScope::from_request(&request),
            Err(CacheError::MissingInterceptorContext),
        ));
    }
}
