//! Response interception state machine.
//!
//! Buffers the start of a response until the first body chunk reveals
//! whether the response is complete or streaming. A complete response is
//! classified and, when eligible, patched and written to the store before
//! the buffered events flush downstream; a streaming response flushes
//! immediately and passes through untouched.
//!
//! Invariant: exactly one start event and the complete ordered chunk
//! sequence reach the sink exactly once on every branch. The store write is
//! best-effort and never blocks or fails delivery.
//!
//! One interceptor exists per in-flight request. Dropping it (for example
//! when the caller disconnects mid-stream) releases the buffered state with
//! it.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use thiserror::Error;
use tracing::{debug, warn};

use crate::classify;
use crate::codec::{self, CapturedResponse};
use crate::config::CacheConfig;
use crate::control::{self, CacheDirectives};
use crate::events::{BodyChunk, ResponseEvent, ResponseSink, ResponseStart};
use crate::keys;
use crate::request::RequestDescriptor;
use crate::rules::Rule;
use crate::store::CacheStore;

/// Interceptor lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptorState {
    /// No events received yet.
    AwaitingStart,
    /// Start received and held back, awaiting the first body chunk.
    BufferedStart,
    /// Streaming response; events forward immediately and unmodified.
    StreamingPassthrough,
    /// The response completed. No further events are accepted.
    Done,
}

/// Event-protocol violations. These indicate a buggy driver, not a cache
/// policy outcome.
#[derive(Debug, Error)]
pub enum InterceptError {
    #[error("response start event received in state {state:?}")]
    UnexpectedStart { state: InterceptorState },
    #[error("body chunk received before the response start event")]
    ChunkBeforeStart,
    #[error("event received after the response completed")]
    Completed,
}

/// Per-request state machine over the response event protocol.
pub struct ResponseInterceptor<S> {
    request: RequestDescriptor,
    rules: Arc<[Rule]>,
    config: CacheConfig,
    store: Arc<dyn CacheStore>,
    sink: S,
    state: InterceptorState,
    pending_start: Option<ResponseStart>,
}

impl<S: ResponseSink> ResponseInterceptor<S> {
    pub fn new(
        request: RequestDescriptor,
        rules: Arc<[Rule]>,
        config: CacheConfig,
        store: Arc<dyn CacheStore>,
        sink: S,
    ) -> Self {
        Self {
            request,
            rules,
            config,
            store,
            sink,
            state: InterceptorState::AwaitingStart,
            pending_start: None,
        }
    }

    pub fn state(&self) -> InterceptorState {
        self.state
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    pub async fn on_event(&mut self, event: ResponseEvent) -> Result<(), InterceptError> {
        match event {
            ResponseEvent::Start(start) => self.on_start(start),
            ResponseEvent::Body(chunk) => self.on_chunk(chunk).await,
        }
    }

    fn on_start(&mut self, start: ResponseStart) -> Result<(), InterceptError> {
        match self.state {
            InterceptorState::AwaitingStart => {
                // Held back until the first chunk settles the cache decision.
                self.pending_start = Some(start);
                self.state = InterceptorState::BufferedStart;
                Ok(())
            }
            InterceptorState::Done => Err(InterceptError::Completed),
            state => Err(InterceptError::UnexpectedStart { state }),
        }
    }

    async fn on_chunk(&mut self, chunk: BodyChunk) -> Result<(), InterceptError> {
        match self.state {
            InterceptorState::AwaitingStart => Err(InterceptError::ChunkBeforeStart),
            InterceptorState::BufferedStart => {
                let Some(start) = self.pending_start.take() else {
                    return Err(InterceptError::ChunkBeforeStart);
                };
                if chunk.has_more {
                    self.state = InterceptorState::StreamingPassthrough;
                    debug!(
                        path = %self.request.path(),
                        reason = "is_streaming",
                        "response_not_cachable"
                    );
                    self.sink.emit(ResponseEvent::Start(start)).await;
                    self.sink.emit(ResponseEvent::Body(chunk)).await;
                } else {
                    self.state = InterceptorState::Done;
                    let start = self.finish(start, chunk.bytes.clone()).await;
                    self.sink.emit(ResponseEvent::Start(start)).await;
                    self.sink.emit(ResponseEvent::Body(chunk)).await;
                }
                Ok(())
            }
            InterceptorState::StreamingPassthrough => {
                if !chunk.has_more {
                    self.state = InterceptorState::Done;
                }
                self.sink.emit(ResponseEvent::Body(chunk)).await;
                Ok(())
            }
            InterceptorState::Done => Err(InterceptError::Completed),
        }
    }

    /// Classify the materialized response; patch and store when eligible.
    ///
    /// Returns the start event to flush: patched on storage, untouched when
    /// the response failed classification.
    async fn finish(&self, start: ResponseStart, body: Bytes) -> ResponseStart {
        let mut response = CapturedResponse {
            status: start.status,
            headers: start.headers,
            body,
            streaming: false,
        };

        let ttl = match classify::classify_response(&self.rules, &self.config, &self.request, &response)
        {
            Ok(ttl) => ttl,
            Err(_) => {
                // Reason already logged by the classifier.
                return ResponseStart {
                    status: response.status,
                    headers: response.headers,
                };
            }
        };

        // Patch before storing so hits replay the same headers.
        control::patch_headers(&mut response.headers, &CacheDirectives::max_age(ttl.as_secs()));
        response.set_header("x-cache", "miss");

        self.write_entry(&response, ttl).await;

        ResponseStart {
            status: response.status,
            headers: response.headers,
        }
    }

    /// Best-effort store write: payload entry plus the vary index recording
    /// which request headers partition this URL.
    async fn write_entry(&self, response: &CapturedResponse, ttl: Duration) {
        let encoded = match codec::encode_response(response) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(
                    path = %self.request.path(),
                    error = %err,
                    "failed to encode response for caching"
                );
                counter!("riserva_cache_store_error_total").increment(1);
                return;
            }
        };

        let vary = keys::vary_names_from_headers(&response.headers);
        let index_value = match serde_json::to_vec(&vary) {
            Ok(raw) => Bytes::from(raw),
            Err(err) => {
                warn!(
                    path = %self.request.path(),
                    error = %err,
                    "failed to encode vary index for caching"
                );
                counter!("riserva_cache_store_error_total").increment(1);
                return;
            }
        };

        let index_key = keys::vary_index_key(self.request.path_query());
        let payload_key = keys::payload_key(
            self.request.method(),
            self.request.path_query(),
            &vary,
            self.request.headers(),
        );

        for (key, value) in [(index_key, index_value), (payload_key, encoded)] {
            if let Err(err) = self.store.set(&key, value, Some(ttl)).await {
                warn!(
                    path = %self.request.path(),
                    error = %err,
                    "cache store write failed; response not cached"
                );
                counter!("riserva_cache_store_error_total").increment(1);
                return;
            }
        }

        debug!(
            path = %self.request.path(),
            ttl_secs = ttl.as_secs(),
            vary_count = vary.len(),
            "response stored"
        );
    }
}
