//! Riserva HTTP response cache.
//!
//! Caches responses to idempotent-read requests behind an axum middleware
//! layer:
//!
//! - **Rules** decide which paths and statuses are eligible and for how long.
//! - **Interception** buffers a response until its first body chunk reveals
//!   whether it is complete or streaming, classifies it, and stores eligible
//!   responses without ever blocking delivery to the caller.
//! - **Vary-aware keys** partition the cache per URL by the request headers a
//!   stored response declares as varying.
//! - **Invalidation** removes the entry for a resource when a mutating
//!   request to it succeeds, or on demand through [`CacheScope`].
//!
//! ## Usage
//!
//! ```ignore
//! let state = CacheState::with_memory_store(CacheConfig::default(), vec![Rule::new()]);
//! let app = Router::new()
//!     .route("/", get(handler))
//!     .layer(middleware::from_fn_with_state(state, response_cache_layer));
//! ```
//!
//! The backing store is any [`CacheStore`] implementation; a bounded
//! in-memory [`MemoryStore`] ships with the crate.

mod classify;
mod codec;
mod config;
mod control;
mod error;
mod events;
mod interceptor;
mod invalidate;
mod keys;
mod middleware;
mod request;
mod rules;
mod store;
pub mod telemetry;

pub use classify::{check_request, classify_response};
pub use codec::{CapturedResponse, CodecError, decode_response, encode_response};
pub use config::CacheConfig;
pub use control::{CacheDirectives, http_date, merge_cache_control, patch_header_map, patch_headers};
pub use error::{CacheError, NotCachableReason};
pub use events::{BodyChunk, BufferSink, ResponseEvent, ResponseSink, ResponseStart};
pub use interceptor::{InterceptError, InterceptorState, ResponseInterceptor};
pub use invalidate::invalidate;
pub use keys::{payload_key, vary_index_key, vary_names_from_headers};
pub use middleware::{CacheScope, CacheState, cache_control_layer, response_cache_layer};
pub use request::RequestDescriptor;
pub use rules::{PathMatch, Rule, match_request, match_response};
pub use store::{CacheStore, MemoryStore, StoreError};
