//! Cache invalidation.
//!
//! A mutating request whose response succeeds (2xx or 3xx, including
//! redirects to the changed resource) deletes the entry keyed to its URL.
//! Failed mutations leave the cache untouched. The same routine backs
//! manual invalidation through the middleware's request-scoped handle.

use axum::http::{HeaderMap, Method};
use metrics::counter;
use tracing::{debug, warn};

use crate::keys;
use crate::store::CacheStore;

/// Mutation outcomes that trigger invalidation.
pub(crate) fn is_invalidating_status(status: u16) -> bool {
    (200..400).contains(&status)
}

/// Delete the entry for `path_query` as keyed by `headers`.
///
/// The vary index is consulted to re-derive the payload key from the same
/// inputs used at store time, then both the payload and the index are
/// deleted; variants keyed under other header values become unreachable and
/// age out via TTL. Store failures are logged and metered, never surfaced.
pub async fn invalidate(store: &dyn CacheStore, path_query: &str, headers: &HeaderMap) {
    let index_key = keys::vary_index_key(path_query);
    let vary: Vec<String> = match store.get(&index_key).await {
        Ok(Some(raw)) => serde_json::from_slice(&raw).unwrap_or_default(),
        Ok(None) => Vec::new(),
        Err(err) => {
            warn!(
                path_query,
                error = %err,
                "cache invalidation lookup failed"
            );
            counter!("riserva_cache_store_error_total").increment(1);
            return;
        }
    };

    let payload_key = keys::payload_key(&Method::GET, path_query, &vary, headers);
    for key in [payload_key, index_key] {
        if let Err(err) = store.delete(&key).await {
            warn!(
                path_query,
                error = %err,
                "cache invalidation delete failed"
            );
            counter!("riserva_cache_store_error_total").increment(1);
            return;
        }
    }

    counter!("riserva_cache_invalidation_total").increment(1);
    debug!(path_query, "cache entry invalidated");
}
