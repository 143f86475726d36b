//! Metric descriptions for the cache engine.
//!
//! Counters are emitted unconditionally at decision points; call
//! [`describe_metrics`] once after installing a recorder to attach units
//! and help text.

use std::sync::Once;

use metrics::{Unit, describe_counter};

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Register metric descriptions with the installed recorder.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "riserva_cache_hit_total",
            Unit::Count,
            "Total number of response cache hits."
        );
        describe_counter!(
            "riserva_cache_miss_total",
            Unit::Count,
            "Total number of response cache misses."
        );
        describe_counter!(
            "riserva_cache_store_error_total",
            Unit::Count,
            "Total number of cache store operations that failed."
        );
        describe_counter!(
            "riserva_cache_invalidation_total",
            Unit::Count,
            "Total number of cache invalidations."
        );
    });
}
