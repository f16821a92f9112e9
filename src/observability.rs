//! Metrics hooks for store operations.
//!
//! Plug a [`CacheMetrics`] implementation into
//! [`CacheStore::with_metrics`](crate::CacheStore::with_metrics) to export
//! hit ratios and latencies:
//!
//! ```ignore
//! use cache_kit_mongodb::observability::CacheMetrics;
//! use std::time::Duration;
//!
//! struct StatsdMetrics;
//!
//! impl CacheMetrics for StatsdMetrics {
//!     fn record_hit(&self, _key: &str, elapsed: Duration) {
//!         // statsd.timing("cache.get.hit", elapsed);
//!     }
//! }
//!
//! let store = CacheStore::new(connector, config)?.with_metrics(Box::new(StatsdMetrics));
//! ```
//!
//! Hooks left unimplemented log through the `log` crate. The store installs
//! [`NoOpMetrics`] until told otherwise.
//!
//! A read that finds a document past its `expireAt` reports both
//! `record_expired()` and `record_miss()`. It is a normal data state and
//! never reaches `record_error()`.

use std::time::Duration;

/// Receives one callback per completed store operation.
pub trait CacheMetrics: Send + Sync {
    /// A `get` returned a live value.
    fn record_hit(&self, key: &str, elapsed: Duration) {
        debug!("metrics: GET {} hit in {:?}", key, elapsed);
    }

    /// A `get` found nothing, or only a logically expired document.
    fn record_miss(&self, key: &str, elapsed: Duration) {
        debug!("metrics: GET {} miss in {:?}", key, elapsed);
    }

    /// A `get` found a document the server has not purged yet.
    fn record_expired(&self, key: &str) {
        debug!("metrics: GET {} found an unpurged expired document", key);
    }

    /// A `set` was acknowledged.
    fn record_set(&self, key: &str, elapsed: Duration) {
        debug!("metrics: SET {} in {:?}", key, elapsed);
    }

    /// A `del` completed, whether or not anything was removed.
    fn record_delete(&self, key: &str, elapsed: Duration) {
        debug!("metrics: DEL {} in {:?}", key, elapsed);
    }

    /// A `reset` cleared the collection.
    fn record_reset(&self, collection: &str, removed: u64) {
        debug!("metrics: RESET {} removed {}", collection, removed);
    }

    /// An operation failed. `key` is the collection name for `reset`.
    fn record_error(&self, key: &str, error: &str) {
        warn!("metrics: operation on {} failed: {}", key, error);
    }
}

/// Discards every callback.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpMetrics;

impl CacheMetrics for NoOpMetrics {
    fn record_hit(&self, _: &str, _: Duration) {}
    fn record_miss(&self, _: &str, _: Duration) {}
    fn record_expired(&self, _: &str) {}
    fn record_set(&self, _: &str, _: Duration) {}
    fn record_delete(&self, _: &str, _: Duration) {}
    fn record_reset(&self, _: &str, _: u64) {}
    fn record_error(&self, _: &str, _: &str) {}
}
