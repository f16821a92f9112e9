//! Cache store - the public get/set/del/reset surface.

use crate::backend::{Collection, Connector};
use crate::bootstrap::Bootstrapper;
use crate::codec;
use crate::config::{ExpiryStrategy, StoreConfig};
use crate::connection::ConnectionManager;
use crate::entry::{ttl_seconds, CacheEntry, CacheValue};
use crate::error::{Error, Result};
use crate::observability::{CacheMetrics, NoOpMetrics};
use crate::serialization::{decode_entity, encode_entity};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::time::{Duration, Instant};

/// Key/value cache on top of a document store collection.
///
/// Every operation first obtains the collection handle from the
/// [`ConnectionManager`], connecting and bootstrapping on first use (exactly
/// once, however many callers race), then performs one round-trip to the
/// backing store. Nothing is cached in-process.
///
/// Expiry is enforced twice: the expiry index lets the server purge dead
/// documents eventually, and every read checks `expireAt` itself so a
/// document the server has not purged yet is still reported absent.
///
/// # Example
///
/// ```no_run
/// use cache_kit_mongodb::backend::InMemoryConnector;
/// use cache_kit_mongodb::{CacheStore, StoreConfig};
/// use std::time::Duration;
///
/// # async fn example() -> cache_kit_mongodb::Result<()> {
/// let config = StoreConfig::default()
///     .with_collection("sessions")
///     .with_compression(true);
/// let store = CacheStore::new(InMemoryConnector::new(), config)?;
///
/// store.set("a", b"x".to_vec(), Some(Duration::from_secs(1))).await?;
/// assert!(store.get("a").await?.is_some());
///
/// assert!(store.del("a").await?);
/// assert!(!store.del("a").await?);
/// # Ok(())
/// # }
/// ```
pub struct CacheStore<C: Connector> {
    manager: ConnectionManager<C>,
    default_ttl: Duration,
    compression: bool,
    strategy: ExpiryStrategy,
    operation_timeout: Option<Duration>,
    metrics: Box<dyn CacheMetrics>,
}

impl<C: Connector> CacheStore<C> {
    /// Create a store. No I/O happens until the first operation.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if the configuration is invalid.
    pub fn new(connector: C, config: StoreConfig) -> Result<Self> {
        config.validate()?;

        let strategy = config.effective_expiry_strategy();
        let bootstrapper = Bootstrapper::new(config.collection.clone(), strategy);
        let manager = ConnectionManager::new(
            connector,
            config.connection_string(),
            config.options.clone(),
            bootstrapper,
        );

        Ok(CacheStore {
            manager,
            default_ttl: config.ttl,
            compression: config.compression,
            strategy,
            operation_timeout: config.operation_timeout,
            metrics: Box::new(NoOpMetrics),
        })
    }

    /// Set custom metrics handler.
    pub fn with_metrics(mut self, metrics: Box<dyn CacheMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn connection_manager(&self) -> &ConnectionManager<C> {
        &self.manager
    }

    pub fn connector(&self) -> &C {
        self.manager.connector()
    }

    pub fn collection_name(&self) -> &str {
        self.manager.bootstrapper().collection_name()
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn compression_enabled(&self) -> bool {
        self.compression
    }

    pub fn expiry_strategy(&self) -> ExpiryStrategy {
        self.strategy
    }

    /// Get a value.
    ///
    /// # Returns
    /// - `Ok(Some(value))` - Live entry, decompressed if it was stored compressed
    /// - `Ok(None)` - No entry, or the entry's `expireAt` is not in the future
    ///
    /// # Errors
    /// - `Error::ConnectionError` / `Error::IndexError` if initialization fails
    /// - `Error::CodecError` if a compressed value cannot be decompressed
    /// - `Error::BackendError` if the lookup fails
    /// - `Error::Timeout` if `operation_timeout` elapses
    pub async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        self.bounded("GET", key, self.get_inner(key)).await
    }

    async fn get_inner(&self, key: &str) -> Result<Option<CacheValue>> {
        let timer = Instant::now();
        let collection = self.manager.acquire().await?;

        let Some(entry) = collection.find_one(key).await? else {
            debug!("✓ Cache GET {} -> MISS", key);
            self.metrics.record_miss(key, timer.elapsed());
            return Ok(None);
        };

        if entry.is_expired_at(Utc::now()) {
            debug!("✓ Cache GET {} -> EXPIRED (expireAt {})", key, entry.expire_at);
            self.metrics.record_expired(key);
            self.metrics.record_miss(key, timer.elapsed());
            return Ok(None);
        }

        let value = if entry.compressed {
            codec::decompress_value(&entry.value)?
        } else {
            entry.value
        };

        debug!("✓ Cache GET {} -> HIT", key);
        self.metrics.record_hit(key, timer.elapsed());
        Ok(Some(value))
    }

    /// Store a value.
    ///
    /// The entry expires `ttl` from now, or after the store's default TTL
    /// when `ttl` is `None` or zero. An existing entry for `key` is replaced
    /// in place. Returns once the backing store has acknowledged the write.
    ///
    /// With compression enabled, byte payloads are gzipped; text and JSON
    /// values are stored raw.
    ///
    /// # Errors
    /// - `Error::ConnectionError` / `Error::IndexError` if initialization fails
    /// - `Error::CodecError` if compression fails
    /// - `Error::BackendError` if the write fails
    /// - `Error::Timeout` if `operation_timeout` elapses
    pub async fn set(
        &self,
        key: &str,
        value: impl Into<CacheValue>,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let value = value.into();
        self.bounded("SET", key, self.set_inner(key, value, ttl)).await
    }

    async fn set_inner(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> Result<()> {
        let timer = Instant::now();
        let collection = self.manager.acquire().await?;

        let ttl = self.effective_ttl(ttl);
        let entry = self.build_entry(key, value, ttl)?;
        collection.upsert(&entry).await?;

        debug!(
            "✓ Cache SET {} (TTL: {:?}{})",
            key,
            ttl,
            if entry.compressed { ", compressed" } else { "" }
        );
        self.metrics.record_set(key, timer.elapsed());
        Ok(())
    }

    /// Delete a value. Returns whether an entry was removed.
    ///
    /// # Errors
    /// - `Error::ConnectionError` / `Error::IndexError` if initialization fails
    /// - `Error::BackendError` if the delete fails
    /// - `Error::Timeout` if `operation_timeout` elapses
    pub async fn del(&self, key: &str) -> Result<bool> {
        self.bounded("DEL", key, async {
            let timer = Instant::now();
            let collection = self.manager.acquire().await?;
            let removed = collection.delete_one(key).await? > 0;

            debug!("✓ Cache DELETE {} (removed: {})", key, removed);
            self.metrics.record_delete(key, timer.elapsed());
            Ok(removed)
        })
        .await
    }

    /// Remove every entry in this store's collection.
    ///
    /// Other collections in the same database are untouched.
    ///
    /// # Errors
    /// - `Error::ConnectionError` / `Error::IndexError` if initialization fails
    /// - `Error::BackendError` if the delete fails
    /// - `Error::Timeout` if `operation_timeout` elapses
    pub async fn reset(&self) -> Result<()> {
        let name = self.collection_name().to_string();
        self.bounded("RESET", &name, async {
            let collection = self.manager.acquire().await?;
            let removed = collection.delete_many().await?;
            warn!(
                "⚠ Cache RESET executed - {} entries removed from {}",
                removed, name
            );
            self.metrics.record_reset(&name, removed);
            Ok(())
        })
        .await
    }

    /// Whether a value may be cached: anything except missing or JSON `null`.
    pub fn is_cacheable(value: Option<&CacheValue>) -> bool {
        value.is_some_and(|v| !v.is_null())
    }

    /// Store a typed value as a versioned postcard envelope.
    ///
    /// # Errors
    /// Same as [`set`](Self::set), plus `Error::SerializationError`.
    pub async fn set_entity<T: Serialize>(
        &self,
        key: &str,
        entity: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let bytes = encode_entity(entity)?;
        self.set(key, CacheValue::Bytes(bytes), ttl).await
    }

    /// Get a typed value stored with [`set_entity`](Self::set_entity).
    ///
    /// # Errors
    /// Same as [`get`](Self::get), plus `Error::InvalidCacheEntry`,
    /// `Error::VersionMismatch` and `Error::DeserializationError`.
    pub async fn get_entity<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(CacheValue::Bytes(bytes)) => decode_entity(&bytes).map(Some),
            Some(_) => Err(Error::InvalidCacheEntry(format!(
                "value for {} is not a typed entry",
                key
            ))),
            None => Ok(None),
        }
    }

    /// Health check - verify the collection can be initialized.
    ///
    /// # Errors
    /// Returns the initialization error if connecting or bootstrapping fails.
    pub async fn health_check(&self) -> Result<bool> {
        self.bounded("PING", self.collection_name(), async {
            self.manager.acquire().await?;
            Ok(true)
        })
        .await
    }

    fn effective_ttl(&self, ttl: Option<Duration>) -> Duration {
        ttl.filter(|t| !t.is_zero()).unwrap_or(self.default_ttl)
    }

    fn build_entry(&self, key: &str, value: CacheValue, ttl: Duration) -> Result<CacheEntry> {
        let mut entry = CacheEntry::new(key, value, ttl, Utc::now());

        if self.compression && entry.value.as_bytes().is_some() {
            entry.value = codec::compress_value(&entry.value)?;
            entry.compressed = true;
        }

        if self.strategy == ExpiryStrategy::PlatformTimestamp {
            entry.ttl = Some(ttl_seconds(ttl));
        }

        Ok(entry)
    }

    async fn bounded<T>(
        &self,
        op: &str,
        key: &str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let result = match self.operation_timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(format!(
                    "{} {} exceeded {:?}",
                    op, key, limit
                ))),
            },
            None => fut.await,
        };

        if let Err(e) = &result {
            self.metrics.record_error(key, &e.to_string());
        }
        result
    }
}
