//! Backing document store interface and implementations.
//!
//! The store consumes the driver through three traits mirroring the driver's
//! object model: a [`Connector`] opens a [`Connection`] (a database), which
//! hands out [`Collection`]s. Only the operations the cache needs are part of
//! the contract.

use crate::entry::CacheEntry;
use crate::error::Result;

#[cfg(feature = "inmemory")]
pub mod inmemory;
#[cfg(feature = "mongodb")]
pub mod mongodb;

#[cfg(feature = "inmemory")]
pub use inmemory::{InMemoryConnection, InMemoryConnector, InMemoryCollection};
#[cfg(feature = "mongodb")]
pub use self::mongodb::{MongoCollection, MongoConnection, MongoConnector};

use crate::config::TransportOptions;
use std::future::Future;

/// Document field holding the cache key.
pub const KEY_FIELD: &str = "key";
/// Document field holding the value.
pub const VALUE_FIELD: &str = "value";
/// Document field holding the absolute expiry timestamp.
pub const EXPIRE_AT_FIELD: &str = "expireAt";
/// Document field flagging compressed values.
pub const COMPRESSED_FIELD: &str = "compressed";
/// Per-document TTL in seconds, for platform-timestamp expiry.
pub const TTL_FIELD: &str = "ttl";
/// Platform-maintained last-modified timestamp.
pub const PLATFORM_TS_FIELD: &str = "_ts";

/// Single-field ascending index definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub field: String,
    pub unique: bool,
    /// `expireAfterSeconds`. `Some(0)` purges at the stored timestamp,
    /// `Some(-1)` never purges from the index alone.
    pub expire_after_seconds: Option<i64>,
}

impl IndexSpec {
    /// Unique index on `field`.
    pub fn unique(field: &str) -> Self {
        IndexSpec {
            name: format!("{}_1", field),
            field: field.to_string(),
            unique: true,
            expire_after_seconds: None,
        }
    }

    /// TTL index on `field`.
    pub fn expiring(field: &str, expire_after_seconds: i64) -> Self {
        IndexSpec {
            name: format!("{}_1", field),
            field: field.to_string(),
            unique: false,
            expire_after_seconds: Some(expire_after_seconds),
        }
    }
}

/// Opens connections to the backing store.
///
/// **ASYNC:** Every method returns a `Send` future, so initialization can
/// run on its own task. Implementations may still write `async fn`.
pub trait Connector: Send + Sync + 'static {
    type Connection: Connection;

    /// Open a connection.
    ///
    /// `options` has already been filtered through the allow-list.
    ///
    /// # Errors
    /// Returns `Err` if the store is unreachable or rejects the credentials.
    fn connect(
        &self,
        uri: &str,
        options: &TransportOptions,
    ) -> impl Future<Output = Result<Self::Connection>> + Send;
}

/// A live connection scoped to one database.
pub trait Connection: Send + Sync + 'static {
    type Collection: Collection;

    /// Look up an existing collection.
    ///
    /// # Returns
    /// - `Ok(Some(handle))` - Collection exists
    /// - `Ok(None)` - Collection does not exist (expected on first run)
    ///
    /// # Errors
    /// Returns `Err` if the lookup itself fails.
    fn collection(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<Self::Collection>>> + Send;

    /// Create a collection.
    ///
    /// Implementations should return the existing collection when another
    /// client created it concurrently.
    ///
    /// # Errors
    /// Returns `Err` if creation fails.
    fn create_collection(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Self::Collection>> + Send;
}

/// A handle on one collection of cache entries.
///
/// **IMPORTANT:** All methods use `&self`; handles are shared by every
/// concurrent operation once initialized.
pub trait Collection: Send + Sync + Clone + 'static {
    /// Create an index.
    ///
    /// # Errors
    /// - `Error::IndexExists` if an index on the same field already exists
    ///   with different options
    /// - `Error::IndexError` for any other failure
    ///
    /// Creating an identical index again succeeds.
    fn create_index(&self, index: &IndexSpec) -> impl Future<Output = Result<()>> + Send;

    /// Find the entry with the given key, expired or not.
    ///
    /// # Errors
    /// Returns `Err` if the lookup fails or the document is malformed.
    fn find_one(&self, key: &str) -> impl Future<Output = Result<Option<CacheEntry>>> + Send;

    /// Insert the entry or replace the existing one with the same key.
    ///
    /// The write must be acknowledged before this returns.
    ///
    /// # Errors
    /// Returns `Err` if the write fails.
    fn upsert(&self, entry: &CacheEntry) -> impl Future<Output = Result<()>> + Send;

    /// Delete the entry with the given key. Returns the number removed.
    ///
    /// # Errors
    /// Returns `Err` if the delete fails.
    fn delete_one(&self, key: &str) -> impl Future<Output = Result<u64>> + Send;

    /// Delete every entry in the collection. Returns the number removed.
    ///
    /// # Errors
    /// Returns `Err` if the delete fails.
    fn delete_many(&self) -> impl Future<Output = Result<u64>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_spec_constructors() {
        let unique = IndexSpec::unique(KEY_FIELD);
        assert_eq!(unique.name, "key_1");
        assert!(unique.unique);
        assert_eq!(unique.expire_after_seconds, None);

        let ttl = IndexSpec::expiring(EXPIRE_AT_FIELD, 0);
        assert_eq!(ttl.name, "expireAt_1");
        assert!(!ttl.unique);
        assert_eq!(ttl.expire_after_seconds, Some(0));
    }
}
