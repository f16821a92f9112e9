//! Idempotent collection and index bootstrap.
//!
//! Runs once per store, right after connecting. Every step tolerates state
//! left by earlier runs or by other processes: an existing collection is
//! reused and an existing index is accepted.

use crate::backend::{
    Collection, Connection, IndexSpec, EXPIRE_AT_FIELD, KEY_FIELD, PLATFORM_TS_FIELD,
};
use crate::config::ExpiryStrategy;
use crate::error::{Error, Result};

/// Ensures the cache collection exists with its indexes.
#[derive(Clone, Debug)]
pub struct Bootstrapper {
    collection: String,
    strategy: ExpiryStrategy,
}

impl Bootstrapper {
    pub fn new(collection: impl Into<String>, strategy: ExpiryStrategy) -> Self {
        Bootstrapper {
            collection: collection.into(),
            strategy,
        }
    }

    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    pub fn strategy(&self) -> ExpiryStrategy {
        self.strategy
    }

    /// Indexes required for the configured expiry strategy.
    ///
    /// | Strategy | Expiry index |
    /// |----------|--------------|
    /// | `ExpireAtField` | `expireAt`, `expireAfterSeconds: 0` |
    /// | `PlatformTimestamp` | `_ts`, `expireAfterSeconds: -1` |
    ///
    /// Both strategies also get a unique index on `key`.
    pub fn indexes(&self) -> Vec<IndexSpec> {
        let expiry = match self.strategy {
            ExpiryStrategy::ExpireAtField => IndexSpec::expiring(EXPIRE_AT_FIELD, 0),
            ExpiryStrategy::PlatformTimestamp => IndexSpec::expiring(PLATFORM_TS_FIELD, -1),
        };
        vec![IndexSpec::unique(KEY_FIELD), expiry]
    }

    /// Find or create the collection, then ensure its indexes.
    ///
    /// # Errors
    /// - `Error::ConnectionError` if the collection cannot be looked up or created
    /// - `Error::IndexError` if an index cannot be created, or if a conflicting
    ///   non-unique index already occupies the `key` field. A conflicting
    ///   expiry index is kept with a warning.
    pub async fn ensure_collection<C: Connection>(&self, connection: &C) -> Result<C::Collection> {
        let collection = match connection
            .collection(&self.collection)
            .await
            .map_err(as_connection_error)?
        {
            Some(existing) => {
                debug!("✓ Collection {} exists", self.collection);
                existing
            }
            None => {
                info!("Creating collection {}", self.collection);
                connection
                    .create_collection(&self.collection)
                    .await
                    .map_err(as_connection_error)?
            }
        };

        for index in self.indexes() {
            ensure_index(&collection, &index).await?;
        }

        Ok(collection)
    }
}

async fn ensure_index<T: Collection>(collection: &T, index: &IndexSpec) -> Result<()> {
    match collection.create_index(index).await {
        Ok(()) => {
            debug!("✓ Index {} ready", index.name);
            Ok(())
        }
        // Keys are only distinct if the index enforcing it is really there.
        Err(Error::IndexExists(msg)) if index.unique => Err(Error::IndexError(format!(
            "existing index on {} is not the required unique index: {}",
            index.field, msg
        ))),
        Err(Error::IndexExists(msg)) => {
            warn!("⚠ Keeping existing index for {}: {}", index.field, msg);
            Ok(())
        }
        Err(Error::IndexError(msg)) => Err(Error::IndexError(msg)),
        Err(other) => Err(Error::IndexError(format!(
            "creating index {} failed: {}",
            index.name, other
        ))),
    }
}

fn as_connection_error(e: Error) -> Error {
    match e {
        Error::ConnectionError(_) => e,
        other => Error::ConnectionError(other.to_string()),
    }
}
