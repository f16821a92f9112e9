//! In-memory document store (default, thread-safe, async).
//!
//! Behaves like a document server reached over a connection: collections
//! must be created before use, indexes are created idempotently, and expired
//! documents stay physically present until [`InMemoryConnector::purge_expired`]
//! runs, the way a server-side TTL monitor lags behind the stored timestamp.
//!
//! The connector also counts `connect` calls and can inject failures and
//! latency, which makes it the reference backend for tests.

use super::{
    Collection, Connection, Connector, IndexSpec, EXPIRE_AT_FIELD, KEY_FIELD,
};
use crate::config::TransportOptions;
use crate::entry::CacheEntry;
use crate::error::{Error, Result};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One collection: documents keyed by cache key plus its indexes.
#[derive(Default)]
struct CollectionData {
    documents: DashMap<String, CacheEntry>,
    indexes: DashMap<String, IndexSpec>,
}

impl CollectionData {
    fn purges_on_expire_at(&self) -> bool {
        self.indexes.iter().any(|idx| {
            idx.field == EXPIRE_AT_FIELD && idx.expire_after_seconds.is_some_and(|s| s >= 0)
        })
    }
}

/// Server state shared by every connection from one connector.
#[derive(Default)]
struct ServerState {
    databases: DashMap<String, Arc<DashMap<String, Arc<CollectionData>>>>,
    connect_calls: AtomicUsize,
    fail_connect: AtomicBool,
    fail_index_creation: AtomicBool,
    connect_delay_ms: AtomicU64,
}

/// Connector for the in-memory document store.
///
/// Clones share the same server state.
///
/// # Example
///
/// ```no_run
/// use cache_kit_mongodb::backend::InMemoryConnector;
/// use cache_kit_mongodb::{CacheStore, StoreConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = CacheStore::new(InMemoryConnector::new(), StoreConfig::default())?;
///
///     store.set("session:1", "alice", None).await?;
///     assert!(store.get("session:1").await?.is_some());
///
///     Ok(())
/// }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryConnector {
    state: Arc<ServerState>,
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `connect` has been called.
    pub fn connect_calls(&self) -> usize {
        self.state.connect_calls.load(Ordering::SeqCst)
    }

    /// Make subsequent `connect` calls fail.
    pub fn set_fail_connect(&self, fail: bool) {
        self.state.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `create_index` calls fail.
    pub fn set_fail_index_creation(&self, fail: bool) {
        self.state.fail_index_creation.store(fail, Ordering::SeqCst);
    }

    /// Delay every `connect` call, to widen initialization races.
    pub fn set_connect_delay(&self, delay: Duration) {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.state.connect_delay_ms.store(ms, Ordering::SeqCst);
    }

    /// Run one pass of the TTL monitor across every collection.
    ///
    /// Only collections with an expiry index on `expireAt` are purged.
    /// Returns the number of documents removed.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut removed = 0;
        for db in self.state.databases.iter() {
            for coll in db.iter() {
                if !coll.purges_on_expire_at() {
                    continue;
                }
                let before = coll.documents.len();
                coll.documents.retain(|_, doc| !doc.is_expired_at(now));
                removed += before - coll.documents.len();
            }
        }
        if removed > 0 {
            debug!("✓ InMemory TTL monitor purged {} documents", removed);
        }
        removed
    }

    /// Whether a collection exists in a database.
    pub fn has_collection(&self, database: &str, collection: &str) -> bool {
        self.state
            .databases
            .get(database)
            .is_some_and(|db| db.contains_key(collection))
    }

    /// Indexes defined on a collection, sorted by name.
    pub fn indexes(&self, database: &str, collection: &str) -> Vec<IndexSpec> {
        let mut out: Vec<IndexSpec> = self
            .collection_data(database, collection)
            .map(|c| c.indexes.iter().map(|i| i.value().clone()).collect())
            .unwrap_or_default();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Number of documents physically present, expired or not.
    pub fn document_count(&self, database: &str, collection: &str) -> usize {
        self.collection_data(database, collection)
            .map(|c| c.documents.len())
            .unwrap_or(0)
    }

    /// The raw stored document for a key, bypassing expiry checks.
    pub fn raw_document(&self, database: &str, collection: &str, key: &str) -> Option<CacheEntry> {
        self.collection_data(database, collection)
            .and_then(|c| c.documents.get(key).map(|d| d.value().clone()))
    }

    /// Write a raw document, bypassing the store's write path.
    pub fn insert_raw(&self, database: &str, collection: &str, entry: CacheEntry) {
        let db = self.database(database);
        let coll = db
            .entry(collection.to_string())
            .or_default()
            .clone();
        coll.documents.insert(entry.key.clone(), entry);
    }

    fn database(&self, name: &str) -> Arc<DashMap<String, Arc<CollectionData>>> {
        self.state
            .databases
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    fn collection_data(&self, database: &str, collection: &str) -> Option<Arc<CollectionData>> {
        self.state
            .databases
            .get(database)
            .and_then(|db| db.get(collection).map(|c| c.value().clone()))
    }
}

impl Connector for InMemoryConnector {
    type Connection = InMemoryConnection;

    async fn connect(&self, uri: &str, options: &TransportOptions) -> Result<Self::Connection> {
        self.state.connect_calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.state.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::ConnectionError(format!(
                "connection refused: {}",
                uri
            )));
        }

        let database = database_from_uri(uri).ok_or_else(|| {
            Error::ConnectionError(format!("invalid connection string: {}", uri))
        })?;

        debug!(
            "✓ InMemory connected to database '{}' ({} transport options)",
            database,
            options.len()
        );

        Ok(InMemoryConnection {
            name: database.clone(),
            databases: self.database(&database),
            state: Arc::clone(&self.state),
        })
    }
}

/// Connection to one in-memory database.
#[derive(Clone)]
pub struct InMemoryConnection {
    name: String,
    databases: Arc<DashMap<String, Arc<CollectionData>>>,
    state: Arc<ServerState>,
}

impl InMemoryConnection {
    /// Database this connection is scoped to.
    pub fn database_name(&self) -> &str {
        &self.name
    }
}

impl Connection for InMemoryConnection {
    type Collection = InMemoryCollection;

    async fn collection(&self, name: &str) -> Result<Option<Self::Collection>> {
        Ok(self.databases.get(name).map(|data| InMemoryCollection {
            data: data.value().clone(),
            state: Arc::clone(&self.state),
        }))
    }

    async fn create_collection(&self, name: &str) -> Result<Self::Collection> {
        let data = match self.databases.entry(name.to_string()) {
            Entry::Occupied(existing) => {
                debug!("✓ InMemory collection {} already exists", name);
                existing.get().clone()
            }
            Entry::Vacant(slot) => slot.insert(Arc::default()).clone(),
        };
        Ok(InMemoryCollection {
            data,
            state: Arc::clone(&self.state),
        })
    }
}

/// Handle on one in-memory collection.
#[derive(Clone)]
pub struct InMemoryCollection {
    data: Arc<CollectionData>,
    state: Arc<ServerState>,
}

impl Collection for InMemoryCollection {
    async fn create_index(&self, index: &IndexSpec) -> Result<()> {
        if self.state.fail_index_creation.load(Ordering::SeqCst) {
            return Err(Error::IndexError(format!(
                "failed to create index {}",
                index.name
            )));
        }

        if index.unique && index.field != KEY_FIELD {
            // Documents are stored one per key, so only `key` can be unique.
            return Err(Error::IndexError(format!(
                "unique index on {} is not supported",
                index.field
            )));
        }

        let conflicting = self
            .data
            .indexes
            .iter()
            .find(|i| i.field == index.field || i.name == index.name)
            .map(|i| i.value().clone());

        match conflicting {
            Some(existing) if existing == *index => Ok(()),
            Some(existing) => Err(Error::IndexExists(format!(
                "{} conflicts with existing index {}",
                index.name, existing.name
            ))),
            None => {
                self.data.indexes.insert(index.name.clone(), index.clone());
                Ok(())
            }
        }
    }

    async fn find_one(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.data.documents.get(key).map(|d| d.value().clone()))
    }

    async fn upsert(&self, entry: &CacheEntry) -> Result<()> {
        self.data.documents.insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    async fn delete_one(&self, key: &str) -> Result<u64> {
        Ok(u64::from(self.data.documents.remove(key).is_some()))
    }

    async fn delete_many(&self) -> Result<u64> {
        let count = self.data.documents.len() as u64;
        self.data.documents.clear();
        Ok(count)
    }
}

/// Database name from the path of a `mongodb://` style connection string.
fn database_from_uri(uri: &str) -> Option<String> {
    let (scheme, rest) = uri.split_once("://")?;
    if scheme.is_empty() || rest.is_empty() {
        return None;
    }
    let path = rest
        .split_once('/')
        .map(|(_, p)| p)
        .unwrap_or("");
    let name = path.split('?').next().unwrap_or("");
    if name.is_empty() {
        Some("test".to_string())
    } else {
        Some(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PLATFORM_TS_FIELD;
    use crate::entry::CacheValue;

    const DB: &str = "cache";

    async fn connect(connector: &InMemoryConnector) -> InMemoryConnection {
        connector
            .connect("mongodb://localhost:27017/cache", &TransportOptions::new())
            .await
            .expect("Failed to connect")
    }

    #[test]
    fn test_database_from_uri() {
        assert_eq!(
            database_from_uri("mongodb://localhost:27017/cache"),
            Some("cache".to_string())
        );
        assert_eq!(
            database_from_uri("mongodb://u:p@h1,h2/sessions?replicaSet=rs0"),
            Some("sessions".to_string())
        );
        assert_eq!(
            database_from_uri("mongodb://localhost:27017"),
            Some("test".to_string())
        );
        assert_eq!(database_from_uri("not a uri"), None);
    }

    #[tokio::test]
    async fn test_connect_counts_and_failures() {
        let connector = InMemoryConnector::new();
        connect(&connector).await;
        assert_eq!(connector.connect_calls(), 1);

        connector.set_fail_connect(true);
        let result = connector
            .connect("mongodb://localhost/cache", &TransportOptions::new())
            .await;
        assert!(matches!(result, Err(Error::ConnectionError(_))));
        assert_eq!(connector.connect_calls(), 2);
    }

    #[tokio::test]
    async fn test_collection_lookup_and_create() {
        let connector = InMemoryConnector::new();
        let conn = connect(&connector).await;

        assert!(conn.collection("cacheman").await.unwrap().is_none());
        conn.create_collection("cacheman").await.unwrap();
        assert!(conn.collection("cacheman").await.unwrap().is_some());
        assert!(connector.has_collection(DB, "cacheman"));

        // Creating again hands back the same collection
        let again = conn.create_collection("cacheman").await.unwrap();
        again
            .upsert(&CacheEntry::new(
                "k",
                CacheValue::Text("v".into()),
                Duration::from_secs(60),
                Utc::now(),
            ))
            .await
            .unwrap();
        assert_eq!(connector.document_count(DB, "cacheman"), 1);
    }

    #[tokio::test]
    async fn test_create_index_idempotent() {
        let connector = InMemoryConnector::new();
        let coll = connect(&connector)
            .await
            .create_collection("c")
            .await
            .unwrap();

        let ttl = IndexSpec::expiring(EXPIRE_AT_FIELD, 0);
        coll.create_index(&ttl).await.expect("first create");
        coll.create_index(&ttl).await.expect("identical create");

        let conflicting = IndexSpec::expiring(EXPIRE_AT_FIELD, 3600);
        assert!(matches!(
            coll.create_index(&conflicting).await,
            Err(Error::IndexExists(_))
        ));
        assert_eq!(connector.indexes(DB, "c"), vec![ttl]);
    }

    #[tokio::test]
    async fn test_create_index_failure_injection() {
        let connector = InMemoryConnector::new();
        let coll = connect(&connector)
            .await
            .create_collection("c")
            .await
            .unwrap();

        connector.set_fail_index_creation(true);
        assert!(matches!(
            coll.create_index(&IndexSpec::unique(KEY_FIELD)).await,
            Err(Error::IndexError(_))
        ));
    }

    #[tokio::test]
    async fn test_upsert_replaces_in_place() {
        let connector = InMemoryConnector::new();
        let coll = connect(&connector)
            .await
            .create_collection("c")
            .await
            .unwrap();
        let now = Utc::now();

        coll.upsert(&CacheEntry::new("k", "v1".into(), Duration::from_secs(60), now))
            .await
            .unwrap();
        coll.upsert(&CacheEntry::new("k", "v2".into(), Duration::from_secs(60), now))
            .await
            .unwrap();

        assert_eq!(connector.document_count(DB, "c"), 1);
        let doc = coll.find_one("k").await.unwrap().unwrap();
        assert_eq!(doc.value, CacheValue::Text("v2".into()));
    }

    #[tokio::test]
    async fn test_delete_counts() {
        let connector = InMemoryConnector::new();
        let coll = connect(&connector)
            .await
            .create_collection("c")
            .await
            .unwrap();
        let now = Utc::now();

        for key in ["a", "b", "c"] {
            coll.upsert(&CacheEntry::new(key, "v".into(), Duration::from_secs(60), now))
                .await
                .unwrap();
        }

        assert_eq!(coll.delete_one("a").await.unwrap(), 1);
        assert_eq!(coll.delete_one("a").await.unwrap(), 0);
        assert_eq!(coll.delete_many().await.unwrap(), 2);
        assert_eq!(coll.delete_many().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_purge_requires_expiry_index() {
        let connector = InMemoryConnector::new();
        let conn = connect(&connector).await;
        let with_ttl = conn.create_collection("with_ttl").await.unwrap();
        let platform = conn.create_collection("platform").await.unwrap();

        with_ttl
            .create_index(&IndexSpec::expiring(EXPIRE_AT_FIELD, 0))
            .await
            .unwrap();
        platform
            .create_index(&IndexSpec::expiring(PLATFORM_TS_FIELD, -1))
            .await
            .unwrap();

        let past = Utc::now() - chrono::Duration::seconds(10);
        let expired = CacheEntry::new("old", "v".into(), Duration::from_secs(1), past);
        with_ttl.upsert(&expired).await.unwrap();
        platform.upsert(&expired).await.unwrap();

        assert_eq!(connector.purge_expired(), 1);
        assert!(with_ttl.find_one("old").await.unwrap().is_none());
        assert!(platform.find_one("old").await.unwrap().is_some());
    }
}
