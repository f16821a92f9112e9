//! MongoDB backend implementation.
//!
//! Entries are stored one document per key:
//!
//! ```text
//! { key: "session:1", value: BinData(0, ...), expireAt: ISODate(...), compressed: true, ttl: 60 }
//! ```
//!
//! `ttl` is only written under the platform-timestamp expiry strategy.

use super::{
    Collection, Connection, Connector, IndexSpec, COMPRESSED_FIELD, EXPIRE_AT_FIELD, KEY_FIELD,
    TTL_FIELD, VALUE_FIELD,
};
use crate::config::TransportOptions;
use crate::connection::redact;
use crate::entry::{CacheEntry, CacheValue};
use crate::error::{Error, Result};
use ::mongodb::bson::spec::BinarySubtype;
use ::mongodb::bson::{doc, Binary, Bson, DateTime as BsonDateTime, Document};
use ::mongodb::error::{Error as MongoError, ErrorKind};
use ::mongodb::options::ClientOptions;
use ::mongodb::{Client, Database};
use chrono::{DateTime, TimeZone, Utc};

/// Database used when the connection string names none.
const DEFAULT_DATABASE: &str = "cache";

// Server error codes
const NAMESPACE_EXISTS: i32 = 48;
const INDEX_ALREADY_EXISTS: i32 = 68;
const INDEX_OPTIONS_CONFLICT: i32 = 85;
const INDEX_KEY_SPECS_CONFLICT: i32 = 86;

/// Connector for MongoDB (and wire-compatible platforms).
///
/// # Example
///
/// ```no_run
/// # use cache_kit_mongodb::backend::MongoConnector;
/// # use cache_kit_mongodb::{CacheStore, StoreConfig};
/// # async fn example() -> cache_kit_mongodb::Result<()> {
/// let config = StoreConfig::default()
///     .with_uri("mongodb://localhost:27017/cache")
///     .with_option("maxPoolSize", "20");
/// let store = CacheStore::new(MongoConnector::new(), config)?;
///
/// store.set("key", b"value".to_vec(), None).await?;
/// let value = store.get("key").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct MongoConnector;

impl MongoConnector {
    pub fn new() -> Self {
        MongoConnector
    }
}

impl Connector for MongoConnector {
    type Connection = MongoConnection;

    async fn connect(&self, uri: &str, options: &TransportOptions) -> Result<Self::Connection> {
        let full_uri = options.apply_to_uri(uri);
        let client_options = ClientOptions::parse(full_uri.as_str())
            .await
            .map_err(|e| {
                Error::ConnectionError(format!("Invalid connection string {}: {}", redact(uri), e))
            })?;

        let database = client_options
            .default_database
            .clone()
            .unwrap_or_else(|| DEFAULT_DATABASE.to_string());

        let client = Client::with_options(client_options)
            .map_err(|e| Error::ConnectionError(format!("Failed to create MongoDB client: {}", e)))?;
        let db = client.database(&database);

        // The driver connects lazily; ping so an unreachable server fails here.
        db.run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| Error::ConnectionError(format!("MongoDB ping failed: {}", e)))?;

        info!(
            "✓ MongoDB connected: {} (database: {}, {} transport options)",
            redact(uri),
            database,
            options.len()
        );

        Ok(MongoConnection { client, db })
    }
}

/// Connection to one MongoDB database.
#[derive(Clone, Debug)]
pub struct MongoConnection {
    client: Client,
    db: Database,
}

impl MongoConnection {
    /// The underlying driver client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn database_name(&self) -> &str {
        self.db.name()
    }

    fn handle(&self, name: &str) -> MongoCollection {
        MongoCollection {
            db: self.db.clone(),
            name: name.to_string(),
            inner: self.db.collection::<Document>(name),
        }
    }
}

impl Connection for MongoConnection {
    type Collection = MongoCollection;

    async fn collection(&self, name: &str) -> Result<Option<Self::Collection>> {
        let names = self
            .db
            .list_collection_names()
            .filter(doc! { "name": name })
            .await
            .map_err(|e| Error::ConnectionError(format!("listCollections failed: {}", e)))?;

        Ok(names.iter().any(|n| n == name).then(|| self.handle(name)))
    }

    async fn create_collection(&self, name: &str) -> Result<Self::Collection> {
        match self.db.create_collection(name).await {
            Ok(()) => debug!("✓ MongoDB collection {} created", name),
            Err(e) if command_code(&e) == Some(NAMESPACE_EXISTS) => {
                debug!("✓ MongoDB collection {} created concurrently", name);
            }
            Err(e) => {
                return Err(Error::ConnectionError(format!(
                    "create collection {} failed: {}",
                    name, e
                )))
            }
        }
        Ok(self.handle(name))
    }
}

/// Handle on one MongoDB collection.
#[derive(Clone, Debug)]
pub struct MongoCollection {
    db: Database,
    name: String,
    inner: ::mongodb::Collection<Document>,
}

impl Collection for MongoCollection {
    async fn create_index(&self, index: &IndexSpec) -> Result<()> {
        // Issued as a raw command: the driver's index options cannot express
        // a negative expireAfterSeconds.
        let command = create_indexes_command(&self.name, index);

        match self.db.run_command(command).await {
            Ok(_) => Ok(()),
            Err(e) => match command_code(&e) {
                Some(INDEX_ALREADY_EXISTS | INDEX_OPTIONS_CONFLICT | INDEX_KEY_SPECS_CONFLICT) => {
                    Err(Error::IndexExists(e.to_string()))
                }
                _ => Err(Error::IndexError(format!(
                    "createIndexes {} on {} failed: {}",
                    index.name, self.name, e
                ))),
            },
        }
    }

    async fn find_one(&self, key: &str) -> Result<Option<CacheEntry>> {
        let found = self
            .inner
            .find_one(doc! { "key": key })
            .await
            .map_err(|e| Error::BackendError(format!("MongoDB findOne failed for key {}: {}", key, e)))?;

        found.map(document_to_entry).transpose()
    }

    async fn upsert(&self, entry: &CacheEntry) -> Result<()> {
        let replacement = entry_to_document(entry)?;
        self.inner
            .replace_one(doc! { "key": entry.key.as_str() }, replacement)
            .upsert(true)
            .await
            .map_err(|e| {
                Error::BackendError(format!("MongoDB upsert failed for key {}: {}", entry.key, e))
            })?;
        Ok(())
    }

    async fn delete_one(&self, key: &str) -> Result<u64> {
        let result = self
            .inner
            .delete_one(doc! { "key": key })
            .await
            .map_err(|e| {
                Error::BackendError(format!("MongoDB deleteOne failed for key {}: {}", key, e))
            })?;
        Ok(result.deleted_count)
    }

    async fn delete_many(&self) -> Result<u64> {
        let result = self
            .inner
            .delete_many(doc! {})
            .await
            .map_err(|e| Error::BackendError(format!("MongoDB deleteMany failed: {}", e)))?;
        Ok(result.deleted_count)
    }
}

fn command_code(e: &MongoError) -> Option<i32> {
    match e.kind.as_ref() {
        ErrorKind::Command(command) => Some(command.code),
        _ => None,
    }
}

fn create_indexes_command(collection: &str, index: &IndexSpec) -> Document {
    let mut keys = Document::new();
    keys.insert(index.field.clone(), 1i32);

    let mut spec = Document::new();
    spec.insert("key", keys);
    spec.insert("name", index.name.clone());
    if index.unique {
        spec.insert("unique", true);
    }
    if let Some(secs) = index.expire_after_seconds {
        spec.insert("expireAfterSeconds", secs);
    }

    let mut command = Document::new();
    command.insert("createIndexes", collection.to_string());
    command.insert("indexes", vec![Bson::Document(spec)]);
    command
}

fn entry_to_document(entry: &CacheEntry) -> Result<Document> {
    let mut document = Document::new();
    document.insert(KEY_FIELD, entry.key.clone());
    document.insert(VALUE_FIELD, value_to_bson(&entry.value)?);
    document.insert(
        EXPIRE_AT_FIELD,
        BsonDateTime::from_millis(entry.expire_at.timestamp_millis()),
    );
    document.insert(COMPRESSED_FIELD, entry.compressed);
    if let Some(ttl) = entry.ttl {
        document.insert(TTL_FIELD, ttl);
    }
    Ok(document)
}

fn document_to_entry(document: Document) -> Result<CacheEntry> {
    let key = document
        .get_str(KEY_FIELD)
        .map_err(|e| malformed("key", e))?
        .to_string();

    let millis = document
        .get_datetime(EXPIRE_AT_FIELD)
        .map_err(|e| malformed("expireAt", e))?
        .timestamp_millis();
    let expire_at: DateTime<Utc> = Utc
        .timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| Error::BackendError(format!("expireAt out of range for key {}", key)))?;

    let value = document
        .get(VALUE_FIELD)
        .cloned()
        .map(bson_to_value)
        .ok_or_else(|| Error::BackendError(format!("missing value for key {}", key)))?;

    let compressed = document.get_bool(COMPRESSED_FIELD).unwrap_or(false);
    let ttl = match document.get(TTL_FIELD) {
        Some(Bson::Int32(v)) => Some(i64::from(*v)),
        Some(Bson::Int64(v)) => Some(*v),
        _ => None,
    };

    Ok(CacheEntry {
        key,
        value,
        expire_at,
        compressed,
        ttl,
    })
}

fn value_to_bson(value: &CacheValue) -> Result<Bson> {
    Ok(match value {
        CacheValue::Bytes(bytes) => Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes: bytes.clone(),
        }),
        CacheValue::Text(text) => Bson::String(text.clone()),
        CacheValue::Json(json) => ::mongodb::bson::to_bson(json)
            .map_err(|e| Error::SerializationError(format!("JSON value to BSON: {}", e)))?,
    })
}

fn bson_to_value(value: Bson) -> CacheValue {
    match value {
        Bson::Binary(binary) => CacheValue::Bytes(binary.bytes),
        Bson::String(text) => CacheValue::Text(text),
        other => CacheValue::Json(other.into_relaxed_extjson()),
    }
}

fn malformed(field: &str, e: impl std::fmt::Display) -> Error {
    Error::BackendError(format!("malformed cache document ({}): {}", field, e))
}
