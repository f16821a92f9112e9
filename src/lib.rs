//! # cache-kit-mongodb
//!
//! A cache store on top of a MongoDB collection: get/set/del/reset with
//! per-entry TTL, optional gzip compression and idempotent bootstrap.
//!
//! ## Features
//!
//! - **Lazy, single-flight init:** The first operation connects and creates the
//!   collection and indexes, exactly once even when many callers race
//! - **Idempotent bootstrap:** Existing collections and indexes are reused, so
//!   restarts never fail
//! - **Two-level expiry:** A TTL index purges dead documents eventually; reads
//!   check `expireAt` so dead documents are never returned
//! - **Compression:** Byte payloads are gzipped when enabled
//! - **Pluggable driver:** In-memory store by default, MongoDB behind the
//!   `mongodb` feature
//!
//! ## Quick Start
//!
//! ```ignore
//! use cache_kit_mongodb::{CacheStore, StoreConfig};
//! use cache_kit_mongodb::backend::MongoConnector;
//! use std::time::Duration;
//!
//! let config = StoreConfig::default()
//!     .with_uri("mongodb://localhost:27017/cache")
//!     .with_collection("sessions")
//!     .with_ttl(Duration::from_secs(300))
//!     .with_option("maxPoolSize", "20");
//!
//! let store = CacheStore::new(MongoConnector::new(), config)?;
//!
//! store.set("session:1", b"payload".to_vec(), None).await?;
//! let value = store.get("session:1").await?;
//! store.del("session:1").await?;
//! store.reset().await?;
//! ```

#[macro_use]
extern crate log;

pub mod backend;
pub mod bootstrap;
pub mod codec;
pub mod config;
pub mod connection;
pub mod entry;
pub mod error;
pub mod observability;
pub mod serialization;
pub mod store;

// Re-exports for convenience
pub use backend::{Collection, Connection, Connector};
pub use bootstrap::Bootstrapper;
pub use config::{ExpiryStrategy, StoreConfig, TransportOptions};
pub use connection::ConnectionManager;
pub use entry::{CacheEntry, CacheValue};
pub use error::{Error, Result};
pub use store::CacheStore;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
