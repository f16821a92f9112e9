//! Basic usage of the cache store against the in-memory document store.
//!
//! Swap `InMemoryConnector` for `backend::MongoConnector` (feature `mongodb`)
//! to run the same flow against a real server.

use cache_kit_mongodb::backend::InMemoryConnector;
use cache_kit_mongodb::error::Result;
use cache_kit_mongodb::{CacheStore, CacheValue, StoreConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Serialize, Deserialize, Debug)]
struct Session {
    user_id: u64,
    user_name: String,
    roles: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Debug)
        .try_init()
        .ok();

    println!("\n=== cache-kit-mongodb - Basic Example ===\n");

    // 1. Configure the store. Nothing connects yet.
    println!("1. Creating store (collection 'sessions', compression on)...");
    let connector = InMemoryConnector::new();
    let config = StoreConfig::default()
        .with_collection("sessions")
        .with_ttl(Duration::from_secs(300))
        .with_compression(true)
        .with_option("maxPoolSize", "10");
    let store = CacheStore::new(connector.clone(), config)?;
    println!("   ✓ Store created, connected: {}\n", store.connection_manager().is_ready());

    // 2. First write connects and bootstraps the collection
    println!("2. Writing a raw value:");
    store
        .set("cookie:abc", "user-42", Some(Duration::from_secs(1)))
        .await?;
    println!("   ✓ Connected after first operation ({} connect call)\n", connector.connect_calls());

    // 3. Read it back
    println!("3. Reading it back:");
    if let Some(CacheValue::Text(user)) = store.get("cookie:abc").await? {
        println!("   ✓ cookie:abc -> {}\n", user);
    }

    // 4. Typed values go through a versioned envelope and get compressed
    println!("4. Typed value:");
    let session = Session {
        user_id: 42,
        user_name: "alice".to_string(),
        roles: vec!["admin".to_string(), "billing".to_string()],
    };
    store.set_entity("session:42", &session, None).await?;
    let loaded: Option<Session> = store.get_entity("session:42").await?;
    println!("   ✓ session:42 -> {:?}\n", loaded);

    // 5. Expiry is enforced on read before the TTL monitor purges
    println!("5. Waiting for cookie:abc to expire...");
    tokio::time::sleep(Duration::from_millis(1100)).await;
    println!("   ✓ cookie:abc -> {:?}", store.get("cookie:abc").await?);
    println!("   ✓ TTL monitor purged {} document(s)\n", connector.purge_expired());

    // 6. Delete and reset
    println!("6. Cleanup:");
    println!("   ✓ del(session:42) -> {}", store.del("session:42").await?);
    println!("   ✓ del(session:42) -> {}", store.del("session:42").await?);
    store.reset().await?;
    println!("   ✓ Collection reset\n");

    Ok(())
}
