//! Property-based tests for value compression and typed envelopes.
//!
//! # Properties Tested
//!
//! 1. **Roundtrip Property**: decompress(compress(x)) == x for ANY bytes
//! 2. **Kind Property**: only byte payloads are compressible
//! 3. **Entry Property**: expiry is always strictly after creation
//! 4. **Envelope Property**: typed entities survive encode/decode

use cache_kit_mongodb::codec::{compress, compress_value, decompress, decompress_value};
use cache_kit_mongodb::entry::{ttl_seconds, CacheEntry};
use cache_kit_mongodb::serialization::{decode_entity, encode_entity, ENTITY_MAGIC};
use cache_kit_mongodb::{CacheValue, Error};
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Session {
    id: u64,
    user: String,
    roles: Vec<String>,
    active: bool,
}

fn arb_session() -> impl Strategy<Value = Session> {
    (
        any::<u64>(),
        any::<String>(),
        prop::collection::vec(any::<String>(), 0..8),
        any::<bool>(),
    )
        .prop_map(|(id, user, roles, active)| Session {
            id,
            user,
            roles,
            active,
        })
}

// ============================================================================
// Property 1: Roundtrip
// ============================================================================

proptest! {
    #[test]
    fn prop_compress_roundtrip(data in prop::collection::vec(any::<u8>(), 0..4096)) {
        let packed = compress(&data).expect("compression should never fail");
        let unpacked = decompress(&packed).expect("valid gzip should decompress");
        prop_assert_eq!(data, unpacked);
    }

    #[test]
    fn prop_value_roundtrip(data in prop::collection::vec(any::<u8>(), 0..1024)) {
        let value = CacheValue::Bytes(data);
        let packed = compress_value(&value).unwrap();
        prop_assert_eq!(decompress_value(&packed).unwrap(), value);
    }

    /// Repetitive payloads, the common case for cached documents, shrink
    #[test]
    fn prop_repetitive_payload_shrinks(chunk in "[a-z]{4,16}", repeat in 64usize..256) {
        let data = chunk.repeat(repeat).into_bytes();
        let packed = compress(&data).unwrap();
        prop_assert!(packed.len() < data.len());
    }
}

// ============================================================================
// Property 2: Only bytes are compressible
// ============================================================================

proptest! {
    #[test]
    fn prop_text_not_compressible(text in any::<String>()) {
        let result = compress_value(&CacheValue::Text(text));
        prop_assert!(matches!(result, Err(Error::CodecError(_))));
    }

    #[test]
    fn prop_json_not_compressible(n in any::<i64>(), s in any::<String>()) {
        let value = CacheValue::Json(serde_json::json!({ "n": n, "s": s }));
        prop_assert!(matches!(compress_value(&value), Err(Error::CodecError(_))));
    }
}

// ============================================================================
// Property 3: Entry expiry
// ============================================================================

proptest! {
    #[test]
    fn prop_entry_expires_after_creation(ms in 1u64..10_000_000, offset in 0i64..4_000_000_000) {
        let now = Utc.timestamp_opt(offset, 0).unwrap();
        let ttl = Duration::from_millis(ms);
        let entry = CacheEntry::new("k", CacheValue::Text("v".into()), ttl, now);

        prop_assert!(entry.expire_at > now);
        prop_assert!(!entry.is_expired_at(now));
        prop_assert!(entry.is_expired_at(entry.expire_at));
    }

    #[test]
    fn prop_ttl_seconds_rounds_up(ms in 1u64..100_000_000) {
        let secs = ttl_seconds(Duration::from_millis(ms));
        prop_assert!(secs >= 1);
        prop_assert!((secs as u64) * 1000 >= ms);
        prop_assert!((secs as u64 - 1) * 1000 < ms);
    }
}

// ============================================================================
// Property 4: Typed envelopes
// ============================================================================

proptest! {
    #[test]
    fn prop_entity_roundtrip(session in arb_session()) {
        let bytes = encode_entity(&session).expect("encoding should succeed");
        prop_assert_eq!(&bytes[0..4], &ENTITY_MAGIC[..]);

        let decoded: Session = decode_entity(&bytes).expect("decoding should succeed");
        prop_assert_eq!(session, decoded);
    }

    #[test]
    fn prop_entity_survives_compression(session in arb_session()) {
        let bytes = encode_entity(&session).unwrap();
        let restored = decompress(&compress(&bytes).unwrap()).unwrap();
        let decoded: Session = decode_entity(&restored).unwrap();
        prop_assert_eq!(session, decoded);
    }
}
