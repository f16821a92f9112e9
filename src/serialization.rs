//! Typed values stored as versioned postcard envelopes.
//!
//! [`CacheStore::set_entity`](crate::CacheStore::set_entity) turns any
//! `Serialize` value into a byte payload with this layout, and
//! [`CacheStore::get_entity`](crate::CacheStore::get_entity) validates it on
//! the way back:
//!
//! ```text
//! ┌─────────────────┬─────────────────┬──────────────────────────┐
//! │  MAGIC (4 bytes)│ VERSION (varint)│POSTCARD PAYLOAD (N bytes)│
//! └─────────────────┴─────────────────┴──────────────────────────┘
//!   "CKMG"
//! ```
//!
//! Because the result is a byte payload it is compressible, so typed values
//! get compressed when the store has compression enabled.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Magic header identifying typed cache values.
pub const ENTITY_MAGIC: [u8; 4] = *b"CKMG";

/// Schema version of typed values.
///
/// Bump when cached types change shape; stored values written with another
/// version are reported as `Error::VersionMismatch` instead of being decoded.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    magic: [u8; 4],
    version: u32,
    payload: T,
}

/// Encode a typed value.
///
/// # Errors
///
/// Returns `Error::SerializationError` if postcard cannot encode the value.
pub fn encode_entity<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let envelope = Envelope {
        magic: ENTITY_MAGIC,
        version: CURRENT_SCHEMA_VERSION,
        payload: value,
    };
    postcard::to_allocvec(&envelope).map_err(|e| {
        log::error!("Entity serialization failed: {}", e);
        Error::SerializationError(e.to_string())
    })
}

/// Decode a typed value.
///
/// # Errors
///
/// - `Error::InvalidCacheEntry`: bytes do not start with the magic header
/// - `Error::VersionMismatch`: written with another schema version
/// - `Error::DeserializationError`: payload does not decode as `T`
pub fn decode_entity<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    if bytes.len() < ENTITY_MAGIC.len() || bytes[..4] != ENTITY_MAGIC {
        return Err(Error::InvalidCacheEntry(format!(
            "missing {:?} header",
            String::from_utf8_lossy(&ENTITY_MAGIC)
        )));
    }

    let (version, _) = postcard::take_from_bytes::<u32>(&bytes[4..]).map_err(|e| {
        Error::InvalidCacheEntry(format!("unreadable schema version: {}", e))
    })?;
    if version != CURRENT_SCHEMA_VERSION {
        log::warn!(
            "Entity version mismatch: expected {}, got {}",
            CURRENT_SCHEMA_VERSION,
            version
        );
        return Err(Error::VersionMismatch {
            expected: CURRENT_SCHEMA_VERSION,
            found: version,
        });
    }

    let envelope: Envelope<T> = postcard::from_bytes(bytes).map_err(|e| {
        log::error!("Entity deserialization failed: {}", e);
        Error::DeserializationError(e.to_string())
    })?;
    Ok(envelope.payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
    struct Session {
        user_id: u64,
        roles: Vec<String>,
    }

    fn session() -> Session {
        Session {
            user_id: 42,
            roles: vec!["admin".to_string(), "ops".to_string()],
        }
    }

    #[test]
    fn test_roundtrip() {
        let bytes = encode_entity(&session()).unwrap();
        assert_eq!(&bytes[0..4], b"CKMG");
        let decoded: Session = decode_entity(&bytes).unwrap();
        assert_eq!(decoded, session());
    }

    #[test]
    fn test_invalid_magic_rejected() {
        let mut bytes = encode_entity(&session()).unwrap();
        bytes[0..4].copy_from_slice(b"XXXX");
        match decode_entity::<Session>(&bytes) {
            Err(Error::InvalidCacheEntry(_)) => {}
            other => panic!("Expected InvalidCacheEntry, got {:?}", other),
        }
    }

    #[test]
    fn test_short_input_rejected() {
        assert!(matches!(
            decode_entity::<Session>(b"CK"),
            Err(Error::InvalidCacheEntry(_))
        ));
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let envelope = Envelope {
            magic: ENTITY_MAGIC,
            version: 999,
            payload: session(),
        };
        let bytes = postcard::to_allocvec(&envelope).unwrap();
        match decode_entity::<Session>(&bytes) {
            Err(Error::VersionMismatch { expected, found }) => {
                assert_eq!(expected, CURRENT_SCHEMA_VERSION);
                assert_eq!(found, 999);
            }
            other => panic!("Expected VersionMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let mut bytes = encode_entity(&session()).unwrap();
        bytes.truncate(bytes.len() - 3);
        assert!(matches!(
            decode_entity::<Session>(&bytes),
            Err(Error::DeserializationError(_))
        ));
    }
}
