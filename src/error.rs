//! Error types for the cache store.

use std::fmt;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the cache store.
///
/// A missing or expired key is never an error: `get` returns `Ok(None)` and
/// `del` returns `Ok(false)`.
///
/// `Error` is `Clone` because a failed initialization is handed to every
/// caller that was waiting on it.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Connecting to the backing store or bootstrapping the collection failed.
    ///
    /// Fatal to the operations waiting on initialization. It does not poison
    /// the store: the next operation retries initialization from scratch.
    ConnectionError(String),

    /// Index creation failed for a reason other than "already exists".
    ///
    /// Surfaced like `ConnectionError`.
    IndexError(String),

    /// An equivalent or conflicting index is already present.
    ///
    /// Returned by [`Collection::create_index`](crate::backend::Collection::create_index)
    /// and swallowed by the bootstrapper.
    IndexExists(String),

    /// Compression or decompression failed.
    ///
    /// Common causes:
    /// - The stored payload is flagged as compressed but is not valid gzip
    /// - Compression was requested on a value that is not a byte payload
    CodecError(String),

    /// Serializing a typed value into its cache envelope failed.
    SerializationError(String),

    /// Deserializing a typed value from its cache envelope failed.
    ///
    /// **Recovery:** Delete the entry and recompute it.
    DeserializationError(String),

    /// The stored bytes are not a cache envelope (bad magic).
    InvalidCacheEntry(String),

    /// The stored envelope was written with a different schema version.
    VersionMismatch {
        /// Expected schema version (from compiled code)
        expected: u32,
        /// Found schema version (from the stored entry)
        found: u32,
    },

    /// The backing store rejected or failed an operation.
    ///
    /// Common causes:
    /// - Connection lost mid-operation
    /// - Write concern not satisfied
    /// - Malformed document in the collection
    BackendError(String),

    /// Operation exceeded the configured timeout.
    ///
    /// The backing store applies upserts and deletes atomically, so a timed
    /// out operation either happened completely or not at all.
    Timeout(String),

    /// Invalid configuration.
    ConfigError(String),

    /// Generic error with custom message.
    Other(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConnectionError(msg) => write!(f, "Connection error: {}", msg),
            Error::IndexError(msg) => write!(f, "Index error: {}", msg),
            Error::IndexExists(msg) => write!(f, "Index already exists: {}", msg),
            Error::CodecError(msg) => write!(f, "Codec error: {}", msg),
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Error::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            Error::InvalidCacheEntry(msg) => write!(f, "Invalid cache entry: {}", msg),
            Error::VersionMismatch { expected, found } => {
                write!(
                    f,
                    "Cache version mismatch: expected {}, found {}",
                    expected, found
                )
            }
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::Timeout(msg) => write!(f, "Timeout: {}", msg),
            Error::ConfigError(msg) => write!(f, "Config error: {}", msg),
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Whether this error came out of connection setup or bootstrap.
    pub fn is_initialization(&self) -> bool {
        matches!(self, Error::ConnectionError(_) | Error::IndexError(_))
    }
}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::Other(e)
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::Other(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Error::Timeout(e.to_string())
    }
}

#[cfg(feature = "mongodb")]
impl From<mongodb::error::Error> for Error {
    fn from(e: mongodb::error::Error) -> Self {
        Error::BackendError(format!("MongoDB error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::CodecError("bad gzip header".to_string());
        assert_eq!(err.to_string(), "Codec error: bad gzip header");

        let err = Error::VersionMismatch {
            expected: 1,
            found: 2,
        };
        assert_eq!(err.to_string(), "Cache version mismatch: expected 1, found 2");
    }

    #[test]
    fn test_error_from_string() {
        let err: Error = "test error".into();
        assert!(matches!(err, Error::Other(_)));
    }

    #[test]
    fn test_is_initialization() {
        assert!(Error::ConnectionError("refused".into()).is_initialization());
        assert!(Error::IndexError("duplicate key".into()).is_initialization());
        assert!(!Error::CodecError("corrupt".into()).is_initialization());
    }
}
