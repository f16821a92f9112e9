//! Store configuration.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

/// Default collection name.
pub const DEFAULT_COLLECTION: &str = "cacheman";

/// Default TTL applied when a write carries none.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Driver options that may be forwarded to the connect step.
///
/// Anything else is dropped so unknown keys never reach the driver.
pub const VALID_OPTION_NAMES: &[&str] = &[
    "appName",
    "authMechanism",
    "authMechanismProperties",
    "authSource",
    "compressors",
    "connectTimeoutMS",
    "directConnection",
    "heartbeatFrequencyMS",
    "journal",
    "loadBalanced",
    "localThresholdMS",
    "maxConnecting",
    "maxIdleTimeMS",
    "maxPoolSize",
    "maxStalenessSeconds",
    "minPoolSize",
    "readConcernLevel",
    "readPreference",
    "readPreferenceTags",
    "replicaSet",
    "retryReads",
    "retryWrites",
    "serverSelectionTimeoutMS",
    "socketTimeoutMS",
    "ssl",
    "tls",
    "tlsAllowInvalidCertificates",
    "tlsAllowInvalidHostnames",
    "tlsCAFile",
    "tlsCertificateKeyFile",
    "tlsCertificateKeyFilePassword",
    "tlsInsecure",
    "w",
    "waitQueueTimeoutMS",
    "wTimeoutMS",
    "zlibCompressionLevel",
];

/// How storage-level expiry is configured at bootstrap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryStrategy {
    /// TTL index on `expireAt` with `expireAfterSeconds: 0`; the server purges
    /// documents once their stored timestamp has passed.
    #[default]
    ExpireAtField,

    /// For platforms without TTL on arbitrary fields: a `_ts` index with
    /// `expireAfterSeconds: -1`, and a per-document `ttl` in seconds written
    /// on every entry. The index itself purges nothing.
    PlatformTimestamp,
}

/// Allow-listed transport options, forwarded verbatim to the driver.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransportOptions {
    options: BTreeMap<String, String>,
}

impl TransportOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only allow-listed keys from an arbitrary option map.
    pub fn from_map<I, K, V>(options: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut filtered = TransportOptions::new();
        for (k, v) in options {
            filtered.insert(k, v);
        }
        filtered
    }

    /// Insert an option. Returns `false` and drops it if not allow-listed.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> bool {
        let name = name.into();
        if !VALID_OPTION_NAMES.contains(&name.as_str()) {
            debug!("Dropping unsupported transport option: {}", name);
            return false;
        }
        self.options.insert(name, value.into());
        true
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.options.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// Append the options to a connection string as query parameters.
    ///
    /// Options already present in the URI keep the URI's value. Values are
    /// percent-encoded, so a value can never smuggle in another option.
    pub fn apply_to_uri(&self, uri: &str) -> String {
        let mut out = uri.to_string();
        let existing = uri.split_once('?').map(|(_, q)| q).unwrap_or("");
        let mut sep = if uri.contains('?') {
            if existing.is_empty() || existing.ends_with('&') {
                ""
            } else {
                "&"
            }
        } else {
            // Options need a path segment before the query.
            if !has_path(uri) {
                out.push('/');
            }
            "?"
        };
        for (k, v) in self.iter() {
            let already = existing
                .split('&')
                .any(|pair| pair.split('=').next() == Some(k));
            if already {
                continue;
            }
            out.push_str(sep);
            out.push_str(k);
            out.push('=');
            out.push_str(&encode_value(v));
            sep = "&";
        }
        out
    }
}

impl<'de> Deserialize<'de> for TransportOptions {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
        Ok(TransportOptions::from_map(raw.into_iter().map(|(k, v)| {
            let v = match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (k, v)
        })))
    }
}

/// Percent-encode an option value for a connection string query.
///
/// `:` and `,` stay literal for list-valued options such as
/// `readPreferenceTags=dc:ny,rack:1`.
fn encode_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b':' | b',' => {
                out.push(char::from(byte))
            }
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}

fn has_path(uri: &str) -> bool {
    let rest = uri.split_once("://").map(|(_, r)| r).unwrap_or(uri);
    rest.contains('/')
}

/// Configuration for the cache store.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Full connection string. Takes precedence over the discrete fields.
    pub uri: Option<String>,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub collection: String,
    /// Default TTL, in seconds in serialized config.
    #[serde(with = "duration_secs")]
    pub ttl: Duration,
    pub compression: bool,
    pub expiry_strategy: ExpiryStrategy,
    /// Shorthand for `expiry_strategy = platform_timestamp`.
    pub platform_compat: bool,
    pub options: TransportOptions,
    /// Bound on every public operation, including lazy initialization.
    #[serde(with = "opt_duration_ms")]
    pub operation_timeout: Option<Duration>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            uri: None,
            host: "localhost".to_string(),
            port: 27017,
            database: "cache".to_string(),
            username: None,
            password: None,
            collection: DEFAULT_COLLECTION.to_string(),
            ttl: DEFAULT_TTL,
            compression: false,
            expiry_strategy: ExpiryStrategy::default(),
            platform_compat: false,
            options: TransportOptions::default(),
            operation_timeout: None,
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from the environment on top of the defaults.
    ///
    /// # Environment Variables
    /// - `CACHE_MONGO_URI` - connection string
    /// - `CACHE_MONGO_COLLECTION` - collection name (default: cacheman)
    /// - `CACHE_MONGO_TTL` - default TTL in seconds (default: 60)
    /// - `CACHE_MONGO_COMPRESSION` - `true`/`false` (default: false)
    /// - `CACHE_MONGO_PLATFORM_COMPAT` - `true`/`false` (default: false)
    /// - `CACHE_MONGO_TIMEOUT_MS` - operation timeout in milliseconds
    pub fn from_env() -> Self {
        let defaults = StoreConfig::default();
        StoreConfig {
            uri: env::var("CACHE_MONGO_URI").ok().filter(|s| !s.is_empty()),
            collection: env::var("CACHE_MONGO_COLLECTION")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.collection),
            ttl: env::var("CACHE_MONGO_TTL")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.ttl),
            compression: env::var("CACHE_MONGO_COMPRESSION")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.compression),
            platform_compat: env::var("CACHE_MONGO_PLATFORM_COMPAT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.platform_compat),
            operation_timeout: env::var("CACHE_MONGO_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis),
            ..defaults
        }
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    pub fn with_expiry_strategy(mut self, strategy: ExpiryStrategy) -> Self {
        self.expiry_strategy = strategy;
        self
    }

    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(name, value);
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// Effective expiry strategy, honouring the `platform_compat` shorthand.
    pub fn effective_expiry_strategy(&self) -> ExpiryStrategy {
        if self.platform_compat {
            ExpiryStrategy::PlatformTimestamp
        } else {
            self.expiry_strategy
        }
    }

    /// Build the connection string.
    pub fn connection_string(&self) -> String {
        if let Some(uri) = &self.uri {
            return uri.clone();
        }
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => format!(
                "mongodb://{}:{}@{}:{}/{}",
                username, password, self.host, self.port, self.database
            ),
            (Some(username), None) => format!(
                "mongodb://{}@{}:{}/{}",
                username, self.host, self.port, self.database
            ),
            _ => format!("mongodb://{}:{}/{}", self.host, self.port, self.database),
        }
    }

    /// Reject configurations the store cannot run with.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` on an empty collection name or a zero TTL.
    pub fn validate(&self) -> Result<()> {
        if self.collection.trim().is_empty() {
            return Err(Error::ConfigError(
                "collection name must not be empty".to_string(),
            ));
        }
        if self.collection.contains('$') || self.collection.contains('\0') {
            return Err(Error::ConfigError(format!(
                "invalid collection name: {}",
                self.collection
            )));
        }
        if self.ttl.is_zero() {
            return Err(Error::ConfigError("default ttl must be positive".to_string()));
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

mod opt_duration_ms {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
