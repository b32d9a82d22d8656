//! Configuration for the sync layer.

use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};

/// Environment variable prefix; nested fields are separated by `__`.
pub const ENV_PREFIX: &str = "TRACEPAY_SYNC__";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid sync configuration: {0}")]
    Invalid(#[from] Box<figment::Error>),
}

/// Sync layer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TracepaySyncConfig {
    /// Prefix of every key written to the local durable store.
    #[serde(default = "default_local_key_prefix")]
    pub local_key_prefix: String,

    /// Upper bound on a remote settings read before falling back to local.
    #[serde(default = "default_remote_read_timeout", with = "duration_serde")]
    pub remote_read_timeout: Duration,

    /// Upper bound on a remote settings write before falling back to local.
    #[serde(default = "default_remote_write_timeout", with = "duration_serde")]
    pub remote_write_timeout: Duration,

    /// Upper bound on a toggle mutation; expiry rolls the toggle back.
    #[serde(default = "default_mutation_timeout", with = "duration_serde")]
    pub mutation_timeout: Duration,

    /// Capacity of the settings event channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    pub cache: CacheConfig,

    pub backend: BackendConfig,
}

/// Dashboard read-through cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Freshness window used when callers do not pass their own.
    #[serde(default = "default_cache_ttl", with = "duration_serde")]
    pub default_ttl: Duration,

    /// Maximum number of cached keys.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

/// REST backend hosting the freeze endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Reason recorded with freezes issued from the app.
    #[serde(default = "default_freeze_reason")]
    pub freeze_reason: String,
}

fn default_local_key_prefix() -> String {
    "@tracepay_".to_owned()
}

fn default_remote_read_timeout() -> Duration {
    Duration::from_millis(600)
}

fn default_remote_write_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_mutation_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_event_capacity() -> usize {
    64
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_max_entries() -> usize {
    256
}

fn default_base_url() -> String {
    "http://127.0.0.1:8001".to_owned()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_freeze_reason() -> String {
    "User pressed Freeze in mobile app".to_owned()
}

impl Default for TracepaySyncConfig {
    fn default() -> Self {
        Self {
            local_key_prefix: default_local_key_prefix(),
            remote_read_timeout: default_remote_read_timeout(),
            remote_write_timeout: default_remote_write_timeout(),
            mutation_timeout: default_mutation_timeout(),
            event_capacity: default_event_capacity(),
            cache: CacheConfig::default(),
            backend: BackendConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: default_cache_ttl(),
            max_entries: default_max_entries(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout: default_request_timeout(),
            freeze_reason: default_freeze_reason(),
        }
    }
}

impl TracepaySyncConfig {
    /// Loads configuration from defaults, an optional YAML file, and
    /// `TRACEPAY_SYNC__*` environment variables, later sources winning.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if a source cannot be read or a value
    /// does not match the schema.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ConfigError::Invalid(Box::new(e)))
    }
}

/// Humantime (de)serialization for `Duration` fields, e.g. `"600ms"`, `"5m"`.
pub(crate) mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        humantime::parse_duration(&raw)
            .map_err(|_| de::Error::invalid_value(de::Unexpected::Str(&raw), &"a duration"))
    }
}
