//! Configuration for Courier
//!
//! TigerStyle: Explicit defaults, validation, reasonable limits.

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration for Courier
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CourierConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Shared store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Heartbeat reporter configuration
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Liveness oracle configuration
    #[serde(default)]
    pub liveness: LivenessConfig,

    /// Registry core configuration
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Expiration listener configuration
    #[serde(default)]
    pub listener: ListenerConfig,
}

impl CourierConfig {
    /// Parse a YAML document; missing sections and fields take defaults
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|e| {
            Error::ConfigurationLoadFailed {
                path: "<inline>".into(),
                reason: e.to_string(),
            }
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file if it exists, otherwise return defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let config = Self::read_or_default(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML file without validating
    ///
    /// For callers that apply overrides first; call [`validate`](Self::validate)
    /// once they are in place.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| Error::ConfigurationLoadFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        serde_yaml::from_str(&contents).map_err(|e| Error::ConfigurationLoadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// [`read`](Self::read) if the file exists, otherwise defaults
    pub fn read_or_default(path: impl AsRef<Path>) -> Result<Self> {
        if path.as_ref().exists() {
            Self::read(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate the configuration, including cross-section constraints
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.store.validate()?;
        self.heartbeat.validate()?;
        self.liveness.validate()?;
        self.registry.validate()?;
        self.listener.validate()?;

        let threshold = self.liveness.staleness_threshold_ms;
        let interval = self.heartbeat.interval_ms;
        if threshold.saturating_mul(LIVENESS_THRESHOLD_INTERVAL_RATIO_DENOMINATOR)
            < interval.saturating_mul(LIVENESS_THRESHOLD_INTERVAL_RATIO_NUMERATOR)
        {
            return Err(Error::invalid_configuration(
                "liveness.staleness_threshold_ms",
                format!(
                    "{} must be at least 1.5x heartbeat.interval_ms ({})",
                    threshold, interval
                ),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Server
// =============================================================================

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind (default: 0.0.0.0:8080)
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

fn default_bind_address() -> String {
    SERVER_BIND_ADDRESS_DEFAULT.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

impl ServerConfig {
    fn validate(&self) -> Result<()> {
        if !self.bind_address.contains(':') {
            return Err(Error::invalid_configuration(
                "server.bind_address",
                "must be in host:port format",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Store
// =============================================================================

/// Shared store backend type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process store (single registry process, tests)
    #[default]
    Memory,

    /// Redis (production)
    Redis,
}

/// Shared store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection URL (for the redis backend)
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Prefix prepended to every key, e.g. "courier:"
    #[serde(default)]
    pub key_namespace: String,

    /// Issue `CONFIG SET notify-keyspace-events Ex` at startup
    #[serde(default)]
    pub configure_keyspace_events: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: None,
            key_namespace: String::new(),
            configure_keyspace_events: false,
        }
    }
}

impl StoreConfig {
    fn validate(&self) -> Result<()> {
        if self.backend == StoreBackend::Redis && self.redis_url.is_none() {
            return Err(Error::invalid_configuration(
                "store.redis_url",
                "required when backend is redis",
            ));
        }
        if self.key_namespace.len() > KEY_NAMESPACE_LENGTH_BYTES_MAX {
            return Err(Error::invalid_configuration(
                "store.key_namespace",
                format!(
                    "{} bytes exceeds limit {}",
                    self.key_namespace.len(),
                    KEY_NAMESPACE_LENGTH_BYTES_MAX
                ),
            ));
        }
        if self.key_namespace.chars().any(char::is_whitespace) {
            return Err(Error::invalid_configuration(
                "store.key_namespace",
                "must not contain whitespace",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Heartbeat
// =============================================================================

/// Heartbeat reporter configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Period between heartbeat writes (milliseconds)
    #[serde(default = "default_heartbeat_interval_ms")]
    pub interval_ms: u64,

    /// TTL placed on each heartbeat record (milliseconds)
    #[serde(default = "default_heartbeat_ttl_ms")]
    pub ttl_ms: u64,

    /// Bound on a single heartbeat write (milliseconds)
    #[serde(default = "default_heartbeat_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

fn default_heartbeat_interval_ms() -> u64 {
    HEARTBEAT_INTERVAL_MS_DEFAULT
}

fn default_heartbeat_ttl_ms() -> u64 {
    HEARTBEAT_TTL_MS_DEFAULT
}

fn default_heartbeat_write_timeout_ms() -> u64 {
    HEARTBEAT_WRITE_TIMEOUT_MS_DEFAULT
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval_ms(),
            ttl_ms: default_heartbeat_ttl_ms(),
            write_timeout_ms: default_heartbeat_write_timeout_ms(),
        }
    }
}

impl HeartbeatConfig {
    fn validate(&self) -> Result<()> {
        if !(HEARTBEAT_INTERVAL_MS_MIN..=HEARTBEAT_INTERVAL_MS_MAX).contains(&self.interval_ms) {
            return Err(Error::invalid_configuration(
                "heartbeat.interval_ms",
                format!(
                    "{} outside [{}, {}]",
                    self.interval_ms, HEARTBEAT_INTERVAL_MS_MIN, HEARTBEAT_INTERVAL_MS_MAX
                ),
            ));
        }
        if self.ttl_ms <= self.interval_ms {
            return Err(Error::invalid_configuration(
                "heartbeat.ttl_ms",
                format!(
                    "{} must exceed heartbeat.interval_ms ({})",
                    self.ttl_ms, self.interval_ms
                ),
            ));
        }
        if self.write_timeout_ms == 0 || self.write_timeout_ms >= self.interval_ms {
            return Err(Error::invalid_configuration(
                "heartbeat.write_timeout_ms",
                format!(
                    "{} must be in (0, heartbeat.interval_ms = {})",
                    self.write_timeout_ms, self.interval_ms
                ),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Liveness
// =============================================================================

/// What the liveness oracle answers when the heartbeat cannot be read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadFailurePolicy {
    /// Treat the instance as alive; avoids mass eviction during a store blip
    #[default]
    FailOpen,

    /// Treat the instance as dead
    FailClosed,
}

/// Liveness oracle configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LivenessConfig {
    /// Age after which a heartbeat is stale (milliseconds)
    #[serde(default = "default_staleness_threshold_ms")]
    pub staleness_threshold_ms: u64,

    #[serde(default)]
    pub read_failure_policy: ReadFailurePolicy,
}

fn default_staleness_threshold_ms() -> u64 {
    LIVENESS_STALENESS_THRESHOLD_MS_DEFAULT
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            staleness_threshold_ms: default_staleness_threshold_ms(),
            read_failure_policy: ReadFailurePolicy::default(),
        }
    }
}

impl LivenessConfig {
    fn validate(&self) -> Result<()> {
        if self.staleness_threshold_ms == 0 {
            return Err(Error::invalid_configuration(
                "liveness.staleness_threshold_ms",
                "must be positive",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Registry core configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Random draws before assignment gives up
    #[serde(default = "default_selection_attempts_max")]
    pub selection_attempts_max: u32,
}

fn default_selection_attempts_max() -> u32 {
    ASSIGNMENT_SELECTION_ATTEMPTS_DEFAULT
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            selection_attempts_max: default_selection_attempts_max(),
        }
    }
}

impl RegistryConfig {
    fn validate(&self) -> Result<()> {
        if !(1..=ASSIGNMENT_SELECTION_ATTEMPTS_MAX).contains(&self.selection_attempts_max) {
            return Err(Error::invalid_configuration(
                "registry.selection_attempts_max",
                format!(
                    "{} outside [1, {}]",
                    self.selection_attempts_max, ASSIGNMENT_SELECTION_ATTEMPTS_MAX
                ),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Expiration Listener
// =============================================================================

/// Expiration listener configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ListenerConfig {
    #[serde(default = "default_listener_enabled")]
    pub enabled: bool,

    /// Delay before resubscribing after the notification stream ends
    #[serde(default = "default_resubscribe_delay_ms")]
    pub resubscribe_delay_ms: u64,
}

fn default_listener_enabled() -> bool {
    true
}

fn default_resubscribe_delay_ms() -> u64 {
    LISTENER_RESUBSCRIBE_DELAY_MS_DEFAULT
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            enabled: default_listener_enabled(),
            resubscribe_delay_ms: default_resubscribe_delay_ms(),
        }
    }
}

impl ListenerConfig {
    fn validate(&self) -> Result<()> {
        if self.resubscribe_delay_ms == 0 {
            return Err(Error::invalid_configuration(
                "listener.resubscribe_delay_ms",
                "must be positive",
            ));
        }
        Ok(())
    }
}
