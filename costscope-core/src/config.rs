//! Runtime configuration resolution for the Costscope client.
//!
//! One effective configuration is resolved per client instance from three
//! layers, highest precedence first: explicit constructor options, an external
//! config source, and hard defaults. The result is validated once and never
//! mutated afterwards.

use crate::critical::CriticalityProfile;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Hard defaults applied when neither options nor the config source supply a
/// value.
pub mod defaults {
    pub const SERVICE_ID: &str = "costscope";
    pub const TIMEOUT_MS: u64 = 10_000;
    pub const CACHE_TTL_MS: u64 = 30_000;
    /// 0 means unbounded.
    pub const MAX_ENTRIES: usize = 0;
    pub const ENABLE_INTERNAL_CACHE: bool = true;
    pub const MAX_ATTEMPTS: u32 = 3;
    pub const BACKOFF_BASE_MS: u64 = 300;
    pub const RETRY_ON: [u16; 4] = [429, 502, 503, 504];
    pub const JITTER_FACTOR: f64 = 0.3;
    pub const SWR_ENABLED: bool = true;
    pub const STALE_FACTOR: f64 = 3.0;
    pub const SILENT: bool = false;
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Retry policy for the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one. 1 disables retries.
    pub max_attempts: u32,
    /// Base delay for the exponential schedule: `base * 2^(attempt-1)`.
    pub backoff_base_ms: u64,
    /// HTTP statuses eligible for retry. Anything else is terminal.
    pub retry_on: Vec<u16>,
    /// Jitter factor in [0, 1]; the delay is uniform in
    /// `[base * (1 - jitter_factor), base]`. 0 means exact backoff.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::MAX_ATTEMPTS,
            backoff_base_ms: defaults::BACKOFF_BASE_MS,
            retry_on: defaults::RETRY_ON.to_vec(),
            jitter_factor: defaults::JITTER_FACTOR,
        }
    }
}

/// Stale-while-revalidate policy for the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwrConfig {
    pub enabled: bool,
    /// Hard expiry is `created_at + cache_ttl_ms * stale_factor`. Must be
    /// >= 1.0 so the hard boundary never precedes the soft one.
    pub stale_factor: f64,
}

impl Default for SwrConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::SWR_ENABLED,
            stale_factor: defaults::STALE_FACTOR,
        }
    }
}

/// Constructor-supplied overrides. All fields optional; unset fields fall
/// through to the config source, then to hard defaults.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    pub service_id: Option<String>,
    pub timeout_ms: Option<u64>,
    pub cache_ttl_ms: Option<u64>,
    pub max_entries: Option<usize>,
    pub enable_internal_cache: Option<bool>,
    pub max_attempts: Option<u32>,
    pub backoff_base_ms: Option<u64>,
    pub retry_on: Option<Vec<u16>>,
    pub jitter_factor: Option<f64>,
    pub swr_enabled: Option<bool>,
    pub stale_factor: Option<f64>,
    pub critical: Option<CriticalityProfile>,
    pub silent: Option<bool>,
    /// Enable telemetry buffers even in release builds.
    pub force_telemetry: Option<bool>,
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service_id(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = Some(service_id.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_cache_ttl_ms(mut self, cache_ttl_ms: u64) -> Self {
        self.cache_ttl_ms = Some(cache_ttl_ms);
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    pub fn with_internal_cache(mut self, enabled: bool) -> Self {
        self.enable_internal_cache = Some(enabled);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_backoff_base_ms(mut self, backoff_base_ms: u64) -> Self {
        self.backoff_base_ms = Some(backoff_base_ms);
        self
    }

    pub fn with_retry_on(mut self, retry_on: Vec<u16>) -> Self {
        self.retry_on = Some(retry_on);
        self
    }

    pub fn with_jitter_factor(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = Some(jitter_factor);
        self
    }

    pub fn with_swr_enabled(mut self, enabled: bool) -> Self {
        self.swr_enabled = Some(enabled);
        self
    }

    pub fn with_stale_factor(mut self, stale_factor: f64) -> Self {
        self.stale_factor = Some(stale_factor);
        self
    }

    pub fn with_critical(mut self, profile: CriticalityProfile) -> Self {
        self.critical = Some(profile);
        self
    }

    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = Some(silent);
        self
    }

    pub fn with_force_telemetry(mut self, force: bool) -> Self {
        self.force_telemetry = Some(force);
        self
    }
}

/// External runtime tuning source (supplied by the embedding application).
///
/// Keys use dotted lowercase names: `service_id`, `timeout_ms`,
/// `cache_ttl_ms`, `max_entries`, `enable_internal_cache`, `silent`,
/// `retry.max_attempts`, `retry.backoff_base_ms`, `retry.retry_on`,
/// `retry.jitter_factor`, `swr.enabled`, `swr.stale_factor`.
pub trait ConfigSource: Send + Sync {
    fn get_optional_string(&self, key: &str) -> Option<String>;
    fn get_optional_number(&self, key: &str) -> Option<f64>;
    fn get_optional_bool(&self, key: &str) -> Option<bool>;
    fn get_optional_u16_list(&self, key: &str) -> Option<Vec<u16>>;
}

/// TOML-file-backed config source.
#[derive(Debug, Clone)]
pub struct TomlConfigSource {
    root: toml::Value,
}

impl TomlConfigSource {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_str(&contents)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let root: toml::Value = toml::from_str(contents)?;
        Ok(Self { root })
    }

    fn lookup(&self, key: &str) -> Option<&toml::Value> {
        let mut current = &self.root;
        for segment in key.split('.') {
            current = current.as_table()?.get(segment)?;
        }
        Some(current)
    }
}

impl ConfigSource for TomlConfigSource {
    fn get_optional_string(&self, key: &str) -> Option<String> {
        self.lookup(key)?.as_str().map(|s| s.to_string())
    }

    fn get_optional_number(&self, key: &str) -> Option<f64> {
        let value = self.lookup(key)?;
        value
            .as_float()
            .or_else(|| value.as_integer().map(|i| i as f64))
    }

    fn get_optional_bool(&self, key: &str) -> Option<bool> {
        self.lookup(key)?.as_bool()
    }

    fn get_optional_u16_list(&self, key: &str) -> Option<Vec<u16>> {
        let list = self.lookup(key)?.as_array()?;
        let mut out = Vec::with_capacity(list.len());
        for value in list {
            out.push(u16::try_from(value.as_integer()?).ok()?);
        }
        Some(out)
    }
}

/// Resolved, validated configuration. Never mutated after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    pub service_id: String,
    pub timeout_ms: u64,
    pub cache_ttl_ms: u64,
    pub max_entries: usize,
    pub enable_internal_cache: bool,
    pub retry: RetryConfig,
    pub swr: SwrConfig,
    pub critical: CriticalityProfile,
    pub silent: bool,
    pub telemetry_enabled: bool,
}

impl EffectiveConfig {
    /// Merge options, config source, and hard defaults; precedence is
    /// option > source > default.
    pub fn resolve(
        options: &ClientOptions,
        source: Option<&dyn ConfigSource>,
    ) -> Result<Self, ConfigError> {
        let num =
            |key: &str| -> Option<f64> { source.and_then(|s| s.get_optional_number(key)) };
        let flag = |key: &str| -> Option<bool> { source.and_then(|s| s.get_optional_bool(key)) };

        let config = Self {
            service_id: options
                .service_id
                .clone()
                .or_else(|| source.and_then(|s| s.get_optional_string("service_id")))
                .unwrap_or_else(|| defaults::SERVICE_ID.to_string()),
            timeout_ms: options
                .timeout_ms
                .or_else(|| num("timeout_ms").map(|n| n as u64))
                .unwrap_or(defaults::TIMEOUT_MS),
            cache_ttl_ms: options
                .cache_ttl_ms
                .or_else(|| num("cache_ttl_ms").map(|n| n as u64))
                .unwrap_or(defaults::CACHE_TTL_MS),
            max_entries: options
                .max_entries
                .or_else(|| num("max_entries").map(|n| n as usize))
                .unwrap_or(defaults::MAX_ENTRIES),
            enable_internal_cache: options
                .enable_internal_cache
                .or_else(|| flag("enable_internal_cache"))
                .unwrap_or(defaults::ENABLE_INTERNAL_CACHE),
            retry: RetryConfig {
                max_attempts: options
                    .max_attempts
                    .or_else(|| num("retry.max_attempts").map(|n| n as u32))
                    .unwrap_or(defaults::MAX_ATTEMPTS),
                backoff_base_ms: options
                    .backoff_base_ms
                    .or_else(|| num("retry.backoff_base_ms").map(|n| n as u64))
                    .unwrap_or(defaults::BACKOFF_BASE_MS),
                retry_on: options
                    .retry_on
                    .clone()
                    .or_else(|| source.and_then(|s| s.get_optional_u16_list("retry.retry_on")))
                    .unwrap_or_else(|| defaults::RETRY_ON.to_vec()),
                jitter_factor: options
                    .jitter_factor
                    .or_else(|| num("retry.jitter_factor"))
                    .unwrap_or(defaults::JITTER_FACTOR),
            },
            swr: SwrConfig {
                enabled: options
                    .swr_enabled
                    .or_else(|| flag("swr.enabled"))
                    .unwrap_or(defaults::SWR_ENABLED),
                stale_factor: options
                    .stale_factor
                    .or_else(|| num("swr.stale_factor"))
                    .unwrap_or(defaults::STALE_FACTOR),
            },
            critical: options.critical.clone().unwrap_or_default(),
            silent: options.silent.or_else(|| flag("silent")).unwrap_or(defaults::SILENT),
            telemetry_enabled: options
                .force_telemetry
                .unwrap_or(cfg!(debug_assertions)),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.service_id.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "service_id",
                reason: "must not be empty".to_string(),
            });
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.cache_ttl_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache_ttl_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.max_attempts",
                reason: "must be >= 1".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(ConfigError::InvalidValue {
                field: "retry.jitter_factor",
                reason: "must be within [0, 1]".to_string(),
            });
        }
        if self.swr.stale_factor < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "swr.stale_factor",
                reason: "must be >= 1.0".to_string(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
