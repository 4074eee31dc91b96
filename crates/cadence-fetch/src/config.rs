//! Engine configuration

use crate::{BreakerConfig, CacheConfig, EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Primary distribution endpoint and origin store layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Name reported for the primary candidate
    pub primary_name: String,
    /// Base URL of the primary distribution endpoint (CDN)
    pub primary_base: String,
    /// Name reported for the origin candidate
    pub origin_name: String,
    /// Base URL of the origin store
    pub origin_base: String,
    /// Category tag -> bucket
    pub buckets: BTreeMap<String, String>,
    /// Bucket for categories missing from the table
    pub default_bucket: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        let buckets = [
            ("rhythm-track", "cadence-rhythm-tracks"),
            ("bass-sample", "cadence-bass-samples"),
            ("low-frequency-sample", "cadence-bass-samples"),
            ("percussion-sample", "cadence-percussion-samples"),
            ("ambience", "cadence-ambience"),
        ]
        .into_iter()
        .map(|(category, bucket)| (category.to_string(), bucket.to_string()))
        .collect();

        Self {
            primary_name: "primary".to_string(),
            primary_base: "https://cdn.cadence.audio".to_string(),
            origin_name: "origin".to_string(),
            origin_base: "https://storage.googleapis.com".to_string(),
            buckets,
            default_bucket: "cadence-assets".to_string(),
        }
    }
}

impl SourceConfig {
    /// Set the primary base URL
    pub fn with_primary(mut self, base: impl Into<String>) -> Self {
        self.primary_base = base.into();
        self
    }

    /// Set the origin base URL
    pub fn with_origin(mut self, base: impl Into<String>) -> Self {
        self.origin_base = base.into();
        self
    }

    /// Map a category tag to a bucket
    pub fn with_bucket(mut self, category: impl Into<String>, bucket: impl Into<String>) -> Self {
        self.buckets.insert(category.into(), bucket.into());
        self
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per candidate, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    #[serde(with = "duration_ms")]
    pub base_delay: Duration,
    /// Upper bound for any single delay
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,
    /// Add jitter to backoff
    pub jitter: bool,
    /// Largest fraction removed from a delay by jitter (0.0 - 1.0)
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: true,
            jitter_ratio: 0.3,
        }
    }
}

/// Loader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Candidate endpoints
    pub sources: SourceConfig,
    /// Retry policy
    pub retry: RetryConfig,
    /// Circuit breakers
    pub breaker: BreakerConfig,
    /// Payload cache
    pub cache: CacheConfig,
    /// Maximum concurrent fetch sequences
    pub max_concurrent: usize,
    /// Timeout for a single transport call
    #[serde(with = "duration_ms")]
    pub attempt_timeout: Duration,
    /// Connect timeout for the bundled HTTP transport
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    /// Negotiate compressed transfer encodings
    pub compression: bool,
    /// User agent string
    pub user_agent: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sources: SourceConfig::default(),
            retry: RetryConfig::default(),
            breaker: BreakerConfig::default(),
            cache: CacheConfig::default(),
            max_concurrent: 6,
            attempt_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            compression: true,
            user_agent: format!("cadence-fetch/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file; missing fields take defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Set candidate endpoints
    pub fn with_sources(mut self, sources: SourceConfig) -> Self {
        self.sources = sources;
        self
    }

    /// Set retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set breaker configuration
    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// Set cache configuration
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Set maximum concurrent fetches
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Set per-attempt timeout
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Reject configurations that would only fail later inside `load`
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(EngineError::Configuration(msg.to_string()));

        if self.max_concurrent == 0 {
            return invalid("max_concurrent must be at least 1");
        }
        if self.attempt_timeout.is_zero() {
            return invalid("attempt_timeout must be positive");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1");
        }
        if self.retry.max_delay < self.retry.base_delay {
            return invalid("retry.max_delay must not be smaller than retry.base_delay");
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_ratio) {
            return invalid("retry.jitter_ratio must be within 0.0..=1.0");
        }
        if self.breaker.failure_threshold == 0 {
            return invalid("breaker.failure_threshold must be at least 1");
        }
        if self.cache.max_size == 0 {
            return invalid("cache.max_size must be positive");
        }
        if self.cache.max_age.is_zero() {
            return invalid("cache.max_age must be positive");
        }

        let sources = &self.sources;
        for (label, base) in [("primary", &sources.primary_base), ("origin", &sources.origin_base)] {
            if base.trim().is_empty() {
                return Err(EngineError::Configuration(format!(
                    "{label} base URL is empty"
                )));
            }
            url::Url::parse(base).map_err(|e| {
                EngineError::Configuration(format!("{label} base URL {base:?}: {e}"))
            })?;
        }
        if sources.primary_name.is_empty() || sources.origin_name.is_empty() {
            return invalid("endpoint names must not be empty");
        }
        if sources.primary_name == sources.origin_name {
            return invalid("primary and origin endpoint names must differ");
        }
        if sources.default_bucket.trim().is_empty() {
            return invalid("default_bucket must not be empty");
        }
        if let Some((category, _)) = sources.buckets.iter().find(|(_, b)| b.trim().is_empty()) {
            return Err(EngineError::Configuration(format!(
                "bucket for category {category:?} is empty"
            )));
        }

        Ok(())
    }
}

/// Serialize durations as integer milliseconds
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
