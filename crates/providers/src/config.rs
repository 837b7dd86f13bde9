//! Engine configuration.
//!
//! The whole engine is described by one JSON document: the provider catalog
//! plus tunables for circuit breaking, retries, caching, per-category dispatch
//! and the lexical sentiment fallback. Every tunable has a default, so the
//! smallest valid document is `{"providers": []}`.
//!
//! ```json
//! {
//!   "circuit": { "failure_threshold": 5, "base_backoff_ms": 30000 },
//!   "categories": { "market": { "mode": "aggregate", "ttl_ms": 30000 } },
//!   "providers": [
//!     {
//!       "id": "coingecko",
//!       "category": "market",
//!       "endpoint": "https://api.coingecko.com/api/v3/simple/price",
//!       "priority": 1,
//!       "capabilities": ["spot_price"],
//!       "timeout_ms": 4000
//!     }
//!   ]
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::models::{Category, DispatchMode};

/// Top-level engine configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub circuit: CircuitConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub categories: CategoryPolicies,
    pub sentiment: SentimentConfig,
    pub providers: Vec<ProviderConfig>,
}

impl EngineConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    /// Check tunables. Provider entries are validated when the registry is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.circuit.validate()?;
        self.retry.validate()?;
        for category in Category::ALL {
            self.categories.for_category(category).validate()?;
        }
        self.sentiment.validate()
    }
}

/// Circuit breaker tunables.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    /// Consecutive failures that open a closed circuit.
    pub failure_threshold: u32,
    /// Failure fraction over the sliding window that opens a closed circuit.
    pub failure_rate_threshold: f64,
    /// Number of recent calls in the sliding window.
    pub rate_window: usize,
    /// Backoff for the first open episode.
    pub base_backoff_ms: u64,
    /// Upper bound for the exponential backoff.
    pub max_backoff_ms: u64,
    /// Weight of the newest sample in the latency moving average.
    pub latency_smoothing: f64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_rate_threshold: 0.5,
            rate_window: 10,
            base_backoff_ms: 30_000,
            max_backoff_ms: 600_000,
            latency_smoothing: 0.3,
        }
    }
}

impl CircuitConfig {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid_setting(
                "circuit.failure_threshold",
                "must be at least 1",
            ));
        }
        if !(self.failure_rate_threshold > 0.0 && self.failure_rate_threshold <= 1.0) {
            return Err(ConfigError::invalid_setting(
                "circuit.failure_rate_threshold",
                "must be in (0, 1]",
            ));
        }
        if self.rate_window == 0 {
            return Err(ConfigError::invalid_setting(
                "circuit.rate_window",
                "must be at least 1",
            ));
        }
        if self.base_backoff_ms == 0 || self.max_backoff_ms < self.base_backoff_ms {
            return Err(ConfigError::invalid_setting(
                "circuit.max_backoff_ms",
                "backoffs must be positive with max >= base",
            ));
        }
        if !(self.latency_smoothing > 0.0 && self.latency_smoothing <= 1.0) {
            return Err(ConfigError::invalid_setting(
                "circuit.latency_smoothing",
                "must be in (0, 1]",
            ));
        }
        Ok(())
    }
}

/// Retry policy for transient failures on one provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per provider and request, 1 disables retries.
    pub max_attempts: u32,
    /// Pause before retrying the same provider.
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 250,
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid_setting(
                "retry.max_attempts",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Cache tunables that are not tied to a category.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Interval of the background sweep, 0 disables it.
    pub sweep_interval_ms: u64,
    /// TTL of answers computed by the lexical fallback.
    pub fallback_ttl_ms: u64,
    /// TTL of "unavailable" answers.
    pub unavailable_ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: 60_000,
            fallback_ttl_ms: 60_000,
            unavailable_ttl_ms: 10_000,
        }
    }
}

impl CacheConfig {
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_ms > 0).then(|| Duration::from_millis(self.sweep_interval_ms))
    }

    pub fn fallback_ttl(&self) -> Duration {
        Duration::from_millis(self.fallback_ttl_ms)
    }

    pub fn unavailable_ttl(&self) -> Duration {
        Duration::from_millis(self.unavailable_ttl_ms)
    }
}

/// Dispatch and caching policy of one category.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CategoryPolicy {
    pub mode: DispatchMode,
    /// TTL of live answers, 0 disables caching.
    pub ttl_ms: u64,
    /// Concurrent calls per batch in aggregate mode.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Shared deadline of one aggregate batch.
    #[serde(default = "default_aggregate_deadline_ms")]
    pub aggregate_deadline_ms: u64,
}

fn default_max_parallel() -> usize {
    3
}

fn default_aggregate_deadline_ms() -> u64 {
    5_000
}

impl CategoryPolicy {
    pub fn sequential(ttl: Duration) -> Self {
        Self {
            mode: DispatchMode::Sequential,
            ttl_ms: ttl.as_millis() as u64,
            max_parallel: default_max_parallel(),
            aggregate_deadline_ms: default_aggregate_deadline_ms(),
        }
    }

    pub fn aggregate(ttl: Duration, max_parallel: usize, deadline: Duration) -> Self {
        Self {
            mode: DispatchMode::Aggregate,
            ttl_ms: ttl.as_millis() as u64,
            max_parallel,
            aggregate_deadline_ms: deadline.as_millis() as u64,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn aggregate_deadline(&self) -> Duration {
        Duration::from_millis(self.aggregate_deadline_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.mode == DispatchMode::Aggregate {
            if self.max_parallel == 0 {
                return Err(ConfigError::invalid_setting(
                    "categories.max_parallel",
                    "must be at least 1",
                ));
            }
            if self.aggregate_deadline_ms == 0 {
                return Err(ConfigError::invalid_setting(
                    "categories.aggregate_deadline_ms",
                    "must be positive",
                ));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryPolicies {
    pub market: CategoryPolicy,
    pub news: CategoryPolicy,
    pub sentiment: CategoryPolicy,
}

impl Default for CategoryPolicies {
    fn default() -> Self {
        Self {
            // Prices move fast, keep them briefly
            market: CategoryPolicy::aggregate(
                Duration::from_secs(30),
                default_max_parallel(),
                Duration::from_millis(default_aggregate_deadline_ms()),
            ),
            news: CategoryPolicy::sequential(Duration::from_secs(300)),
            sentiment: CategoryPolicy::sequential(Duration::from_secs(3600)),
        }
    }
}

impl CategoryPolicies {
    pub fn for_category(&self, category: Category) -> &CategoryPolicy {
        match category {
            Category::Market => &self.market,
            Category::News => &self.news,
            Category::Sentiment => &self.sentiment,
        }
    }
}

/// Tunables of the lexical sentiment fallback.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SentimentConfig {
    /// Scores above this are bullish.
    pub bullish_threshold: f64,
    /// Scores below this are bearish.
    pub bearish_threshold: f64,
    /// Confidence floor once at least one term matched.
    pub min_confidence: f64,
    /// Confidence of a fully one-sided text.
    pub max_confidence: f64,
    /// Confidence when nothing matched.
    pub no_match_confidence: f64,
    pub extra_bullish_terms: Vec<String>,
    pub extra_bearish_terms: Vec<String>,
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self {
            bullish_threshold: 0.15,
            bearish_threshold: -0.15,
            min_confidence: 0.5,
            max_confidence: 0.95,
            no_match_confidence: 0.3,
            extra_bullish_terms: Vec::new(),
            extra_bearish_terms: Vec::new(),
        }
    }
}

impl SentimentConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.bullish_threshold)
            || !(-1.0..=0.0).contains(&self.bearish_threshold)
        {
            return Err(ConfigError::invalid_setting(
                "sentiment.thresholds",
                "bullish must be in [0, 1] and bearish in [-1, 0]",
            ));
        }

        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !in_unit(self.min_confidence)
            || !in_unit(self.max_confidence)
            || !in_unit(self.no_match_confidence)
            || self.min_confidence > self.max_confidence
        {
            return Err(ConfigError::invalid_setting(
                "sentiment.confidence",
                "confidences must be in [0, 1] with min <= max",
            ));
        }

        let overlap = self.extra_bullish_terms.iter().find(|term| {
            self.extra_bearish_terms
                .iter()
                .any(|other| other.trim().eq_ignore_ascii_case(term.trim()))
        });
        if let Some(term) = overlap {
            return Err(ConfigError::invalid_setting(
                "sentiment.extra_terms",
                format!("'{}' is both bullish and bearish", term),
            ));
        }
        Ok(())
    }
}

/// One provider entry as written in the configuration file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    pub id: String,
    pub category: Category,
    pub endpoint: String,
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_priority() -> u32 {
    10
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_max_concurrency() -> usize {
    4
}

fn default_requests_per_minute() -> u32 {
    60
}

fn default_enabled() -> bool {
    true
}

impl ProviderConfig {
    /// Entry with default limits.
    pub fn new(id: impl Into<String>, category: Category, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            category,
            endpoint: endpoint.into(),
            priority: default_priority(),
            capabilities: Vec::new(),
            timeout_ms: default_timeout_ms(),
            max_concurrency: default_max_concurrency(),
            requests_per_minute: default_requests_per_minute(),
            api_key_env: None,
            enabled: default_enabled(),
        }
    }
}
