//! Immutable provider descriptors.
//!
//! A descriptor is built once from a [`ProviderConfig`] entry at startup and
//! never mutated afterwards. All validation happens here so a malformed entry
//! fails the process before any request is served.

use std::collections::BTreeSet;
use std::time::Duration;

use url::Url;

use crate::config::ProviderConfig;
use crate::errors::ConfigError;
use crate::models::{Category, ProviderId};

/// Rate limiting configuration for a provider.
///
/// Controls how aggressively we call a provider to avoid hitting its quota.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimit {
    /// Maximum requests allowed per minute.
    pub requests_per_minute: u32,

    /// Maximum concurrent in-flight calls to this provider.
    pub max_concurrency: usize,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            max_concurrency: 4,
        }
    }
}

/// Static description of one external provider.
#[derive(Clone, Debug)]
pub struct ProviderDescriptor {
    pub id: ProviderId,
    pub category: Category,
    pub endpoint: Url,
    /// Lower values are tried first.
    pub priority: u32,
    /// Lowercased capability tags, e.g. `spot_price`, `headlines`.
    pub capabilities: BTreeSet<String>,
    /// Hard deadline for a single call.
    pub timeout: Duration,
    pub rate_limit: RateLimit,
    /// Environment variable holding the API key, if the provider needs one.
    pub api_key_env: Option<String>,
}

impl ProviderDescriptor {
    /// Whether this provider can serve requests restricted to `capability`.
    ///
    /// A request without a capability filter matches every provider.
    pub fn supports(&self, capability: Option<&str>) -> bool {
        match capability {
            Some(capability) => self.capabilities.contains(capability),
            None => true,
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.rate_limit.max_concurrency
    }
}

impl TryFrom<&ProviderConfig> for ProviderDescriptor {
    type Error = ConfigError;

    fn try_from(config: &ProviderConfig) -> Result<Self, Self::Error> {
        let id = config.id.trim();
        if id.is_empty() {
            return Err(ConfigError::invalid_provider("<unnamed>", "id", "must not be empty"));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            return Err(ConfigError::invalid_provider(
                id,
                "id",
                "may only contain letters, digits, '_', '-' and '.'",
            ));
        }

        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| ConfigError::invalid_provider(id, "endpoint", e.to_string()))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(ConfigError::invalid_provider(
                id,
                "endpoint",
                format!("unsupported scheme '{}'", endpoint.scheme()),
            ));
        }

        if config.timeout_ms == 0 {
            return Err(ConfigError::invalid_provider(id, "timeout_ms", "must be positive"));
        }
        if config.max_concurrency == 0 {
            return Err(ConfigError::invalid_provider(
                id,
                "max_concurrency",
                "must be positive",
            ));
        }
        if config.requests_per_minute == 0 {
            return Err(ConfigError::invalid_provider(
                id,
                "requests_per_minute",
                "must be positive",
            ));
        }

        let capabilities = config
            .capabilities
            .iter()
            .map(|c| c.trim().to_ascii_lowercase())
            .filter(|c| !c.is_empty())
            .collect();

        Ok(Self {
            id: ProviderId::from(id),
            category: config.category,
            endpoint,
            priority: config.priority,
            capabilities,
            timeout: Duration::from_millis(config.timeout_ms),
            rate_limit: RateLimit {
                requests_per_minute: config.requests_per_minute,
                max_concurrency: config.max_concurrency,
            },
            api_key_env: config.api_key_env.clone(),
        })
    }
}
