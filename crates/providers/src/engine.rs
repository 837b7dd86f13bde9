//! Engine assembly and the public entry point.

use std::sync::Arc;

use log::{debug, info};
use tokio::task::JoinHandle;

use crate::cache::ResponseCache;
use crate::clock::{system_clock, SharedClock};
use crate::config::EngineConfig;
use crate::dispatcher::{DispatchSettings, Dispatcher};
use crate::errors::ConfigError;
use crate::health::{HealthTracker, ProviderHealthSnapshot};
use crate::models::{AggregatedResponse, Category, LogicalRequest};
use crate::registry::ProviderRegistry;
use crate::sentiment::LexicalSentimentAnalyzer;
use crate::transport::{SharedTransport, TransportSet};

/// Provider resilience and aggregation engine.
///
/// Owns the registry, health tracker, cache and dispatcher. Cheap to share
/// behind an `Arc`; every method takes `&self`.
pub struct ProviderEngine {
    registry: Arc<ProviderRegistry>,
    health: Arc<HealthTracker>,
    cache: Arc<ResponseCache>,
    dispatcher: Dispatcher,
    sweeper: Option<JoinHandle<()>>,
}

impl ProviderEngine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Answer a logical request.
    ///
    /// Never returns an error: provider failures end up in the response
    /// diagnostics and a total outage is an `Unavailable` payload.
    pub async fn handle(&self, request: &LogicalRequest) -> AggregatedResponse {
        self.dispatcher.execute(request).await
    }

    /// Health of every registered provider, in registration order.
    pub fn health_snapshot(&self) -> Vec<ProviderHealthSnapshot> {
        self.health.snapshot()
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }
}

impl Drop for ProviderEngine {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

/// Builds a [`ProviderEngine`] from configuration and injected transports.
pub struct EngineBuilder {
    config: EngineConfig,
    clock: Option<SharedClock>,
    transports: TransportSet,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            clock: None,
            transports: TransportSet::new(),
        }
    }

    /// Time source for circuit and cache timing. Defaults to the system clock.
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn transport(mut self, category: Category, transport: SharedTransport) -> Self {
        self.transports.insert(category, transport);
        self
    }

    pub fn transports(mut self, transports: TransportSet) -> Self {
        self.transports = transports;
        self
    }

    /// Validate the configuration and assemble the engine.
    ///
    /// Fails when the configuration is malformed or a category with
    /// registered providers has no transport. When called inside a Tokio
    /// runtime and a sweep interval is configured, the cache sweeper starts.
    pub fn build(self) -> Result<ProviderEngine, ConfigError> {
        let Self {
            config,
            clock,
            transports,
        } = self;

        config.validate()?;
        let registry = Arc::new(ProviderRegistry::from_configs(&config.providers)?);
        for category in registry.categories() {
            if !transports.contains(category) {
                return Err(ConfigError::MissingTransport(category));
            }
        }
        let analyzer = LexicalSentimentAnalyzer::new(&config.sentiment)?;

        let clock = clock.unwrap_or_else(system_clock);
        let health = Arc::new(HealthTracker::new(
            &registry,
            config.circuit.clone(),
            clock.clone(),
        ));
        let cache = Arc::new(ResponseCache::new(clock));

        let sweeper = match (
            config.cache.sweep_interval(),
            tokio::runtime::Handle::try_current(),
        ) {
            (Some(interval), Ok(_)) => Some(cache.spawn_sweeper(interval)),
            (Some(_), Err(_)) => {
                debug!("No Tokio runtime, cache sweeper not started");
                None
            }
            (None, _) => None,
        };

        let dispatcher = Dispatcher::new(
            registry.clone(),
            health.clone(),
            transports,
            cache.clone(),
            analyzer,
            DispatchSettings {
                policies: config.categories.clone(),
                retry: config.retry.clone(),
                cache: config.cache.clone(),
            },
        );

        info!(
            "Provider engine ready with {} providers across {} categories",
            registry.len(),
            registry.categories().len()
        );

        Ok(ProviderEngine {
            registry,
            health,
            cache,
            dispatcher,
            sweeper,
        })
    }
}
