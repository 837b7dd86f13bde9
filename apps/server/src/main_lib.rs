use std::sync::Arc;

use anyhow::Context;
use cryptodash_providers::{EngineConfig, HttpTransport, ProviderEngine, TransportSet};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;

pub struct AppState {
    pub engine: Arc<ProviderEngine>,
}

impl AppState {
    pub fn new(engine: ProviderEngine) -> Arc<Self> {
        Arc::new(Self {
            engine: Arc::new(engine),
        })
    }
}

pub fn init_tracing() {
    let log_format = std::env::var("CRYPTODASH_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }
}

/// Load the engine configuration and wire every category to the HTTP transport.
pub async fn build_state(config: &Config) -> anyhow::Result<Arc<AppState>> {
    let engine_config = EngineConfig::from_file(&config.engine_config_path).with_context(|| {
        format!(
            "Loading engine configuration from {}",
            config.engine_config_path.display()
        )
    })?;
    tracing::info!(
        "Engine configuration loaded from {} ({} providers)",
        config.engine_config_path.display(),
        engine_config.providers.len()
    );

    let transport = Arc::new(HttpTransport::new());
    let engine = ProviderEngine::builder(engine_config)
        .transports(TransportSet::uniform(transport))
        .build()?;

    Ok(AppState::new(engine))
}
