use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{anyhow, Context};

pub struct Config {
    pub listen_addr: SocketAddr,
    /// Engine configuration document (providers and tunables).
    pub engine_config_path: PathBuf,
    pub cors_allow: Vec<String>,
    pub request_timeout: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let listen_addr: SocketAddr = std::env::var("CRYPTODASH_LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .context("Invalid CRYPTODASH_LISTEN_ADDR")?;
        let engine_config_path = std::env::var("CRYPTODASH_CONFIG")
            .map(PathBuf::from)
            .map_err(|_| anyhow!("CRYPTODASH_CONFIG must point to the engine configuration file"))?;
        let cors_allow = std::env::var("CRYPTODASH_CORS_ALLOW_ORIGINS")
            .unwrap_or_else(|_| "*".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let timeout_ms: u64 = std::env::var("CRYPTODASH_REQUEST_TIMEOUT_MS")
            .unwrap_or_else(|_| "30000".into())
            .parse()
            .unwrap_or(30000);
        Ok(Self {
            listen_addr,
            engine_config_path,
            cors_allow,
            request_timeout: Duration::from_millis(timeout_ms),
        })
    }
}
