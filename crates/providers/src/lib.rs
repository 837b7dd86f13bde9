//! CryptoDash Providers Crate
//!
//! Resilient access to third-party crypto data providers (market prices,
//! news, sentiment).
//!
//! # Overview
//!
//! The providers crate supports:
//! - A registry of providers grouped by category, with priorities and
//!   capability tags
//! - Per-provider health tracking with a circuit breaker
//! - Sequential failover or bounded-parallel aggregation, per category
//! - Per-provider timeouts, retries, concurrency and rate limits
//! - A lexical sentiment fallback when no sentiment provider answers
//! - A TTL cache keyed by the normalized logical request
//!
//! # Architecture
//!
//! ```text
//! +------------------+     +------------------+
//! |  LogicalRequest  | --> |  ResponseCache   |  (hit: served_from_cache)
//! +------------------+     +------------------+
//!                                  | miss
//!                                  v
//!                          +------------------+
//!                          |     Selector     |  (registry + health)
//!                          +------------------+
//!                                  |
//!                                  v
//!                          +------------------+
//!                          |    Dispatcher    |  (failover / aggregate)
//!                          +------------------+
//!                                  |
//!                                  v
//!                          +------------------+
//!                          |    Transport     |  (HTTP, or injected)
//!                          +------------------+
//!                                  |
//!                                  v
//!                        +---------------------+
//!                        | AggregatedResponse  |
//!                        +---------------------+
//! ```
//!
//! # Core Types
//!
//! - [`ProviderEngine`] - Entry point: `handle()` and `health_snapshot()`
//! - [`LogicalRequest`] - Category plus normalized parameters
//! - [`AggregatedResponse`] - Payload, contributing providers and diagnostics
//! - [`EngineConfig`] - Providers, circuit, retry, cache and category policies
//! - [`ProviderTransport`] - Seam for calling a provider

pub mod cache;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod errors;
pub mod health;
pub mod models;
pub mod registry;
pub mod selector;
pub mod sentiment;
pub mod transport;

pub use models::{
    AggregatedResponse, Category, DispatchMode, Engine, LogicalRequest, MarketSnapshot,
    NewsArticle, NewsFeed, Payload, ProviderId, SentimentLabel, SentimentReading, SourceQuote,
};

pub use config::{
    CacheConfig, CategoryPolicies, CategoryPolicy, CircuitConfig, EngineConfig, ProviderConfig,
    RetryConfig, SentimentConfig,
};

pub use engine::{EngineBuilder, ProviderEngine};
pub use errors::{ConfigError, ProviderError, ProviderErrorKind, RetryClass};

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use dispatcher::{DispatchDiagnostics, ProviderAttempt, SkipReason};
pub use health::{CircuitState, HealthTracker, ProviderHealthSnapshot};
pub use registry::{ProviderDescriptor, ProviderRegistry};
pub use sentiment::LexicalSentimentAnalyzer;
pub use transport::{
    CanonicalJsonNormalizer, HttpTransport, ProviderTransport, ResponseNormalizer,
    SharedTransport, TransportSet,
};
