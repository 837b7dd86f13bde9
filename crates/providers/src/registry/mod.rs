//! Provider registry module.
//!
//! This module holds the static side of the provider pool:
//! - Provider descriptors validated from configuration
//! - The registry listing providers per category in priority order
//! - Rate limiting per provider

mod descriptor;
mod provider_registry;
mod rate_limiter;

pub use descriptor::{ProviderDescriptor, RateLimit};
pub use provider_registry::ProviderRegistry;
pub use rate_limiter::RateLimiter;
