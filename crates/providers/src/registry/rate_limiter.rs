//! Token bucket rate limiter for providers.
//!
//! Each registered provider gets its own bucket sized from its descriptor.
//! The bucket map is fixed at construction, so acquiring a token only locks
//! that provider's bucket.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, warn};

use super::descriptor::RateLimit;
use super::ProviderRegistry;
use crate::models::ProviderId;

/// Token bucket for a single provider.
#[derive(Debug)]
struct TokenBucket {
    /// Current number of available tokens.
    tokens: f64,
    /// Last time the bucket was refilled.
    last_update: Instant,
    /// Refill rate in tokens per second.
    rate: f64,
    /// Maximum bucket capacity (burst size).
    capacity: f64,
}

impl TokenBucket {
    fn from_limit(limit: &RateLimit) -> Self {
        let capacity = limit.max_concurrency.max(1) as f64;
        Self {
            tokens: capacity,
            last_update: Instant::now(),
            rate: limit.requests_per_minute as f64 / 60.0,
            capacity,
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_update = now;
    }

    /// Take a token if one is available, otherwise report the wait.
    fn take(&mut self) -> Result<(), Duration> {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(missing / self.rate))
        }
    }
}

/// Per-provider token buckets.
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: HashMap<ProviderId, Mutex<TokenBucket>>,
}

impl RateLimiter {
    pub fn from_registry(registry: &ProviderRegistry) -> Self {
        let buckets = registry
            .iter()
            .map(|p| (p.id.clone(), Mutex::new(TokenBucket::from_limit(&p.rate_limit))))
            .collect();
        Self { buckets }
    }

    /// Lock a bucket, recovering from poison.
    ///
    /// The worst case after a poisoned lock is a slightly wrong token count.
    fn lock(bucket: &Mutex<TokenBucket>) -> MutexGuard<'_, TokenBucket> {
        bucket.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter bucket mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Wait until a token is available for `provider`.
    ///
    /// Providers without a bucket are not limited.
    pub async fn acquire(&self, provider: &str) {
        let Some(bucket) = self.buckets.get(provider) else {
            return;
        };

        loop {
            let wait = match Self::lock(bucket).take() {
                Ok(()) => return,
                Err(wait) => wait,
            };

            debug!("Rate limiter: waiting {:?} for provider '{}'", wait, provider);
            tokio::time::sleep(wait).await;
        }
    }
}
