//! In-memory response cache with per-entry TTL.
//!
//! Entries live in a sharded [`DashMap`], so reads and writes of different
//! keys never contend on one lock. Expired entries read as absent and are
//! removed on access; [`ResponseCache::sweep`] (or the background sweeper)
//! reclaims the ones nobody asks for again.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::clock::SharedClock;
use crate::models::AggregatedResponse;

#[derive(Clone, Debug)]
struct CacheEntry {
    response: AggregatedResponse,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Cache of aggregated responses keyed by logical request.
pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
    clock: SharedClock,
}

impl ResponseCache {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Cached response for `key`, if present and not expired.
    pub fn get(&self, key: &str) -> Option<AggregatedResponse> {
        let now = self.clock.now();
        {
            let entry = self.entries.get(key)?;
            if !entry.is_expired(now) {
                return Some(entry.response.clone());
            }
        }

        // the read guard is gone, removing now cannot deadlock the shard
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        None
    }

    /// Store `response` under `key` for `ttl`. Last writer wins.
    ///
    /// A zero TTL stores nothing.
    pub fn put(&self, key: impl Into<String>, response: AggregatedResponse, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let expires_at = self.clock.now() + ttl;
        self.entries.insert(
            key.into(),
            CacheEntry {
                response,
                expires_at,
            },
        );
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of stored entries, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every expired entry and return how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Sweep periodically on the current runtime.
    ///
    /// The task holds only a weak reference and exits once the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    debug!("Response cache dropped, stopping sweeper");
                    break;
                };
                let removed = cache.sweep();
                if removed > 0 {
                    debug!("Cache sweep removed {} expired entries", removed);
                }
            }
        })
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::dispatcher::DispatchDiagnostics;
    use crate::models::LogicalRequest;

    fn response(symbol: &str) -> AggregatedResponse {
        AggregatedResponse::unavailable(
            &LogicalRequest::market_snapshot(symbol),
            "test",
            DispatchDiagnostics::default(),
        )
    }

    fn cache() -> (ResponseCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (ResponseCache::new(clock.clone()), clock)
    }

    #[test]
    fn test_put_then_get_within_ttl() {
        let (cache, clock) = cache();
        let value = response("BTC");
        cache.put("k", value.clone(), Duration::from_secs(30));

        clock.advance(Duration::from_secs(29));
        assert_eq!(cache.get("k").unwrap().request_key, value.request_key);
    }

    #[test]
    fn test_expired_entry_reads_as_absent_and_is_removed() {
        let (cache, clock) = cache();
        cache.put("k", response("BTC"), Duration::from_secs(30));

        clock.advance(Duration::from_secs(30));
        assert!(cache.get("k").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_zero_ttl_is_not_stored() {
        let (cache, _) = cache();
        cache.put("k", response("BTC"), Duration::ZERO);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_last_writer_wins() {
        let (cache, _) = cache();
        cache.put("k", response("BTC"), Duration::from_secs(30));
        cache.put("k", response("ETH"), Duration::from_secs(30));

        let expected = LogicalRequest::market_snapshot("ETH");
        assert_eq!(cache.get("k").unwrap().request_key, expected.cache_key());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let (cache, _) = cache();
        cache.put("a", response("BTC"), Duration::from_secs(30));
        cache.put("b", response("ETH"), Duration::from_secs(30));

        assert!(cache.invalidate("a"));
        assert!(!cache.invalidate("a"));
        assert!(cache.get("a").is_none());

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let (cache, clock) = cache();
        cache.put("short", response("BTC"), Duration::from_secs(10));
        cache.put("long", response("ETH"), Duration::from_secs(60));

        clock.advance(Duration::from_secs(10));
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("long").is_some());
    }

    #[tokio::test]
    async fn test_sweeper_stops_when_cache_dropped() {
        let cache = Arc::new(ResponseCache::new(crate::clock::system_clock()));
        let handle = cache.spawn_sweeper(Duration::from_millis(5));
        drop(cache);

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("sweeper should exit")
            .unwrap();
    }
}
