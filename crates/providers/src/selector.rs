//! Candidate selection.
//!
//! Turns the static registry listing into the ordered list of providers worth
//! calling right now. Selection only reads health state; admission (and the
//! Open to HalfOpen transition) happens later in the dispatcher.

use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::health::HealthTracker;
use crate::models::Category;
use crate::registry::{ProviderDescriptor, ProviderRegistry};

pub struct Selector {
    registry: Arc<ProviderRegistry>,
    health: Arc<HealthTracker>,
}

impl Selector {
    pub fn new(registry: Arc<ProviderRegistry>, health: Arc<HealthTracker>) -> Self {
        Self { registry, health }
    }

    /// Ordered candidates for a category and optional capability filter.
    ///
    /// Providers with an open circuit still cooling off, or a half-open circuit
    /// with its trial in flight, are left out. The rest are ordered by base
    /// priority, then smoothed latency (unmeasured counts as zero), then id.
    pub fn select_candidates(
        &self,
        category: Category,
        capability: Option<&str>,
    ) -> Vec<Arc<ProviderDescriptor>> {
        let mut ranked: Vec<(Arc<ProviderDescriptor>, Duration)> = self
            .registry
            .list_providers(category)
            .into_iter()
            .filter(|p| p.supports(capability))
            .filter_map(|p| {
                let view = self.health.selection_view(&p.id)?;
                if !view.selectable {
                    debug!("Selector: skipping provider '{}', circuit not admitting", p.id);
                    return None;
                }
                Some((p, view.latency_ewma.unwrap_or(Duration::ZERO)))
            })
            .collect();

        ranked.sort_by(|(a, a_latency), (b, b_latency)| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a_latency.cmp(b_latency))
                .then_with(|| a.id.cmp(&b.id))
        });

        ranked.into_iter().map(|(p, _)| p).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{CircuitConfig, ProviderConfig};
    use crate::errors::ProviderErrorKind;

    fn entry(id: &str, priority: u32, capabilities: &[&str]) -> ProviderConfig {
        let mut config = ProviderConfig::new(id, Category::Market, "https://example.com/api");
        config.priority = priority;
        config.capabilities = capabilities.iter().map(|c| c.to_string()).collect();
        config
    }

    fn selector(entries: &[ProviderConfig]) -> (Selector, Arc<HealthTracker>, Arc<ManualClock>) {
        let registry = Arc::new(ProviderRegistry::from_configs(entries).unwrap());
        let clock = Arc::new(ManualClock::new());
        let config = CircuitConfig {
            failure_threshold: 1,
            ..CircuitConfig::default()
        };
        let health = Arc::new(HealthTracker::new(&registry, config, clock.clone()));
        (Selector::new(registry, health.clone()), health, clock)
    }

    fn ids(candidates: &[Arc<ProviderDescriptor>]) -> Vec<&str> {
        candidates.iter().map(|p| &*p.id).collect()
    }

    #[test]
    fn test_orders_by_priority_then_latency_then_id() {
        let (selector, health, _) = selector(&[
            entry("slow", 1, &[]),
            entry("fast", 1, &[]),
            entry("zz_cold", 1, &[]),
            entry("aa_cold", 1, &[]),
            entry("backup", 2, &[]),
        ]);
        health
            .try_acquire("slow")
            .unwrap()
            .record_success(Duration::from_millis(400));
        health
            .try_acquire("fast")
            .unwrap()
            .record_success(Duration::from_millis(50));

        let candidates = selector.select_candidates(Category::Market, None);
        assert_eq!(
            ids(&candidates),
            ["aa_cold", "zz_cold", "fast", "slow", "backup"]
        );
    }

    #[test]
    fn test_filters_by_capability() {
        let (selector, _, _) = selector(&[
            entry("spot", 1, &["spot_price"]),
            entry("ohlc", 1, &["ohlc"]),
            entry("both", 2, &["spot_price", "ohlc"]),
        ]);

        let candidates = selector.select_candidates(Category::Market, Some("ohlc"));
        assert_eq!(ids(&candidates), ["ohlc", "both"]);
        assert_eq!(selector.select_candidates(Category::Market, None).len(), 3);
        assert!(selector
            .select_candidates(Category::Market, Some("orderbook"))
            .is_empty());
    }

    #[test]
    fn test_skips_open_circuit_until_backoff_elapses() {
        let (selector, health, clock) = selector(&[entry("a", 1, &[]), entry("b", 2, &[])]);
        health
            .try_acquire("a")
            .unwrap()
            .record_failure(ProviderErrorKind::Unreachable);

        assert_eq!(ids(&selector.select_candidates(Category::Market, None)), ["b"]);

        clock.advance(Duration::from_secs(30));
        assert_eq!(
            ids(&selector.select_candidates(Category::Market, None)),
            ["a", "b"]
        );
    }

    #[test]
    fn test_skips_half_open_with_trial_in_flight() {
        let (selector, health, clock) = selector(&[entry("a", 1, &[]), entry("b", 2, &[])]);
        health
            .try_acquire("a")
            .unwrap()
            .record_failure(ProviderErrorKind::Timeout);
        clock.advance(Duration::from_secs(30));

        let trial = health.try_acquire("a").unwrap();
        assert_eq!(ids(&selector.select_candidates(Category::Market, None)), ["b"]);

        drop(trial);
        assert_eq!(
            ids(&selector.select_candidates(Category::Market, None)),
            ["a", "b"]
        );
    }

    #[test]
    fn test_selection_is_deterministic() {
        let (selector, _, _) = selector(&[
            entry("c", 3, &[]),
            entry("a", 3, &[]),
            entry("b", 3, &[]),
        ]);
        let first = ids(&selector.select_candidates(Category::Market, None))
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        for _ in 0..10 {
            let again = selector.select_candidates(Category::Market, None);
            assert_eq!(ids(&again), first);
        }
    }
}
