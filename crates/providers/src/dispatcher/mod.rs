//! Request dispatch.
//!
//! The dispatcher turns a [`LogicalRequest`] into an [`AggregatedResponse`]:
//!
//! 1. Serve a fresh cache entry if there is one
//! 2. Ask the selector for candidates
//! 3. Call them according to the category's dispatch mode
//!    (sequential failover, or bounded-parallel batches that are merged)
//! 4. Fall back to the lexical analyzer for sentiment, or answer
//!    `Unavailable` for other categories
//! 5. Cache the response with the TTL matching how it was produced
//!
//! Provider errors never leave this module: they are recorded in the health
//! tracker and in the response diagnostics.
//!
//! Every provider call runs in its own spawned task that owns the health
//! permit, so the outcome is recorded even when the caller stops waiting.

mod aggregate;
mod diagnostics;


pub use diagnostics::{AttemptError, DispatchDiagnostics, ProviderAttempt, SkipReason};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::ResponseCache;
use crate::config::{CacheConfig, CategoryPolicies, CategoryPolicy, RetryConfig};
use crate::errors::{ProviderError, RetryClass};
use crate::health::{CallPermit, HealthTracker};
use crate::models::{AggregatedResponse, DispatchMode, LogicalRequest, Payload, ProviderId};
use crate::registry::{ProviderDescriptor, ProviderRegistry, RateLimiter};
use crate::selector::Selector;
use crate::sentiment::LexicalSentimentAnalyzer;
use crate::transport::TransportSet;

/// Outcome of calling one provider, retries included.
struct ProviderRun {
    payload: Option<Payload>,
    diagnostics: DispatchDiagnostics,
}

/// Tunables the dispatcher reads on every request.
#[derive(Clone, Debug)]
pub(crate) struct DispatchSettings {
    pub policies: CategoryPolicies,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
}

pub struct Dispatcher {
    selector: Selector,
    health: Arc<HealthTracker>,
    rate_limiter: Arc<RateLimiter>,
    /// Per-provider in-flight limit.
    concurrency: HashMap<ProviderId, Arc<Semaphore>>,
    transports: TransportSet,
    cache: Arc<ResponseCache>,
    analyzer: LexicalSentimentAnalyzer,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub(crate) fn new(
        registry: Arc<ProviderRegistry>,
        health: Arc<HealthTracker>,
        transports: TransportSet,
        cache: Arc<ResponseCache>,
        analyzer: LexicalSentimentAnalyzer,
        settings: DispatchSettings,
    ) -> Self {
        let concurrency = registry
            .iter()
            .map(|p| (p.id.clone(), Arc::new(Semaphore::new(p.max_concurrency()))))
            .collect();
        let rate_limiter = Arc::new(RateLimiter::from_registry(&registry));

        Self {
            selector: Selector::new(registry, health.clone()),
            health,
            rate_limiter,
            concurrency,
            transports,
            cache,
            analyzer,
            settings,
        }
    }

    /// Answer a logical request. Never fails: a total outage is a structured
    /// `Unavailable` response (or a lexical fallback for sentiment).
    pub async fn execute(&self, request: &LogicalRequest) -> AggregatedResponse {
        let key = request.cache_key();
        let category = request.category();

        if let Some(cached) = self.cache.get(key) {
            debug!("Cache hit for {}", key);
            return cached.as_cached();
        }

        let policy = self.settings.policies.for_category(category);
        let candidates = self
            .selector
            .select_candidates(category, request.capability());

        let mut diagnostics = DispatchDiagnostics::new();
        let live = if candidates.is_empty() {
            debug!("No candidates for {} request {}", category, key);
            None
        } else {
            match policy.mode {
                DispatchMode::Sequential => {
                    self.run_sequential(request, &candidates, &mut diagnostics)
                        .await
                }
                DispatchMode::Aggregate => {
                    self.run_aggregate(request, &candidates, policy, &mut diagnostics)
                        .await
                }
            }
        };

        if !diagnostics.is_empty() {
            debug!("Dispatch of {}: {}", key, diagnostics.summary());
        }

        let (response, ttl) = match live {
            Some((payload, provider_ids)) => (
                AggregatedResponse::live(request, payload, provider_ids, diagnostics),
                policy.ttl(),
            ),
            None if category.has_local_fallback() => {
                info!(
                    "No live {} provider answered, using lexical fallback",
                    category
                );
                let reading = self.analyzer.classify(request.text());
                (
                    AggregatedResponse::fallback(request, reading, diagnostics),
                    self.settings.cache.fallback_ttl(),
                )
            }
            None => {
                let reason = if candidates.is_empty() {
                    format!("no {} provider available", category)
                } else {
                    format!("all {} providers failed", category)
                };
                warn!("{} for request {}", reason, key);
                (
                    AggregatedResponse::unavailable(request, reason, diagnostics),
                    self.settings.cache.unavailable_ttl(),
                )
            }
        };

        // a zero category TTL disables caching for every outcome
        if !policy.ttl().is_zero() {
            self.cache.put(key, response.clone(), ttl);
        }
        response
    }

    /// Try candidates one at a time, stop at the first success.
    async fn run_sequential(
        &self,
        request: &LogicalRequest,
        candidates: &[Arc<ProviderDescriptor>],
        diagnostics: &mut DispatchDiagnostics,
    ) -> Option<(Payload, Vec<ProviderId>)> {
        for provider in candidates {
            let permit = match self.health.try_acquire(&provider.id) {
                Ok(permit) => permit,
                Err(denied) => {
                    debug!("Provider '{}' not admitted: {:?}", provider.id, denied);
                    diagnostics.record_skip(provider.id.clone(), denied.into());
                    continue;
                }
            };

            let run = self.run_provider(provider.clone(), request, permit).await;
            diagnostics.extend(run.diagnostics);
            if let Some(payload) = run.payload {
                return Some((payload, vec![provider.id.clone()]));
            }
        }
        None
    }

    /// Call admitted candidates in batches of `max_parallel` sharing one
    /// deadline and merge whatever succeeded. A batch without any success
    /// moves on to the next candidates.
    async fn run_aggregate(
        &self,
        request: &LogicalRequest,
        candidates: &[Arc<ProviderDescriptor>],
        policy: &CategoryPolicy,
        diagnostics: &mut DispatchDiagnostics,
    ) -> Option<(Payload, Vec<ProviderId>)> {
        let max_parallel = policy.max_parallel.max(1);
        let mut remaining = candidates.iter();

        loop {
            let mut batch = Vec::with_capacity(max_parallel);
            while batch.len() < max_parallel {
                let Some(provider) = remaining.next() else {
                    break;
                };
                match self.health.try_acquire(&provider.id) {
                    Ok(permit) => batch.push((provider.clone(), permit)),
                    Err(denied) => diagnostics.record_skip(provider.id.clone(), denied.into()),
                }
            }
            if batch.is_empty() {
                return None;
            }

            let deadline = Instant::now() + policy.aggregate_deadline();
            let mut pending: HashSet<usize> = (0..batch.len()).collect();
            let mut ids: Vec<ProviderId> = Vec::with_capacity(batch.len());
            let mut in_flight = FuturesUnordered::new();
            for (index, (provider, permit)) in batch.into_iter().enumerate() {
                ids.push(provider.id.clone());
                in_flight.push(async move {
                    let run = self.run_provider(provider, request, permit).await;
                    (index, run)
                });
            }

            let mut successes: Vec<(usize, Payload)> = Vec::new();
            let mut runs: Vec<(usize, DispatchDiagnostics)> = Vec::new();
            loop {
                match tokio::time::timeout_at(deadline, in_flight.next()).await {
                    Ok(Some((index, run))) => {
                        pending.remove(&index);
                        if let Some(payload) = run.payload {
                            successes.push((index, payload));
                        }
                        runs.push((index, run.diagnostics));
                    }
                    Ok(None) => break,
                    Err(_) => {
                        warn!(
                            "Aggregation deadline of {:?} passed with {} calls outstanding",
                            policy.aggregate_deadline(),
                            pending.len()
                        );
                        break;
                    }
                }
            }
            // outstanding calls keep running detached and still report to health
            drop(in_flight);

            runs.sort_by_key(|(index, _)| *index);
            for (_, run) in runs {
                diagnostics.extend(run);
            }
            let mut late: Vec<usize> = pending.into_iter().collect();
            late.sort_unstable();
            for index in late {
                diagnostics.record_skip(ids[index].clone(), SkipReason::DeadlineExceeded);
            }

            if !successes.is_empty() {
                successes.sort_by_key(|(index, _)| *index);
                let results = successes
                    .into_iter()
                    .map(|(index, payload)| (ids[index].clone(), payload))
                    .collect();
                return aggregate::merge_payloads(results);
            }
        }
    }

    /// Call one provider, retrying transient failures on the same provider.
    ///
    /// The first attempt uses the permit the caller was admitted with; later
    /// attempts are admitted again so an opened circuit stops the retries.
    async fn run_provider(
        &self,
        provider: Arc<ProviderDescriptor>,
        request: &LogicalRequest,
        permit: CallPermit,
    ) -> ProviderRun {
        let mut diagnostics = DispatchDiagnostics::new();
        let max_attempts = self.settings.retry.max_attempts.max(1);
        let mut permit = Some(permit);
        let mut attempt = 1;

        loop {
            let current = match permit.take() {
                Some(permit) => permit,
                None => match self.health.try_acquire(&provider.id) {
                    Ok(permit) => permit,
                    Err(denied) => {
                        diagnostics.record_skip(provider.id.clone(), denied.into());
                        break;
                    }
                },
            };

            let handle = self.spawn_call(provider.clone(), request, current);
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(ProviderError::unreachable(
                    &*provider.id,
                    format!("call task failed: {}", e),
                )),
            };

            match result {
                Ok((payload, latency)) => {
                    debug!("Provider '{}' answered in {:?}", provider.id, latency);
                    diagnostics.record_success(provider.id.clone(), latency);
                    return ProviderRun {
                        payload: Some(payload),
                        diagnostics,
                    };
                }
                Err(error) => {
                    diagnostics.record_error(provider.id.clone(), &error);

                    if error.retry_class() == RetryClass::SameProvider && attempt < max_attempts {
                        info!(
                            "Provider '{}' failed with {}, retrying (attempt {}/{})",
                            provider.id,
                            error,
                            attempt + 1,
                            max_attempts
                        );
                        attempt += 1;
                        tokio::time::sleep(self.settings.retry.backoff()).await;
                        continue;
                    }

                    warn!("Provider '{}' failed with {}, trying next provider", provider.id, error);
                    break;
                }
            }
        }

        ProviderRun {
            payload: None,
            diagnostics,
        }
    }

    /// Run one call on its own task.
    ///
    /// The task waits for a concurrency slot and a rate-limit token, bounds the
    /// transport call by the provider timeout and resolves `permit` with the
    /// outcome.
    fn spawn_call(
        &self,
        provider: Arc<ProviderDescriptor>,
        request: &LogicalRequest,
        permit: CallPermit,
    ) -> JoinHandle<Result<(Payload, Duration), ProviderError>> {
        let Some(transport) = self.transports.get(request.category()).cloned() else {
            let error = ProviderError::unreachable(
                &*provider.id,
                format!("no transport for {}", request.category()),
            );
            // dropping the permit gives back a trial slot without blaming the provider
            drop(permit);
            return tokio::spawn(async move { Err(error) });
        };

        let slots = self.concurrency.get(&provider.id).cloned();
        let rate_limiter = self.rate_limiter.clone();
        let request = request.clone();

        tokio::spawn(async move {
            let _slot = match slots {
                Some(slots) => slots.acquire_owned().await.ok(),
                None => None,
            };
            rate_limiter.acquire(&provider.id).await;

            let started = Instant::now();
            let call = tokio::time::timeout(provider.timeout, transport.call(&provider, &request));
            let result = match call.await {
                Ok(Ok(payload)) if payload.category() == Some(request.category()) => Ok(payload),
                Ok(Ok(payload)) => Err(ProviderError::rejected(
                    &*provider.id,
                    format!(
                        "returned {} payload for a {} request",
                        payload
                            .category()
                            .map_or_else(|| "unavailable".to_string(), |c| c.to_string()),
                        request.category()
                    ),
                )),
                Ok(Err(error)) => Err(error),
                Err(_) => Err(ProviderError::Timeout {
                    provider: provider.id.to_string(),
                    timeout_ms: provider.timeout.as_millis() as u64,
                }),
            };
            let latency = started.elapsed();

            match &result {
                Ok(_) => permit.record_success(latency),
                Err(error) => permit.record_failure(error.kind()),
            }
            result.map(|payload| (payload, latency))
        })
    }
}
