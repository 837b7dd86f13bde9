//! Runtime health state for every registered provider.
//!
//! The provider map is built once from the registry and never changes, so
//! each provider's state sits behind its own mutex and updates to one
//! provider never wait on another. Locks are held only for the read-modify-write
//! of a single provider and never across an await point.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{info, warn};
use serde::Serialize;

use super::circuit_breaker::{Admission, AdmissionDenied, Circuit, CircuitState, Transition};
use crate::clock::SharedClock;
use crate::config::CircuitConfig;
use crate::errors::ProviderErrorKind;
use crate::models::{Category, ProviderId};
use crate::registry::ProviderRegistry;

/// Health state of a single provider.
#[derive(Clone, Debug)]
pub struct ProviderHealthState {
    circuit: Circuit,
    /// Smoothed latency of successful calls, `None` until the first success.
    latency_ewma: Option<Duration>,
    total_calls: u64,
    total_failures: u64,
    last_error: Option<ProviderErrorKind>,
}

impl ProviderHealthState {
    fn new() -> Self {
        Self {
            circuit: Circuit::new(),
            latency_ewma: None,
            total_calls: 0,
            total_failures: 0,
            last_error: None,
        }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit.state()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.circuit.consecutive_failures()
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.circuit.consecutive_successes()
    }

    pub fn open_until(&self) -> Option<Instant> {
        self.circuit.open_until()
    }

    pub fn trial_in_flight(&self) -> bool {
        self.circuit.trial_in_flight()
    }

    pub fn latency_ewma(&self) -> Option<Duration> {
        self.latency_ewma
    }

    pub fn total_calls(&self) -> u64 {
        self.total_calls
    }

    pub fn total_failures(&self) -> u64 {
        self.total_failures
    }

    pub fn last_error(&self) -> Option<ProviderErrorKind> {
        self.last_error
    }

    /// Share of successful calls; 1.0 before any call was made.
    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 1.0;
        }
        (self.total_calls - self.total_failures) as f64 / self.total_calls as f64
    }

    fn observe_latency(&mut self, sample: Duration, smoothing: f64) {
        self.latency_ewma = Some(match self.latency_ewma {
            None => sample,
            Some(previous) => Duration::from_secs_f64(
                smoothing * sample.as_secs_f64() + (1.0 - smoothing) * previous.as_secs_f64(),
            ),
        });
    }
}

/// Result of a finished provider call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CallOutcome {
    Success { latency: Duration },
    Failure { kind: ProviderErrorKind },
}

/// What the selector needs to rank a provider, read without changing state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SelectionView {
    pub selectable: bool,
    pub latency_ewma: Option<Duration>,
}

/// Point-in-time health summary of one provider.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealthSnapshot {
    pub provider_id: ProviderId,
    pub category: Category,
    pub circuit_state: CircuitState,
    pub success_rate: f64,
    pub avg_latency_ms: Option<f64>,
    pub total_calls: u64,
    pub total_failures: u64,
    pub consecutive_failures: u32,
    /// Time left before an open circuit admits a trial.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_in_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ProviderErrorKind>,
}

#[derive(Debug)]
struct TrackedProvider {
    category: Category,
    state: Mutex<ProviderHealthState>,
}

/// Health tracker shared by the selector and the dispatcher.
pub struct HealthTracker {
    providers: HashMap<ProviderId, TrackedProvider>,
    /// Registration order, used for snapshots.
    order: Vec<ProviderId>,
    config: CircuitConfig,
    clock: SharedClock,
}

impl HealthTracker {
    pub fn new(registry: &ProviderRegistry, config: CircuitConfig, clock: SharedClock) -> Self {
        let order: Vec<ProviderId> = registry.iter().map(|p| p.id.clone()).collect();
        let providers = registry
            .iter()
            .map(|p| {
                (
                    p.id.clone(),
                    TrackedProvider {
                        category: p.category,
                        state: Mutex::new(ProviderHealthState::new()),
                    },
                )
            })
            .collect();

        Self {
            providers,
            order,
            config,
            clock,
        }
    }

    /// Lock a provider's state, recovering from poison.
    ///
    /// State updates are single assignments, a poisoned lock still holds
    /// consistent values.
    fn lock(provider: &TrackedProvider) -> MutexGuard<'_, ProviderHealthState> {
        provider.state.lock().unwrap_or_else(|poisoned| {
            warn!("Health state mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn log_transition(provider: &str, transition: Transition) {
        match transition.backoff {
            Some(backoff) => info!(
                "Circuit breaker: {} -> {} for provider '{}' (retry in {:?})",
                transition.from, transition.to, provider, backoff
            ),
            None => info!(
                "Circuit breaker: {} -> {} for provider '{}'",
                transition.from, transition.to, provider
            ),
        }
    }

    /// Ask permission to call `provider`.
    ///
    /// An open circuit whose cooling-off period has elapsed turns half-open
    /// here and the returned permit is its single trial.
    pub fn try_acquire(self: &Arc<Self>, provider: &str) -> Result<CallPermit, AdmissionDenied> {
        let Some((id, tracked)) = self.providers.get_key_value(provider) else {
            return Err(AdmissionDenied::UnknownProvider);
        };

        let now = self.clock.now();
        let (admission, transition) = Self::lock(tracked).circuit.admit(now);
        if let Some(transition) = transition {
            Self::log_transition(provider, transition);
        }

        match admission {
            Admission::Granted => Ok(CallPermit::new(self.clone(), id.clone(), false)),
            Admission::Trial => Ok(CallPermit::new(self.clone(), id.clone(), true)),
            Admission::Denied(reason) => Err(reason),
        }
    }

    /// Record the outcome of a call admitted with or without a trial slot.
    pub fn record_outcome(&self, provider: &str, outcome: CallOutcome, trial: bool) {
        let Some(tracked) = self.providers.get(provider) else {
            warn!("Outcome recorded for unknown provider '{}'", provider);
            return;
        };

        let now = self.clock.now();
        let transition = {
            let mut state = Self::lock(tracked);
            state.total_calls += 1;

            match outcome {
                CallOutcome::Success { latency } => {
                    state.observe_latency(latency, self.config.latency_smoothing);
                    state.circuit.on_success(trial, &self.config)
                }
                CallOutcome::Failure { kind } => {
                    state.total_failures += 1;
                    state.last_error = Some(kind);
                    state.circuit.on_failure(trial, now, &self.config)
                }
            }
        };

        if let Some(transition) = transition {
            Self::log_transition(provider, transition);
        }
    }

    fn release_trial(&self, provider: &str) {
        if let Some(tracked) = self.providers.get(provider) {
            Self::lock(tracked).circuit.release_trial();
        }
    }

    pub fn selection_view(&self, provider: &str) -> Option<SelectionView> {
        let now = self.clock.now();
        self.providers.get(provider).map(|tracked| {
            let state = Self::lock(tracked);
            SelectionView {
                selectable: state.circuit.is_selectable(now),
                latency_ewma: state.latency_ewma,
            }
        })
    }

    pub fn circuit_state(&self, provider: &str) -> Option<CircuitState> {
        self.providers
            .get(provider)
            .map(|tracked| Self::lock(tracked).circuit.state())
    }

    /// Copy of a provider's current state.
    pub fn state(&self, provider: &str) -> Option<ProviderHealthState> {
        self.providers
            .get(provider)
            .map(|tracked| Self::lock(tracked).clone())
    }

    /// Forget everything known about a provider.
    pub fn reset(&self, provider: &str) {
        if let Some(tracked) = self.providers.get(provider) {
            *Self::lock(tracked) = ProviderHealthState::new();
            info!("Circuit breaker: reset provider '{}'", provider);
        }
    }

    pub fn reset_all(&self) {
        for provider in &self.order {
            self.reset(provider);
        }
    }

    /// Health of every provider in registration order.
    pub fn snapshot(&self) -> Vec<ProviderHealthSnapshot> {
        let now = self.clock.now();
        self.order
            .iter()
            .filter_map(|id| {
                let tracked = self.providers.get(id)?;
                let state = Self::lock(tracked);
                let retry_in_ms = match state.circuit.state() {
                    CircuitState::Open => state
                        .circuit
                        .open_until()
                        .map(|until| until.saturating_duration_since(now).as_millis() as u64),
                    _ => None,
                };

                Some(ProviderHealthSnapshot {
                    provider_id: id.clone(),
                    category: tracked.category,
                    circuit_state: state.circuit.state(),
                    success_rate: state.success_rate(),
                    avg_latency_ms: state.latency_ewma.map(|l| l.as_nanos() as f64 / 1_000_000.0),
                    total_calls: state.total_calls,
                    total_failures: state.total_failures,
                    consecutive_failures: state.circuit.consecutive_failures(),
                    retry_in_ms,
                    last_error: state.last_error,
                })
            })
            .collect()
    }
}

impl std::fmt::Debug for HealthTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthTracker")
            .field("providers", &self.order)
            .field("config", &self.config)
            .finish()
    }
}

/// Permission to make one provider call.
///
/// Resolve it with [`CallPermit::record_success`] or
/// [`CallPermit::record_failure`]. A trial permit dropped unresolved gives its
/// slot back so the next admission can probe instead.
#[derive(Debug)]
pub struct CallPermit {
    tracker: Arc<HealthTracker>,
    provider: ProviderId,
    trial: bool,
    resolved: bool,
}

impl CallPermit {
    fn new(tracker: Arc<HealthTracker>, provider: ProviderId, trial: bool) -> Self {
        Self {
            tracker,
            provider,
            trial,
            resolved: false,
        }
    }

    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn record_success(mut self, latency: Duration) {
        self.resolve(CallOutcome::Success { latency });
    }

    pub fn record_failure(mut self, kind: ProviderErrorKind) {
        self.resolve(CallOutcome::Failure { kind });
    }

    fn resolve(&mut self, outcome: CallOutcome) {
        self.resolved = true;
        self.tracker
            .record_outcome(&self.provider, outcome, self.trial);
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if self.trial && !self.resolved {
            self.tracker.release_trial(&self.provider);
        }
    }
}
