//! Per-provider circuit breaker state machine.
//!
//! The circuit has three states:
//!
//! - **Closed**: normal operation, calls are admitted.
//! - **Open**: the provider is failing, calls are skipped until `open_until`.
//! - **HalfOpen**: exactly one trial call probes whether the provider recovered.
//!
//! ```text
//!            failures >= threshold
//!            or failure rate > limit
//!   Closed ─────────────────────────▶ Open ◀──────────┐
//!     ▲                                │              │ trial failed
//!     │ trial succeeded                │ now >= open_until,
//!     │                                ▼ next admission
//!     └──────────────────────────── HalfOpen ─────────┘
//! ```
//!
//! Probing is piggybacked on normal traffic: there is no timer, the first
//! admission after `open_until` turns the circuit half-open. Every method
//! takes `now` explicitly so transitions can be tested without sleeping.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::CircuitConfig;

/// Circuit breaker state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - calls are admitted.
    Closed,
    /// Provider is failing - calls are skipped.
    Open,
    /// Testing recovery - one trial call at a time.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Result of asking the circuit for permission to call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Admission {
    /// Closed circuit, ordinary call.
    Granted,
    /// Half-open circuit, this call is the single recovery probe.
    Trial,
    Denied(AdmissionDenied),
}

/// Why a call was not admitted.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum AdmissionDenied {
    /// Circuit is open, cooling off for another `retry_in_ms`.
    CircuitOpen { retry_in_ms: u64 },
    /// Circuit is half-open and its trial is still in flight.
    TrialInFlight,
    /// The provider is not registered.
    UnknownProvider,
}

/// A state change caused by an admission or an outcome.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
    /// Backoff applied when the transition opened the circuit.
    pub backoff: Option<Duration>,
}

/// Circuit state for a single provider.
#[derive(Clone, Debug)]
pub(crate) struct Circuit {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    /// Set exactly when entering Open, cleared when entering Closed.
    open_until: Option<Instant>,
    /// Open episodes since the circuit last closed; drives the backoff exponent.
    open_episodes: u32,
    /// Outcomes of the most recent calls while closed, `true` = success.
    window: VecDeque<bool>,
    trial_in_flight: bool,
}

impl Circuit {
    pub(crate) fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            open_until: None,
            open_episodes: 0,
            window: VecDeque::new(),
            trial_in_flight: false,
        }
    }

    pub(crate) fn state(&self) -> CircuitState {
        self.state
    }

    pub(crate) fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub(crate) fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }

    pub(crate) fn open_until(&self) -> Option<Instant> {
        self.open_until
    }

    pub(crate) fn trial_in_flight(&self) -> bool {
        self.trial_in_flight
    }

    /// Whether the selector should offer this provider, without changing state.
    pub(crate) fn is_selectable(&self, now: Instant) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => self.open_until.map_or(true, |until| now >= until),
            CircuitState::HalfOpen => !self.trial_in_flight,
        }
    }

    /// Ask permission to call. May move Open to HalfOpen.
    pub(crate) fn admit(&mut self, now: Instant) -> (Admission, Option<Transition>) {
        match self.state {
            CircuitState::Closed => (Admission::Granted, None),
            CircuitState::HalfOpen if self.trial_in_flight => {
                (Admission::Denied(AdmissionDenied::TrialInFlight), None)
            }
            CircuitState::HalfOpen => {
                // A previous trial was abandoned, hand the slot to this caller
                self.trial_in_flight = true;
                (Admission::Trial, None)
            }
            CircuitState::Open => match self.open_until {
                Some(until) if now < until => {
                    let retry_in_ms = (until - now).as_millis() as u64;
                    (
                        Admission::Denied(AdmissionDenied::CircuitOpen { retry_in_ms }),
                        None,
                    )
                }
                _ => {
                    self.state = CircuitState::HalfOpen;
                    self.trial_in_flight = true;
                    (
                        Admission::Trial,
                        Some(Transition {
                            from: CircuitState::Open,
                            to: CircuitState::HalfOpen,
                            backoff: None,
                        }),
                    )
                }
            },
        }
    }

    /// Record a successful call.
    ///
    /// Only the trial drives a half-open circuit; late successes of calls
    /// admitted before the circuit opened leave the state alone.
    pub(crate) fn on_success(&mut self, trial: bool, config: &CircuitConfig) -> Option<Transition> {
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures = 0;
                self.consecutive_successes = self.consecutive_successes.saturating_add(1);
                self.push_outcome(true, config);
                None
            }
            CircuitState::HalfOpen if trial => {
                self.close();
                Some(Transition {
                    from: CircuitState::HalfOpen,
                    to: CircuitState::Closed,
                    backoff: None,
                })
            }
            CircuitState::HalfOpen | CircuitState::Open => None,
        }
    }

    /// Record a failed call. May open the circuit.
    pub(crate) fn on_failure(
        &mut self,
        trial: bool,
        now: Instant,
        config: &CircuitConfig,
    ) -> Option<Transition> {
        match self.state {
            CircuitState::Closed => {
                self.consecutive_successes = 0;
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.push_outcome(false, config);

                if self.consecutive_failures >= config.failure_threshold
                    || self.failure_rate_exceeded(config)
                {
                    Some(self.trip(now, config))
                } else {
                    None
                }
            }
            CircuitState::HalfOpen if trial => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                Some(self.trip(now, config))
            }
            CircuitState::HalfOpen | CircuitState::Open => None,
        }
    }

    /// Give back an abandoned trial slot; the circuit stays half-open.
    pub(crate) fn release_trial(&mut self) {
        self.trial_in_flight = false;
    }

    /// Backoff for the next open episode.
    pub(crate) fn next_backoff(&self, config: &CircuitConfig) -> Duration {
        backoff_for(self.open_episodes, config)
    }

    fn trip(&mut self, now: Instant, config: &CircuitConfig) -> Transition {
        let from = self.state;
        let backoff = self.next_backoff(config);

        self.state = CircuitState::Open;
        self.open_until = Some(now + backoff);
        self.open_episodes = self.open_episodes.saturating_add(1);
        self.consecutive_successes = 0;
        self.trial_in_flight = false;

        Transition {
            from,
            to: CircuitState::Open,
            backoff: Some(backoff),
        }
    }

    fn close(&mut self) {
        *self = Self::new();
    }

    fn push_outcome(&mut self, success: bool, config: &CircuitConfig) {
        self.window.push_back(success);
        while self.window.len() > config.rate_window {
            self.window.pop_front();
        }
    }

    fn failure_rate_exceeded(&self, config: &CircuitConfig) -> bool {
        if self.window.len() < config.rate_window {
            return false;
        }
        let failures = self.window.iter().filter(|ok| !**ok).count();
        failures as f64 / self.window.len() as f64 > config.failure_rate_threshold
    }
}

/// `base * 2^episodes`, capped at the configured maximum.
fn backoff_for(episodes: u32, config: &CircuitConfig) -> Duration {
    let factor = 1u32.checked_shl(episodes).unwrap_or(u32::MAX);
    config
        .base_backoff()
        .checked_mul(factor)
        .unwrap_or(Duration::MAX)
        .min(config.max_backoff())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32) -> CircuitConfig {
        CircuitConfig {
            failure_threshold: threshold,
            failure_rate_threshold: 0.5,
            rate_window: 10,
            base_backoff_ms: 1_000,
            max_backoff_ms: 8_000,
            latency_smoothing: 0.3,
        }
    }

    fn fail_n(circuit: &mut Circuit, n: u32, now: Instant, config: &CircuitConfig) {
        for _ in 0..n {
            circuit.on_failure(false, now, config);
        }
    }

    #[test]
    fn test_circuit_starts_closed() {
        let mut circuit = Circuit::new();
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert_eq!(circuit.admit(Instant::now()).0, Admission::Granted);
        assert!(circuit.open_until().is_none());
    }

    #[test]
    fn test_opens_after_consecutive_failures() {
        let cfg = config(3);
        let now = Instant::now();
        let mut circuit = Circuit::new();

        fail_n(&mut circuit, 2, now, &cfg);
        assert_eq!(circuit.state(), CircuitState::Closed);

        let transition = circuit.on_failure(false, now, &cfg).unwrap();
        assert_eq!(transition.to, CircuitState::Open);
        assert_eq!(transition.backoff, Some(Duration::from_secs(1)));
        assert_eq!(circuit.open_until(), Some(now + Duration::from_secs(1)));
        assert!(matches!(
            circuit.admit(now).0,
            Admission::Denied(AdmissionDenied::CircuitOpen { .. })
        ));
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let cfg = config(3);
        let now = Instant::now();
        let mut circuit = Circuit::new();

        fail_n(&mut circuit, 2, now, &cfg);
        circuit.on_success(false, &cfg);
        assert_eq!(circuit.consecutive_failures(), 0);
        assert_eq!(circuit.consecutive_successes(), 1);

        fail_n(&mut circuit, 2, now, &cfg);
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[test]
    fn test_opens_on_failure_rate() {
        // threshold high enough that only the rate rule can fire
        let cfg = config(100);
        let now = Instant::now();
        let mut circuit = Circuit::new();

        // F S F S ... keeps consecutive failures at 1
        for i in 0..10 {
            if i % 2 == 0 {
                circuit.on_failure(false, now, &cfg);
            } else {
                circuit.on_success(false, &cfg);
            }
        }
        // 5/10 is not above 0.5
        assert_eq!(circuit.state(), CircuitState::Closed);

        // oldest F slides out, still 5/10
        circuit.on_failure(false, now, &cfg);
        assert_eq!(circuit.state(), CircuitState::Closed);

        // oldest S slides out, 6/10
        circuit.on_failure(false, now, &cfg);
        assert_eq!(circuit.state(), CircuitState::Open);
    }

    #[test]
    fn test_rate_rule_needs_full_window() {
        let cfg = config(100);
        let now = Instant::now();
        let mut circuit = Circuit::new();

        fail_n(&mut circuit, 9, now, &cfg);
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[test]
    fn test_transitions_to_half_open_after_backoff() {
        let cfg = config(1);
        let now = Instant::now();
        let mut circuit = Circuit::new();

        circuit.on_failure(false, now, &cfg);
        assert!(!circuit.is_selectable(now + Duration::from_millis(999)));
        assert!(circuit.is_selectable(now + Duration::from_secs(1)));

        let (admission, transition) = circuit.admit(now + Duration::from_secs(1));
        assert_eq!(admission, Admission::Trial);
        assert_eq!(transition.unwrap().to, CircuitState::HalfOpen);
        assert!(circuit.trial_in_flight());
    }

    #[test]
    fn test_half_open_admits_single_trial() {
        let cfg = config(1);
        let now = Instant::now();
        let mut circuit = Circuit::new();
        circuit.on_failure(false, now, &cfg);

        let later = now + Duration::from_secs(2);
        assert_eq!(circuit.admit(later).0, Admission::Trial);
        assert_eq!(
            circuit.admit(later).0,
            Admission::Denied(AdmissionDenied::TrialInFlight)
        );
        assert!(!circuit.is_selectable(later));

        circuit.release_trial();
        assert_eq!(circuit.state(), CircuitState::HalfOpen);
        assert_eq!(circuit.admit(later).0, Admission::Trial);
    }

    #[test]
    fn test_trial_success_closes_and_resets() {
        let cfg = config(1);
        let now = Instant::now();
        let mut circuit = Circuit::new();
        circuit.on_failure(false, now, &cfg);
        circuit.admit(now + Duration::from_secs(1));

        let transition = circuit.on_success(true, &cfg).unwrap();
        assert_eq!(transition.to, CircuitState::Closed);
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert!(circuit.open_until().is_none());
        assert_eq!(circuit.consecutive_failures(), 0);
        assert_eq!(circuit.next_backoff(&cfg), Duration::from_secs(1));
    }

    #[test]
    fn test_trial_failure_doubles_backoff() {
        let cfg = config(1);
        let mut now = Instant::now();
        let mut circuit = Circuit::new();
        circuit.on_failure(false, now, &cfg);

        let mut expected = Duration::from_secs(1);
        for _ in 0..5 {
            now += expected;
            assert_eq!(circuit.admit(now).0, Admission::Trial);
            let transition = circuit.on_failure(true, now, &cfg).unwrap();
            expected = (expected * 2).min(Duration::from_secs(8));
            assert_eq!(transition.backoff, Some(expected));
            assert_eq!(circuit.open_until(), Some(now + expected));
        }
    }

    #[test]
    fn test_late_outcomes_do_not_drive_half_open() {
        let cfg = config(1);
        let now = Instant::now();
        let mut circuit = Circuit::new();
        circuit.on_failure(false, now, &cfg);
        circuit.admit(now + Duration::from_secs(1));

        // an ordinary call admitted before the circuit opened finishes late
        assert!(circuit.on_success(false, &cfg).is_none());
        assert!(circuit.on_failure(false, now, &cfg).is_none());
        assert_eq!(circuit.state(), CircuitState::HalfOpen);
        assert!(circuit.trial_in_flight());
    }

    #[test]
    fn test_failure_while_open_keeps_deadline() {
        let cfg = config(1);
        let now = Instant::now();
        let mut circuit = Circuit::new();
        circuit.on_failure(false, now, &cfg);
        let until = circuit.open_until();

        circuit.on_failure(false, now + Duration::from_millis(500), &cfg);
        assert_eq!(circuit.open_until(), until);
    }

    #[test]
    fn test_backoff_is_capped() {
        let cfg = config(1);
        assert_eq!(backoff_for(0, &cfg), Duration::from_secs(1));
        assert_eq!(backoff_for(2, &cfg), Duration::from_secs(4));
        assert_eq!(backoff_for(3, &cfg), Duration::from_secs(8));
        assert_eq!(backoff_for(40, &cfg), Duration::from_secs(8));
    }
}
