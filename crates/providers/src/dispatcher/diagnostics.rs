//! Per-request record of what happened to each candidate provider.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{ProviderError, ProviderErrorKind};
use crate::health::AdmissionDenied;
use crate::models::ProviderId;

/// Why a candidate was not called.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum SkipReason {
    /// Circuit breaker is open for this provider.
    CircuitOpen { retry_in_ms: u64 },

    /// A half-open trial is already probing this provider.
    TrialInFlight,

    /// The health tracker does not know the provider.
    UnknownProvider,

    /// The aggregation deadline passed before the call finished.
    DeadlineExceeded,
}

impl From<AdmissionDenied> for SkipReason {
    fn from(denied: AdmissionDenied) -> Self {
        match denied {
            AdmissionDenied::CircuitOpen { retry_in_ms } => Self::CircuitOpen { retry_in_ms },
            AdmissionDenied::TrialInFlight => Self::TrialInFlight,
            AdmissionDenied::UnknownProvider => Self::UnknownProvider,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

/// Record of a single provider attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderAttempt {
    pub provider_id: ProviderId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AttemptError>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

/// Attempts made while dispatching one logical request, in order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchDiagnostics {
    pub attempts: Vec<ProviderAttempt>,
}

impl DispatchDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_skip(&mut self, provider_id: ProviderId, reason: SkipReason) {
        self.attempts.push(ProviderAttempt {
            provider_id,
            skipped: Some(reason),
            error: None,
            success: false,
            latency_ms: None,
        });
    }

    pub fn record_error(&mut self, provider_id: ProviderId, error: &ProviderError) {
        self.attempts.push(ProviderAttempt {
            provider_id,
            skipped: None,
            error: Some(AttemptError {
                kind: error.kind(),
                message: error.to_string(),
            }),
            success: false,
            latency_ms: None,
        });
    }

    pub fn record_success(&mut self, provider_id: ProviderId, latency: Duration) {
        self.attempts.push(ProviderAttempt {
            provider_id,
            skipped: None,
            error: None,
            success: true,
            latency_ms: Some(latency.as_millis() as u64),
        });
    }

    pub fn extend(&mut self, other: DispatchDiagnostics) {
        self.attempts.extend(other.attempts);
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    /// Summary for logging/debugging.
    pub fn summary(&self) -> String {
        self.attempts
            .iter()
            .map(|a| {
                if a.success {
                    format!("{}: SUCCESS", a.provider_id)
                } else if let Some(skip) = &a.skipped {
                    format!("{}: SKIPPED ({:?})", a.provider_id, skip)
                } else if let Some(err) = &a.error {
                    format!("{}: ERROR ({})", a.provider_id, err.message)
                } else {
                    format!("{}: UNKNOWN", a.provider_id)
                }
            })
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    pub fn has_success(&self) -> bool {
        self.attempts.iter().any(|a| a.success)
    }

    pub fn skip_reasons(&self) -> Vec<(&ProviderId, &SkipReason)> {
        self.attempts
            .iter()
            .filter_map(|a| a.skipped.as_ref().map(|s| (&a.provider_id, s)))
            .collect()
    }

    pub fn errors(&self) -> Vec<(&ProviderId, ProviderErrorKind)> {
        self.attempts
            .iter()
            .filter_map(|a| a.error.as_ref().map(|e| (&a.provider_id, e.kind)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ProviderId {
        ProviderId::from(s)
    }

    #[test]
    fn test_diagnostics_summary() {
        let mut diag = DispatchDiagnostics::new();
        diag.record_skip(id("binance"), SkipReason::CircuitOpen { retry_in_ms: 1000 });
        diag.record_error(id("kraken"), &ProviderError::unreachable("kraken", "refused"));
        diag.record_success(id("coingecko"), Duration::from_millis(42));

        let summary = diag.summary();
        assert!(summary.contains("binance: SKIPPED"));
        assert!(summary.contains("kraken: ERROR"));
        assert!(summary.contains("coingecko: SUCCESS"));
        assert!(diag.has_success());
    }

    #[test]
    fn test_skip_reasons_and_errors() {
        let mut diag = DispatchDiagnostics::new();
        assert!(diag.is_empty());
        diag.record_skip(id("binance"), AdmissionDenied::TrialInFlight.into());
        diag.record_error(
            id("kraken"),
            &ProviderError::Timeout {
                provider: "kraken".to_string(),
                timeout_ms: 500,
            },
        );

        assert!(!diag.has_success());
        assert_eq!(diag.skip_reasons(), [(&id("binance"), &SkipReason::TrialInFlight)]);
        assert_eq!(diag.errors(), [(&id("kraken"), ProviderErrorKind::Timeout)]);
    }

    #[test]
    fn test_serialized_shape() {
        let mut diag = DispatchDiagnostics::new();
        diag.record_skip(id("binance"), SkipReason::CircuitOpen { retry_in_ms: 250 });
        diag.record_success(id("coingecko"), Duration::from_millis(42));

        let json = serde_json::to_value(&diag).unwrap();
        assert_eq!(json["attempts"][0]["providerId"], "binance");
        assert_eq!(json["attempts"][0]["skipped"]["reason"], "circuit_open");
        assert_eq!(json["attempts"][0]["skipped"]["retry_in_ms"], 250);
        assert_eq!(json["attempts"][1]["latencyMs"], 42);
        assert!(json["attempts"][1].get("error").is_none());

        let back: DispatchDiagnostics = serde_json::from_value(json).unwrap();
        assert_eq!(back, diag);
    }
}
