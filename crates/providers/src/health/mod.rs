//! Provider health tracking.
//!
//! - `circuit_breaker` - the per-provider CLOSED / OPEN / HALF_OPEN state machine
//! - `tracker` - shared health state, call permits and health snapshots

mod circuit_breaker;
mod tracker;

pub use circuit_breaker::{AdmissionDenied, CircuitState};
pub use tracker::{
    CallOutcome, CallPermit, HealthTracker, ProviderHealthSnapshot, ProviderHealthState,
    SelectionView,
};
