//! Error types and retry classification for the provider engine.
//!
//! This module provides:
//! - [`ProviderError`]: failures of a single provider call, always recovered by the dispatcher
//! - [`ProviderErrorKind`]: the health-tracking classification of a provider failure
//! - [`RetryClass`]: whether a failure is worth retrying on the same provider
//! - [`ConfigError`]: startup configuration failures, the only errors surfaced to callers

mod retry;

pub use retry::RetryClass;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Category;

/// Classification of a provider failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// The call exceeded the provider's deadline.
    Timeout,
    /// Non-2xx status or a payload that could not be normalized.
    Rejected,
    /// Connection-level failure.
    Unreachable,
}

/// Errors returned by a single provider call.
///
/// These never reach the caller of the engine: the dispatcher records them in
/// the health tracker and moves on to the next candidate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider did not answer before its deadline.
    #[error("Timeout: {provider} after {timeout_ms}ms")]
    Timeout {
        /// The provider that timed out
        provider: String,
        /// The deadline that was exceeded
        timeout_ms: u64,
    },

    /// The provider answered with an error status or an unusable payload.
    #[error("Rejected: {provider} - {message}")]
    Rejected {
        /// The provider that rejected the request
        provider: String,
        /// Status or decoding detail
        message: String,
    },

    /// The provider could not be reached at all.
    #[error("Unreachable: {provider} - {message}")]
    Unreachable {
        /// The unreachable provider
        provider: String,
        /// Connection error detail
        message: String,
    },
}

impl ProviderError {
    pub fn rejected(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn unreachable(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unreachable {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            Self::Timeout { .. } => ProviderErrorKind::Timeout,
            Self::Rejected { .. } => ProviderErrorKind::Rejected,
            Self::Unreachable { .. } => ProviderErrorKind::Unreachable,
        }
    }

    pub fn provider(&self) -> &str {
        match self {
            Self::Timeout { provider, .. }
            | Self::Rejected { provider, .. }
            | Self::Unreachable { provider, .. } => provider,
        }
    }

    /// Returns the retry classification for this error.
    ///
    /// ```
    /// use cryptodash_providers::errors::{ProviderError, RetryClass};
    ///
    /// let error = ProviderError::unreachable("coingecko", "connection refused");
    /// assert_eq!(error.retry_class(), RetryClass::SameProvider);
    ///
    /// let error = ProviderError::rejected("coingecko", "HTTP 403");
    /// assert_eq!(error.retry_class(), RetryClass::NextProvider);
    /// ```
    pub fn retry_class(&self) -> RetryClass {
        match self {
            // Transient - the same provider may answer a moment later
            Self::Timeout { .. } | Self::Unreachable { .. } => RetryClass::SameProvider,

            // The provider answered and said no - asking again won't help
            Self::Rejected { .. } => RetryClass::NextProvider,
        }
    }
}

/// Configuration errors, raised while building the engine at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read configuration {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The configuration document is not valid JSON for the expected shape.
    #[error("Malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// Two providers share an id.
    #[error("Duplicate provider id: {0}")]
    DuplicateProvider(String),

    /// A provider entry has an invalid field.
    #[error("Invalid provider '{provider}': {field} {reason}")]
    InvalidProvider {
        provider: String,
        field: &'static str,
        reason: String,
    },

    /// An engine tunable is out of range.
    #[error("Invalid setting {setting}: {reason}")]
    InvalidSetting {
        setting: &'static str,
        reason: String,
    },

    /// Providers exist for a category but no transport can call them.
    #[error("No transport registered for category {0}")]
    MissingTransport(Category),
}

impl ConfigError {
    pub(crate) fn invalid_provider(
        provider: &str,
        field: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidProvider {
            provider: provider.to_string(),
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_setting(setting: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidSetting {
            setting,
            reason: reason.into(),
        }
    }
}
