use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::category::Category;
use super::payload::{Payload, SentimentReading};
use super::request::LogicalRequest;
use super::types::ProviderId;
use crate::dispatcher::DispatchDiagnostics;

const LIVE_PROVIDER_PREFIX: &str = "live_provider:";
const FALLBACK_LEXICAL: &str = "fallback_lexical";
const NO_ENGINE: &str = "none";

/// Which engine produced a response.
///
/// Serialized as `live_provider:<id>`, `fallback_lexical` or `none`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Engine {
    /// A live provider answered; for merged results this is the first contributor.
    LiveProvider(ProviderId),
    /// The local lexical sentiment analyzer answered.
    FallbackLexical,
    /// Nothing could answer; the payload is `Unavailable`.
    None,
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LiveProvider(id) => write!(f, "{}{}", LIVE_PROVIDER_PREFIX, id),
            Self::FallbackLexical => f.write_str(FALLBACK_LEXICAL),
            Self::None => f.write_str(NO_ENGINE),
        }
    }
}

impl From<Engine> for String {
    fn from(engine: Engine) -> Self {
        engine.to_string()
    }
}

impl TryFrom<String> for Engine {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            FALLBACK_LEXICAL => Ok(Self::FallbackLexical),
            NO_ENGINE => Ok(Self::None),
            other => other
                .strip_prefix(LIVE_PROVIDER_PREFIX)
                .filter(|id| !id.is_empty())
                .map(|id| Self::LiveProvider(ProviderId::from(id)))
                .ok_or_else(|| format!("unknown engine '{}'", other)),
        }
    }
}

/// Final answer for one logical request.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedResponse {
    pub request_key: String,
    pub category: Category,
    pub payload: Payload,
    /// Providers whose answers contributed, in candidate order
    pub provider_ids: Vec<ProviderId>,
    pub engine: Engine,
    /// Only set for sentiment answers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub served_from_cache: bool,
    pub generated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "DispatchDiagnostics::is_empty")]
    pub diagnostics: DispatchDiagnostics,
}

impl AggregatedResponse {
    /// Response answered by one or more live providers.
    pub fn live(
        request: &LogicalRequest,
        payload: Payload,
        provider_ids: Vec<ProviderId>,
        diagnostics: DispatchDiagnostics,
    ) -> Self {
        let engine = provider_ids
            .first()
            .cloned()
            .map(Engine::LiveProvider)
            .unwrap_or(Engine::None);
        Self::build(request, payload, provider_ids, engine, diagnostics)
    }

    /// Response computed locally by the lexical analyzer.
    pub fn fallback(
        request: &LogicalRequest,
        reading: SentimentReading,
        diagnostics: DispatchDiagnostics,
    ) -> Self {
        Self::build(
            request,
            Payload::Sentiment(reading),
            Vec::new(),
            Engine::FallbackLexical,
            diagnostics,
        )
    }

    /// Structured "no data" response.
    pub fn unavailable(
        request: &LogicalRequest,
        reason: impl Into<String>,
        diagnostics: DispatchDiagnostics,
    ) -> Self {
        Self::build(
            request,
            Payload::unavailable(reason),
            Vec::new(),
            Engine::None,
            diagnostics,
        )
    }

    fn build(
        request: &LogicalRequest,
        payload: Payload,
        provider_ids: Vec<ProviderId>,
        engine: Engine,
        diagnostics: DispatchDiagnostics,
    ) -> Self {
        let confidence = match &payload {
            Payload::Sentiment(reading) => Some(reading.confidence),
            _ => None,
        };

        Self {
            request_key: request.cache_key().to_string(),
            category: request.category(),
            payload,
            provider_ids,
            engine,
            confidence,
            served_from_cache: false,
            generated_at: Utc::now(),
            diagnostics,
        }
    }

    pub fn is_available(&self) -> bool {
        !self.payload.is_unavailable()
    }

    /// Copy of this response marked as served from cache.
    pub fn as_cached(&self) -> Self {
        Self {
            served_from_cache: true,
            ..self.clone()
        }
    }
}
