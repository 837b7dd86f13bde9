use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::category::Category;
use super::types::ProviderId;

/// Canonical provider payload, tagged by category.
///
/// Transports normalize each third-party response into one of these shapes
/// before it reaches the dispatcher.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Market(MarketSnapshot),
    News(NewsFeed),
    Sentiment(SentimentReading),
    /// No provider and no fallback could answer.
    Unavailable { reason: String },
}

impl Payload {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// Category this payload answers, `None` for `Unavailable`.
    pub fn category(&self) -> Option<Category> {
        match self {
            Self::Market(_) => Some(Category::Market),
            Self::News(_) => Some(Category::News),
            Self::Sentiment(_) => Some(Category::Sentiment),
            Self::Unavailable { .. } => None,
        }
    }
}

/// Price snapshot for one symbol, possibly merged from several sources.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,

    /// Price in USD (median across sources once merged)
    pub price: Decimal,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_24h_pct: Option<Decimal>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_24h: Option<Decimal>,

    /// Max minus min price across sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_spread: Option<Decimal>,

    /// Per-source prices, filled in by aggregation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quotes: Vec<SourceQuote>,
}

impl MarketSnapshot {
    pub fn new(symbol: impl Into<String>, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            change_24h_pct: None,
            volume_24h: None,
            price_spread: None,
            quotes: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceQuote {
    pub provider_id: ProviderId,
    pub price: Decimal,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NewsFeed {
    #[serde(default)]
    pub articles: Vec<NewsArticle>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewsArticle {
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLabel {
    Bullish,
    Bearish,
    Neutral,
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bullish => f.write_str("bullish"),
            Self::Bearish => f.write_str("bearish"),
            Self::Neutral => f.write_str("neutral"),
        }
    }
}

/// Sentiment classification of a piece of text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SentimentReading {
    pub label: SentimentLabel,
    /// Signed score in [-1, 1]
    pub score: f64,
    /// Confidence in [0, 1]
    pub confidence: f64,
    #[serde(default)]
    pub matched_terms: Vec<String>,
}
