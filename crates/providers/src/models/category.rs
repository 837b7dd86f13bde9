use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of information a provider serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Prices, volumes and 24h changes.
    Market,
    /// Headlines and articles.
    News,
    /// Bullish / bearish classification of text.
    Sentiment,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Market, Category::News, Category::Sentiment];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::News => "news",
            Self::Sentiment => "sentiment",
        }
    }

    /// Whether a total outage can be answered by the local lexical analyzer.
    pub fn has_local_fallback(&self) -> bool {
        matches!(self, Self::Sentiment)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "market" => Ok(Self::Market),
            "news" => Ok(Self::News),
            "sentiment" => Ok(Self::Sentiment),
            other => Err(format!("unknown category '{}'", other)),
        }
    }
}

/// How the dispatcher spends candidates for one logical request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// One provider at a time, stop at the first answer.
    Sequential,
    /// Bounded-parallel calls whose answers are merged.
    Aggregate,
}

impl Category {
    /// Default dispatch mode for the category.
    pub fn default_mode(&self) -> DispatchMode {
        match self {
            Self::Market => DispatchMode::Aggregate,
            Self::News | Self::Sentiment => DispatchMode::Sequential,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_category() {
        assert_eq!("Market".parse::<Category>().unwrap(), Category::Market);
        assert_eq!(" sentiment ".parse::<Category>().unwrap(), Category::Sentiment);
        assert!("weather".parse::<Category>().is_err());
    }

    #[test]
    fn test_only_sentiment_has_fallback() {
        assert!(Category::Sentiment.has_local_fallback());
        assert!(!Category::Market.has_local_fallback());
        assert!(!Category::News.has_local_fallback());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&Category::News).unwrap();
        assert_eq!(json, "\"news\"");
        let mode: DispatchMode = serde_json::from_str("\"aggregate\"").unwrap();
        assert_eq!(mode, DispatchMode::Aggregate);
    }
}
