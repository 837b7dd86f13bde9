//! Engine data models
//!
//! - `types` - Type aliases for common identifiers (ProviderId)
//! - `category` - Provider categories and their dispatch modes
//! - `request` - Logical requests and their cache keys
//! - `payload` - Canonical, category-tagged provider payloads
//! - `response` - The aggregated response handed back to callers

mod category;
mod payload;
mod request;
mod response;
mod types;

pub use category::{Category, DispatchMode};
pub use payload::{
    MarketSnapshot, NewsArticle, NewsFeed, Payload, SentimentLabel, SentimentReading, SourceQuote,
};
pub use request::LogicalRequest;
pub use response::{AggregatedResponse, Engine};
pub use types::ProviderId;
