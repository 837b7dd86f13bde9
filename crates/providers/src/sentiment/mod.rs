//! Local sentiment fallback.
//!
//! Used only for sentiment requests when no live provider could answer. It
//! never performs I/O and never fails.

mod analyzer;
mod lexicon;

pub use analyzer::LexicalSentimentAnalyzer;
