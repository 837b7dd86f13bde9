//! Lexical sentiment classifier.
//!
//! Text is lowercased and split on anything that is not a letter or digit.
//! Multi-word terms are matched first against consecutive tokens, then every
//! remaining token is matched against the single-word terms. A token counts
//! toward at most one term.
//!
//! Single-word terms of four or more characters are stems: they match a token
//! made of the stem plus one of a few inflection endings (`pump` matches
//! `pumping`, but `fear` does not match `fearless`). Shorter terms (`ath`,
//! `fud`) must equal the token.

use std::collections::HashSet;

use super::lexicon::{BEARISH_TERMS, BULLISH_TERMS};
use crate::config::SentimentConfig;
use crate::errors::ConfigError;
use crate::models::{SentimentLabel, SentimentReading};

const MIN_STEM_LEN: usize = 4;

/// Endings a stem may carry and still count as the same term.
const INFLECTIONS: &[&str] = &[
    "", "s", "es", "e", "d", "ed", "en", "ing", "ion", "ions", "m", "tic", "ped", "ping", "ness",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Polarity {
    Bullish,
    Bearish,
}

#[derive(Clone, Debug)]
struct Term {
    text: String,
    words: Vec<String>,
    polarity: Polarity,
}

impl Term {
    fn new(text: String, polarity: Polarity) -> Self {
        let words = text.split(' ').map(str::to_string).collect();
        Self {
            text,
            words,
            polarity,
        }
    }

    /// Whether the term matches the tokens starting at `start`.
    fn matches_at(&self, tokens: &[String], start: usize) -> bool {
        let Some(window) = tokens.get(start..start + self.words.len()) else {
            return false;
        };
        let last = self.words.len() - 1;
        self.words
            .iter()
            .zip(window)
            .enumerate()
            .all(|(i, (word, token))| {
                if i == last {
                    word_matches(word, token)
                } else {
                    word == token
                }
            })
    }
}

fn word_matches(word: &str, token: &str) -> bool {
    if word.len() < MIN_STEM_LEN {
        word == token
    } else {
        token
            .strip_prefix(word)
            .is_some_and(|ending| INFLECTIONS.contains(&ending))
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Lowercase and collapse a configured term into space-separated words.
fn normalize_term(term: &str) -> Option<String> {
    let normalized = tokenize(term).join(" ");
    (!normalized.is_empty()).then_some(normalized)
}

fn merge_extras(
    extras: &[String],
    own: &mut Vec<String>,
    opposite: &[String],
    setting: &'static str,
) -> Result<(), ConfigError> {
    for extra in extras {
        let term = normalize_term(extra)
            .ok_or_else(|| ConfigError::invalid_setting(setting, "terms must contain a word"))?;
        if opposite.contains(&term) {
            return Err(ConfigError::invalid_setting(
                setting,
                format!("'{}' already has the opposite polarity", term),
            ));
        }
        if !own.contains(&term) {
            own.push(term);
        }
    }
    Ok(())
}

/// Deterministic keyword classifier used when no sentiment provider answers.
///
/// Holds no mutable state; [`classify`](Self::classify) is a pure function of
/// its input.
#[derive(Clone, Debug)]
pub struct LexicalSentimentAnalyzer {
    /// Multi-word terms, most words first.
    phrases: Vec<Term>,
    /// Single-word terms, longest first so the most specific stem wins.
    words: Vec<Term>,
    bullish_threshold: f64,
    bearish_threshold: f64,
    min_confidence: f64,
    max_confidence: f64,
    no_match_confidence: f64,
}

impl LexicalSentimentAnalyzer {
    /// Build the analyzer from the built-in vocabulary plus configured extras.
    ///
    /// Fails when an extra term is empty or already belongs to the opposite list.
    pub fn new(config: &SentimentConfig) -> Result<Self, ConfigError> {
        let mut bullish: Vec<String> = BULLISH_TERMS.iter().map(|t| t.to_string()).collect();
        let mut bearish: Vec<String> = BEARISH_TERMS.iter().map(|t| t.to_string()).collect();

        merge_extras(
            &config.extra_bullish_terms,
            &mut bullish,
            &bearish,
            "sentiment.extra_bullish_terms",
        )?;
        merge_extras(
            &config.extra_bearish_terms,
            &mut bearish,
            &bullish,
            "sentiment.extra_bearish_terms",
        )?;

        Ok(Self::build(config, bullish, bearish))
    }

    fn build(config: &SentimentConfig, bullish: Vec<String>, bearish: Vec<String>) -> Self {
        let terms = bullish
            .into_iter()
            .map(|t| Term::new(t, Polarity::Bullish))
            .chain(bearish.into_iter().map(|t| Term::new(t, Polarity::Bearish)));

        let (mut phrases, mut words): (Vec<Term>, Vec<Term>) =
            terms.partition(|term| term.words.len() > 1);

        phrases.sort_by(|a, b| {
            b.words
                .len()
                .cmp(&a.words.len())
                .then_with(|| b.text.len().cmp(&a.text.len()))
                .then_with(|| a.text.cmp(&b.text))
        });
        words.sort_by(|a, b| b.text.len().cmp(&a.text.len()).then_with(|| a.text.cmp(&b.text)));

        Self {
            phrases,
            words,
            bullish_threshold: config.bullish_threshold,
            bearish_threshold: config.bearish_threshold,
            min_confidence: config.min_confidence,
            max_confidence: config.max_confidence,
            no_match_confidence: config.no_match_confidence,
        }
    }

    /// Classify a piece of text.
    pub fn classify(&self, text: &str) -> SentimentReading {
        let tokens = tokenize(text);
        let mut consumed = vec![false; tokens.len()];
        // (token position, term) for every match
        let mut hits: Vec<(usize, &Term)> = Vec::new();

        for phrase in &self.phrases {
            let span = phrase.words.len();
            let mut start = 0;
            while start + span <= tokens.len() {
                if !consumed[start..start + span].iter().any(|c| *c)
                    && phrase.matches_at(&tokens, start)
                {
                    consumed[start..start + span].fill(true);
                    hits.push((start, phrase));
                    start += span;
                } else {
                    start += 1;
                }
            }
        }

        for (position, token) in tokens.iter().enumerate() {
            if consumed[position] {
                continue;
            }
            if let Some(term) = self.words.iter().find(|t| word_matches(&t.text, token)) {
                consumed[position] = true;
                hits.push((position, term));
            }
        }

        hits.sort_by_key(|(position, _)| *position);

        let bullish = hits
            .iter()
            .filter(|(_, t)| t.polarity == Polarity::Bullish)
            .count();
        let bearish = hits.len() - bullish;

        let mut seen = HashSet::new();
        let matched_terms = hits
            .iter()
            .filter(|(_, t)| seen.insert(t.text.as_str()))
            .map(|(_, t)| t.text.clone())
            .collect();

        self.reading(bullish, bearish, matched_terms)
    }

    fn reading(&self, bullish: usize, bearish: usize, matched_terms: Vec<String>) -> SentimentReading {
        let total = bullish + bearish;
        let score = ((bullish as f64 - bearish as f64) / total.max(1) as f64).clamp(-1.0, 1.0);

        let label = if score > self.bullish_threshold {
            SentimentLabel::Bullish
        } else if score < self.bearish_threshold {
            SentimentLabel::Bearish
        } else {
            SentimentLabel::Neutral
        };

        let confidence = if total == 0 {
            self.no_match_confidence
        } else {
            self.min_confidence + (self.max_confidence - self.min_confidence) * score.abs()
        };

        SentimentReading {
            label,
            score,
            confidence,
            matched_terms,
        }
    }
}

impl Default for LexicalSentimentAnalyzer {
    fn default() -> Self {
        Self::build(
            &SentimentConfig::default(),
            BULLISH_TERMS.iter().map(|t| t.to_string()).collect(),
            BEARISH_TERMS.iter().map(|t| t.to_string()).collect(),
        )
    }
}
