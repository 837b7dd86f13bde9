use std::collections::BTreeMap;

use serde::Serialize;

use super::category::Category;

/// Parameter keys with a dedicated normalization rule.
const SYMBOL_PARAM: &str = "symbol";
const TEXT_PARAM: &str = "text";
const QUERY_PARAM: &str = "query";

/// A category plus normalized parameters, independent of which provider answers it.
///
/// Parameters are normalized on construction so that equivalent requests share
/// one cache key:
/// - keys are trimmed and lowercased, empty keys are dropped
/// - values are trimmed
/// - `symbol` is uppercased
/// - `text` has runs of whitespace collapsed to a single space
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LogicalRequest {
    category: Category,
    params: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    capability: Option<String>,
    #[serde(skip)]
    cache_key: String,
}

impl LogicalRequest {
    pub fn new<K, V, I>(category: Category, params: I) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
        I: IntoIterator<Item = (K, V)>,
    {
        let params = params
            .into_iter()
            .filter_map(|(k, v)| normalize_param(k.as_ref(), v.as_ref()))
            .collect();

        let mut request = Self {
            category,
            params,
            capability: None,
            cache_key: String::new(),
        };
        request.cache_key = request.derive_cache_key();
        request
    }

    /// Market snapshot for one symbol (e.g. "BTC").
    pub fn market_snapshot(symbol: &str) -> Self {
        Self::new(Category::Market, [(SYMBOL_PARAM, symbol)])
    }

    /// Latest news matching a query.
    pub fn news(query: &str) -> Self {
        Self::new(Category::News, [(QUERY_PARAM, query)])
    }

    /// Sentiment of a piece of text.
    pub fn sentiment(text: &str) -> Self {
        Self::new(Category::Sentiment, [(TEXT_PARAM, text)])
    }

    /// Restrict candidates to providers tagged with `capability`.
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        let capability = capability.into().trim().to_ascii_lowercase();
        self.capability = if capability.is_empty() {
            None
        } else {
            Some(capability)
        };
        self.cache_key = self.derive_cache_key();
        self
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn capability(&self) -> Option<&str> {
        self.capability.as_deref()
    }

    /// Text to classify, empty when absent.
    pub fn text(&self) -> &str {
        self.param(TEXT_PARAM).unwrap_or_default()
    }

    pub fn symbol(&self) -> Option<&str> {
        self.param(SYMBOL_PARAM)
    }

    /// Deterministic key derived from category, capability and parameters.
    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    fn derive_cache_key(&self) -> String {
        let mut canonical = String::new();
        match &self.capability {
            Some(capability) => {
                canonical.push('c');
                push_field(&mut canonical, capability);
            }
            None => canonical.push('-'),
        }
        // BTreeMap iteration is sorted, so insertion order never leaks into the key
        for (key, value) in &self.params {
            push_field(&mut canonical, key);
            push_field(&mut canonical, value);
        }
        format!("{}:{:x}", self.category, md5::compute(canonical.as_bytes()))
    }
}

/// Length-prefixed so that no key or value can imitate a field boundary.
fn push_field(canonical: &mut String, field: &str) {
    canonical.push_str(&field.len().to_string());
    canonical.push(':');
    canonical.push_str(field);
}

fn normalize_param(key: &str, value: &str) -> Option<(String, String)> {
    let key = key.trim().to_ascii_lowercase();
    if key.is_empty() {
        return None;
    }

    let value = match key.as_str() {
        SYMBOL_PARAM => value.trim().to_ascii_uppercase(),
        TEXT_PARAM => value.split_whitespace().collect::<Vec<_>>().join(" "),
        _ => value.trim().to_string(),
    };

    Some((key, value))
}
