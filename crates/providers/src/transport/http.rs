//! HTTP transport backed by `reqwest`.
//!
//! Every call is a GET to the descriptor endpoint with the request parameters
//! as the query string. When the descriptor names an `api_key_env`, the key is
//! read from that variable at call time and sent as `X-Api-Key`.
//!
//! Error mapping:
//! - request timed out -> `Timeout`
//! - connection failed -> `Unreachable`
//! - non-2xx status or a body the normalizer rejects -> `Rejected`

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, warn};

use super::ProviderTransport;
use crate::errors::ProviderError;
use crate::models::{
    Category, LogicalRequest, MarketSnapshot, NewsFeed, Payload, SentimentReading,
};
use crate::registry::ProviderDescriptor;

const API_KEY_HEADER: &str = "X-Api-Key";

/// Turns a decoded provider body into a canonical payload.
///
/// Return `Err` with a short reason when the body is unusable; the transport
/// reports it as a rejection.
pub trait ResponseNormalizer: Send + Sync {
    fn normalize(
        &self,
        provider: &ProviderDescriptor,
        request: &LogicalRequest,
        body: Value,
    ) -> Result<Payload, String>;
}

/// Accepts bodies that are already in canonical shape.
///
/// Either a tagged payload (`{"kind": "market", ...}`) or the bare object for
/// the request category (`{"symbol": "BTC", "price": "64000.5"}` for market).
#[derive(Clone, Copy, Debug, Default)]
pub struct CanonicalJsonNormalizer;

impl ResponseNormalizer for CanonicalJsonNormalizer {
    fn normalize(
        &self,
        _provider: &ProviderDescriptor,
        request: &LogicalRequest,
        body: Value,
    ) -> Result<Payload, String> {
        let payload = if body.get("kind").is_some() {
            serde_json::from_value::<Payload>(body).map_err(|e| e.to_string())?
        } else {
            match request.category() {
                Category::Market => serde_json::from_value::<MarketSnapshot>(body)
                    .map(Payload::Market)
                    .map_err(|e| e.to_string())?,
                Category::News => serde_json::from_value::<NewsFeed>(body)
                    .map(Payload::News)
                    .map_err(|e| e.to_string())?,
                Category::Sentiment => serde_json::from_value::<SentimentReading>(body)
                    .map(Payload::Sentiment)
                    .map_err(|e| e.to_string())?,
            }
        };

        validate(request, payload)
    }
}

fn validate(request: &LogicalRequest, payload: Payload) -> Result<Payload, String> {
    match &payload {
        Payload::Unavailable { reason } => {
            return Err(format!("provider reported no data: {}", reason));
        }
        Payload::Market(snapshot) if snapshot.price <= Decimal::ZERO => {
            return Err(format!("non-positive price {}", snapshot.price));
        }
        Payload::Sentiment(reading)
            if !(-1.0..=1.0).contains(&reading.score)
                || !(0.0..=1.0).contains(&reading.confidence) =>
        {
            return Err("sentiment score or confidence out of range".to_string());
        }
        _ => {}
    }

    match payload.category() {
        Some(category) if category == request.category() => Ok(payload),
        Some(category) => Err(format!(
            "expected {} payload, got {}",
            request.category(),
            category
        )),
        None => Err("payload has no category".to_string()),
    }
}

/// Generic HTTP transport.
pub struct HttpTransport {
    client: Client,
    normalizer: Arc<dyn ResponseNormalizer>,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::with_normalizer(Arc::new(CanonicalJsonNormalizer))
    }

    pub fn with_normalizer(normalizer: Arc<dyn ResponseNormalizer>) -> Self {
        let client = Client::builder()
            .user_agent(concat!("cryptodash/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client, normalizer }
    }

    fn api_key(provider: &ProviderDescriptor) -> Option<String> {
        let var = provider.api_key_env.as_deref()?;
        match std::env::var(var) {
            Ok(key) if !key.is_empty() => Some(key),
            _ => {
                warn!(
                    "Provider '{}' expects an API key in {} but it is not set",
                    provider.id, var
                );
                None
            }
        }
    }

    fn map_send_error(provider: &ProviderDescriptor, error: reqwest::Error) -> ProviderError {
        if error.is_timeout() {
            ProviderError::Timeout {
                provider: provider.id.to_string(),
                timeout_ms: provider.timeout.as_millis() as u64,
            }
        } else if error.is_connect() {
            ProviderError::unreachable(&*provider.id, format!("Connection failed: {}", error))
        } else {
            ProviderError::unreachable(&*provider.id, format!("Request failed: {}", error))
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderTransport for HttpTransport {
    async fn call(
        &self,
        provider: &ProviderDescriptor,
        request: &LogicalRequest,
    ) -> Result<Payload, ProviderError> {
        let mut builder = self
            .client
            .get(provider.endpoint.clone())
            .query(request.params())
            .timeout(provider.timeout);

        if let Some(key) = Self::api_key(provider) {
            builder = builder.header(API_KEY_HEADER, key);
        }

        debug!(
            "HTTP request to '{}': {} with {} params",
            provider.id,
            provider.endpoint,
            request.params().len()
        );

        let response = builder
            .send()
            .await
            .map_err(|e| Self::map_send_error(provider, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::rejected(
                &*provider.id,
                format!("HTTP {}", status),
            ));
        }

        let body: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                Self::map_send_error(provider, e)
            } else {
                ProviderError::rejected(&*provider.id, format!("Invalid JSON body: {}", e))
            }
        })?;

        self.normalizer
            .normalize(provider, request, body)
            .map_err(|reason| ProviderError::rejected(&*provider.id, reason))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rust_decimal_macros::dec;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::config::ProviderConfig;
    use crate::errors::ProviderErrorKind;
    use crate::models::SentimentLabel;

    fn descriptor(endpoint: &str, timeout_ms: u64) -> ProviderDescriptor {
        let mut config = ProviderConfig::new("test_provider", Category::Market, endpoint);
        config.timeout_ms = timeout_ms;
        ProviderDescriptor::try_from(&config).unwrap()
    }

    /// Serve a single canned HTTP response on a random local port.
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
        });

        format!("http://{}/quote", addr)
    }

    #[test]
    fn test_normalizes_bare_market_body() {
        let provider = descriptor("https://example.com", 1000);
        let request = LogicalRequest::market_snapshot("btc");
        let payload = CanonicalJsonNormalizer
            .normalize(
                &provider,
                &request,
                json!({"symbol": "BTC", "price": "64000.5", "volume_24h": "1200"}),
            )
            .unwrap();

        let Payload::Market(snapshot) = payload else {
            panic!("expected market payload");
        };
        assert_eq!(snapshot.price, dec!(64000.5));
        assert_eq!(snapshot.volume_24h, Some(dec!(1200)));
    }

    #[test]
    fn test_normalizes_tagged_body() {
        let provider = descriptor("https://example.com", 1000);
        let request = LogicalRequest::sentiment("moon");
        let payload = CanonicalJsonNormalizer
            .normalize(
                &provider,
                &request,
                json!({"kind": "sentiment", "label": "bullish", "score": 0.8, "confidence": 0.9}),
            )
            .unwrap();

        assert!(matches!(
            payload,
            Payload::Sentiment(SentimentReading { label: SentimentLabel::Bullish, .. })
        ));
    }

    #[test]
    fn test_rejects_category_mismatch() {
        let provider = descriptor("https://example.com", 1000);
        let request = LogicalRequest::market_snapshot("BTC");
        let err = CanonicalJsonNormalizer
            .normalize(&provider, &request, json!({"kind": "news", "articles": []}))
            .unwrap_err();
        assert!(err.contains("expected market"));
    }

    #[test]
    fn test_rejects_malformed_bodies() {
        let provider = descriptor("https://example.com", 1000);
        let request = LogicalRequest::market_snapshot("BTC");

        for body in [
            json!({"symbol": "BTC"}),
            json!({"symbol": "BTC", "price": "-1"}),
            json!({"kind": "unavailable", "reason": "maintenance"}),
            json!("not an object"),
        ] {
            assert!(CanonicalJsonNormalizer
                .normalize(&provider, &request, body)
                .is_err());
        }

        let request = LogicalRequest::sentiment("text");
        let body = json!({"label": "bullish", "score": 3.0, "confidence": 0.9});
        assert!(CanonicalJsonNormalizer
            .normalize(&provider, &request, body)
            .is_err());
    }

    #[tokio::test]
    async fn test_successful_call() {
        let endpoint = serve_once("200 OK", r#"{"symbol":"ETH","price":"3100.25"}"#).await;
        let transport = HttpTransport::new();

        let payload = transport
            .call(&descriptor(&endpoint, 2000), &LogicalRequest::market_snapshot("eth"))
            .await
            .unwrap();
        assert_eq!(payload.category(), Some(Category::Market));
    }

    #[tokio::test]
    async fn test_error_status_is_rejected() {
        let endpoint = serve_once("503 Service Unavailable", r#"{"error":"down"}"#).await;
        let transport = HttpTransport::new();

        let err = transport
            .call(&descriptor(&endpoint, 2000), &LogicalRequest::market_snapshot("BTC"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ProviderErrorKind::Rejected);
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_invalid_json_is_rejected() {
        let endpoint = serve_once("200 OK", "<html>").await;
        let transport = HttpTransport::new();

        let err = transport
            .call(&descriptor(&endpoint, 2000), &LogicalRequest::market_snapshot("BTC"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ProviderErrorKind::Rejected);
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}/", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let err = HttpTransport::new()
            .call(&descriptor(&endpoint, 100), &LogicalRequest::market_snapshot("BTC"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ProviderErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_refused_connection_is_unreachable() {
        // bind then drop to get a port nothing listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}/", listener.local_addr().unwrap());
        drop(listener);

        let err = HttpTransport::new()
            .call(&descriptor(&endpoint, 2000), &LogicalRequest::market_snapshot("BTC"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ProviderErrorKind::Unreachable);
    }
}
