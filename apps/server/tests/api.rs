use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request},
    Router,
};
use cryptodash_providers::{
    Category, EngineConfig, LogicalRequest, NewsArticle, NewsFeed, Payload, ProviderConfig,
    ProviderDescriptor, ProviderEngine, ProviderError, ProviderTransport, TransportSet,
};
use cryptodash_server::{api::app_router, build_state, config::Config, AppState};
use tempfile::tempdir;
use tower::ServiceExt;

struct HeadlineTransport;

#[async_trait]
impl ProviderTransport for HeadlineTransport {
    async fn call(
        &self,
        provider: &ProviderDescriptor,
        request: &LogicalRequest,
    ) -> Result<Payload, ProviderError> {
        if &*provider.id == "down" {
            return Err(ProviderError::unreachable(&*provider.id, "connection refused"));
        }
        Ok(Payload::News(NewsFeed {
            articles: vec![NewsArticle {
                title: format!("{} rallies", request.param("query").unwrap_or_default()),
                url: "https://news.example.com/1".to_string(),
                source: Some(provider.id.to_string()),
                published_at: None,
            }],
        }))
    }
}

fn test_config() -> Config {
    Config {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        engine_config_path: "unused.json".into(),
        cors_allow: vec!["*".to_string()],
        request_timeout: Duration::from_secs(5),
    }
}

fn router_with_mock() -> Router {
    let mut down = ProviderConfig::new("down", Category::News, "https://down.example.com/news");
    down.priority = 1;
    let mut up = ProviderConfig::new("up", Category::News, "https://up.example.com/news");
    up.priority = 2;

    let mut engine_config = EngineConfig {
        providers: vec![down, up],
        ..EngineConfig::default()
    };
    engine_config.cache.sweep_interval_ms = 0;

    let engine = ProviderEngine::builder(engine_config)
        .transports(TransportSet::uniform(Arc::new(HeadlineTransport)))
        .build()
        .unwrap();
    app_router(AppState::new(engine), &test_config())
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn healthz_works() {
    let tmp = tempdir().unwrap();
    let config_path = tmp.path().join("engine.json");
    std::fs::write(&config_path, r#"{"providers": []}"#).unwrap();
    std::env::set_var("CRYPTODASH_CONFIG", &config_path);

    let config = Config::from_env().unwrap();
    let state = build_state(&config).await.unwrap();
    let app = app_router(state, &config);

    let response = app
        .oneshot(Request::builder().uri("/api/v1/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    std::env::remove_var("CRYPTODASH_CONFIG");
}

#[tokio::test]
async fn request_fails_over_and_reports_health() {
    let app = router_with_mock();

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/v1/requests",
            serde_json::json!({ "category": "news", "params": { "query": "BTC" } }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let json = json_body(response).await;
    assert_eq!(json["engine"], "live_provider:up");
    assert_eq!(json["providerIds"], serde_json::json!(["up"]));
    assert_eq!(json["servedFromCache"], false);
    assert_eq!(json["payload"]["kind"], "news");
    assert_eq!(json["payload"]["articles"][0]["title"], "BTC rallies");
    assert_eq!(json["diagnostics"]["attempts"][0]["providerId"], "down");

    let health = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/providers/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(health.status(), 200);
    let json = json_body(health).await;
    assert_eq!(json[0]["providerId"], "down");
    assert_eq!(json[0]["totalFailures"], 1);
    assert_eq!(json[0]["circuitState"], "CLOSED");
    assert_eq!(json[1]["providerId"], "up");
    assert_eq!(json[1]["successRate"], 1.0);
}

#[tokio::test]
async fn sentiment_without_providers_uses_fallback() {
    let app = router_with_mock();

    let response = app
        .oneshot(post_json(
            "/api/v1/requests",
            serde_json::json!({ "category": "sentiment", "params": { "text": "ETH crash incoming" } }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let json = json_body(response).await;
    assert_eq!(json["engine"], "fallback_lexical");
    assert_eq!(json["payload"]["label"], "bearish");
}

#[tokio::test]
async fn unknown_category_is_bad_request() {
    let app = router_with_mock();

    let response = app
        .oneshot(post_json(
            "/api/v1/requests",
            serde_json::json!({ "category": "weather", "params": {} }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let json = json_body(response).await;
    assert_eq!(json["code"], 400);
    assert!(json["message"].as_str().unwrap().contains("weather"));
}

#[tokio::test]
async fn nested_params_are_rejected() {
    let app = router_with_mock();

    let response = app
        .oneshot(post_json(
            "/api/v1/requests",
            serde_json::json!({ "category": "news", "params": { "query": ["a", "b"] } }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}
