use std::{collections::BTreeMap, sync::Arc};

use axum::{
    extract::State,
    http::HeaderValue,
    routing::{get, post},
    Json, Router,
};
use cryptodash_providers::{AggregatedResponse, Category, LogicalRequest, ProviderHealthSnapshot};
use serde::Deserialize;
use serde_json::Value;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::{
    config::Config,
    error::{ApiError, ApiResult},
    main_lib::AppState,
};

pub async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DispatchRequest {
    category: String,
    #[serde(default)]
    params: BTreeMap<String, Value>,
    #[serde(default)]
    capability: Option<String>,
}

impl DispatchRequest {
    fn into_logical(self) -> ApiResult<LogicalRequest> {
        let category: Category = self.category.parse().map_err(ApiError::BadRequest)?;
        let params = self
            .params
            .into_iter()
            .map(|(key, value)| match value {
                Value::String(s) => Ok((key, s)),
                Value::Number(n) => Ok((key, n.to_string())),
                Value::Bool(b) => Ok((key, b.to_string())),
                other => Err(ApiError::BadRequest(format!(
                    "parameter '{}' must be a string, number or boolean, got {}",
                    key, other
                ))),
            })
            .collect::<ApiResult<Vec<_>>>()?;

        let request = LogicalRequest::new(category, params);
        Ok(match self.capability {
            Some(capability) => request.with_capability(capability),
            None => request,
        })
    }
}

/// Answer a logical request. Provider failures are reported in the body,
/// never as an error status.
async fn dispatch_request(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DispatchRequest>,
) -> ApiResult<Json<AggregatedResponse>> {
    let request = body.into_logical()?;
    let response = state.engine.handle(&request).await;
    Ok(Json(response))
}

async fn providers_health(State(state): State<Arc<AppState>>) -> Json<Vec<ProviderHealthSnapshot>> {
    Json(state.engine.health_snapshot())
}

pub fn app_router(state: Arc<AppState>, config: &Config) -> Router {
    let cors = if config.cors_allow.iter().any(|o| o == "*") {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins = config
            .cors_allow
            .iter()
            .filter_map(|o| o.parse::<HeaderValue>().ok())
            .collect::<Vec<_>>();
        CorsLayer::new().allow_origin(origins)
    };

    let api = Router::new()
        .route("/healthz", get(healthz))
        .route("/requests", post(dispatch_request))
        .route("/providers/health", get(providers_health));

    Router::new()
        .nest("/api/v1", api)
        .with_state(state)
        .layer(cors)
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(TraceLayer::new_for_http())
}
