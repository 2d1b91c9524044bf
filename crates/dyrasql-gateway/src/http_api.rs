//! HTTP surface of the gateway
//!
//! - `/v1/statement`, `/v1/info` and every other path: the Trino proxy ([`crate::proxy`])
//! - `POST /api/v1/route`: routing decision for a statement, without executing it
//! - `POST /api/v1/metrics`: execution metric side channel
//! - `GET /health`, `GET /metrics`

use crate::errors::ApiError;
use crate::metrics;
use crate::model::{is_fingerprint, ExecutionMetric, QueryAnalysis, RoutingFactors};
use crate::proxy::{self, ProxySettings};
use crate::query_router::QueryRouter;
use crate::cluster_client::ClusterClient;
use crate::sessions::SessionTable;
use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use dyrasql_common::DyraError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<QueryRouter>,
    pub cluster_client: ClusterClient,
    pub sessions: Arc<SessionTable>,
    pub settings: Arc<ProxySettings>,
}

/// Routing inspection request
#[derive(Debug, Deserialize)]
pub struct RouteRequest {
    pub query: String,
}

/// Routing inspection response
#[derive(Debug, Serialize)]
pub struct RouteResponse {
    pub fingerprint: String,
    pub cluster: String,
    pub score: f64,
    pub factors: RoutingFactors,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<QueryAnalysis>,
    pub cluster_url: String,
    pub cluster_external_url: String,
}

/// Side-channel execution report
#[derive(Debug, Deserialize)]
pub struct MetricsRequest {
    pub fingerprint: String,
    pub execution_time: f64,
    #[serde(default)]
    pub bytes_processed: u64,
    pub success: bool,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub mode: &'static str,
    pub streaming_threshold: usize,
    pub history_backend: &'static str,
    pub active_sessions: usize,
    pub cache_hit_rate: f64,
}

/// Route a statement and report the decision
pub async fn route_query(
    State(state): State<AppState>,
    Json(request): Json<RouteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let route = state.router.route(&request.query).await?;
    let cluster = state.router.cluster_for(&route.decision);
    let response = RouteResponse {
        fingerprint: route.decision.fingerprint.clone(),
        cluster: cluster.id.clone(),
        score: route.decision.score,
        factors: route.decision.factors,
        cached: route.decision.cached,
        analysis: route.analysis,
        cluster_url: cluster.internal_url.clone(),
        cluster_external_url: cluster.external_url.clone(),
    };
    Ok((StatusCode::OK, Json(response)))
}

/// Record an execution metric reported by a client
pub async fn submit_metrics(
    State(state): State<AppState>,
    Json(request): Json<MetricsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !is_fingerprint(&request.fingerprint) {
        return Err(DyraError::QuerySyntax("fingerprint must be 64 hex characters".into()).into());
    }
    if !request.execution_time.is_finite() || request.execution_time < 0.0 {
        return Err(DyraError::QuerySyntax("execution_time must be a non-negative number".into()).into());
    }

    let mut metric = ExecutionMetric::new(request.fingerprint, request.execution_time, request.success)
        .with_bytes(request.bytes_processed);
    if let Some(message) = request.error_message {
        metric = metric.with_error(message);
    }
    state.router.history().record_metric(&metric, "side_channel").await;
    Ok((StatusCode::OK, Json(serde_json::json!({ "status": "recorded" }))))
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let history = state.router.history();
    Json(HealthResponse {
        status: "healthy",
        mode: state.settings.mode.as_str(),
        streaming_threshold: state.settings.streaming_threshold,
        history_backend: history.backend(),
        active_sessions: state.sessions.len(),
        cache_hit_rate: history.stats().hit_rate(),
    })
}

/// Prometheus metrics endpoint
pub async fn prometheus_metrics() -> impl IntoResponse {
    let body = metrics::encode_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        body,
    )
}

/// Assemble the full gateway router
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    info!("HTTP routes: /v1/statement, /v1/info, /api/v1/route, /api/v1/metrics, /health, /metrics");
    Router::new()
        .route(
            "/v1/statement",
            post(proxy::submit_statement).get(proxy::statement_method_not_allowed),
        )
        .route("/v1/info", get(proxy::coordinator_info))
        .route("/loginType", get(proxy::login_type).post(proxy::login_type))
        .route("/api/v1/route", post(route_query))
        .route("/api/v1/metrics", post(submit_metrics))
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .fallback(proxy::follow_up)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
