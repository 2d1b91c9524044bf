//! Routing proxy speaking the Trino statement protocol
//!
//! `POST /v1/statement` is routed through the [`QueryRouter`]; every other
//! statement path is a follow-up and goes to the cluster recorded for its
//! query id. Responses below the streaming threshold are buffered (and
//! inspected for session bookkeeping and in-band metrics); larger ones are
//! streamed chunk by chunk with incremental URI rewriting.
//!
//! [`QueryRouter`]: crate::query_router::QueryRouter

pub mod rewrite;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use bytes::{Bytes, BytesMut};
use dyrasql_common::{DyraError, UserIdentity};
use futures::stream::{self, BoxStream, StreamExt};
use regex::Regex;
use serde_json::json;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cluster::ClusterProfile;
use crate::cluster_client::{downstream_headers, statement_headers};
use crate::errors::ApiError;
use crate::http_api::AppState;
use crate::metrics;
use crate::model::short_fingerprint;
use crate::protocol::{query_id_from_path, StatementResponse};
use crate::sessions::{QuerySession, SessionTable};

pub use rewrite::UriRewriter;

/// Bytes of a streamed submission inspected for its query id
const SNIFF_LEN: usize = 512;

static RESPONSE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""id"\s*:\s*"([^"]+)""#).expect("constant pattern"));

/// Where follow-up URIs in responses point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyMode {
    /// Clients talk to the cluster directly after the first response
    Bypass,
    /// Every follow-up goes through the router
    Proxy,
}

impl ProxyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyMode::Bypass => "bypass",
            ProxyMode::Proxy => "proxy",
        }
    }
}

/// Proxy behaviour knobs, fixed at startup
#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub mode: ProxyMode,
    /// Base URL clients use to reach this router
    pub public_url: String,
    /// Bodies at or above this many bytes are streamed
    pub streaming_threshold: usize,
    pub identity_header: String,
    pub keepalive_timeout: Duration,
    pub data_timeout: Duration,
}

impl ProxySettings {
    fn rewriter_for(&self, cluster: &ClusterProfile) -> UriRewriter {
        let statement_base = match self.mode {
            ProxyMode::Bypass => cluster.external_url.as_str(),
            ProxyMode::Proxy => self.public_url.as_str(),
        };
        UriRewriter::new(&cluster.internal_url, statement_base, &cluster.external_url)
    }
}

/// Bookkeeping attached to one relayed response
struct RelayContext {
    cluster: ClusterProfile,
    /// Known query id (follow-ups); submissions learn it from the body
    query_id: Option<String>,
    fingerprint: Option<String>,
    /// Initial submission: open a session from the response id
    opens_session: bool,
}

/// `POST /v1/statement`
pub async fn submit_statement(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let settings = &state.settings;
    let identity = UserIdentity::from_header(
        &settings.identity_header,
        headers
            .get(settings.identity_header.as_str())
            .and_then(|v| v.to_str().ok()),
    )?;
    let identity = match headers.get("x-trino-source").and_then(|v| v.to_str().ok()) {
        Some(source) => identity.with_source(source),
        None => identity,
    };

    let sql = String::from_utf8(body.to_vec())
        .map_err(|_| DyraError::QuerySyntax("statement is not valid UTF-8".into()))?;
    if sql.trim().is_empty() {
        return Err(DyraError::QuerySyntax("SQL query is required".into()).into());
    }
    debug!(
        "Statement from {} ({}): {}",
        identity.user_id,
        identity.source.as_deref().unwrap_or("unknown"),
        preview(&sql)
    );

    let route = state.router.route(&sql).await?;
    let cluster = state.router.cluster_for(&route.decision).clone();
    let timeout = if route.is_keepalive() {
        settings.keepalive_timeout
    } else {
        settings.data_timeout
    };
    info!(
        "Executing {} on {} (source={}, mode={})",
        short_fingerprint(&route.decision.fingerprint),
        cluster.id,
        route.source.as_str(),
        settings.mode.as_str()
    );

    let upstream = state
        .cluster_client
        .submit_statement(
            &cluster,
            sql,
            statement_headers(&headers, &identity.user_id)?,
            timeout,
        )
        .await?;

    let fingerprint = (!route.is_keepalive()).then(|| route.decision.fingerprint.clone());
    relay(
        &state,
        upstream,
        RelayContext {
            cluster,
            query_id: None,
            fingerprint,
            opens_session: true,
        },
    )
    .await
}

/// Every other path: statement follow-ups, cancellation, UI and misc endpoints
pub async fn follow_up(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let path = uri.path();
    let path_and_query = uri.path_and_query().map(|p| p.as_str()).unwrap_or(path);
    let query_id = query_id_from_path(path).map(str::to_string);

    let session = query_id.as_deref().and_then(|id| state.sessions.touch(id));
    let cluster = match (&session, &query_id) {
        (Some(session), _) => state.router.clusters().get_or_lightest(&session.cluster_id).clone(),
        (None, Some(id)) => {
            warn!(query_id = %id, "No session for follow-up, forwarding to the light cluster");
            state.router.clusters().lightest().clone()
        }
        (None, None) => state.router.clusters().lightest().clone(),
    };
    debug!("{} {} -> {}", method, path, cluster.id);

    let upstream = state
        .cluster_client
        .forward(&cluster, method.clone(), path_and_query, &headers, body)
        .await?;

    if method == Method::DELETE {
        if let Some(id) = &query_id {
            state.sessions.evict(id);
        }
    }

    relay(
        &state,
        upstream,
        RelayContext {
            cluster,
            query_id,
            fingerprint: session.and_then(|s| s.fingerprint),
            opens_session: false,
        },
    )
    .await
}

/// `GET /v1/info`, answered by the light cluster or synthesized when it is down
pub async fn coordinator_info(State(state): State<AppState>) -> Response {
    let cluster = state.router.clusters().lightest().clone();
    match state.cluster_client.info(&cluster).await {
        Ok(upstream) => {
            let status = upstream.status();
            let headers = downstream_headers(upstream.headers());
            match upstream.bytes().await {
                Ok(body) => {
                    let body = state.settings.rewriter_for(&cluster).rewrite_all(&body);
                    build_response(status, headers, Body::from(body))
                }
                Err(e) => synthetic_info(&e.to_string()),
            }
        }
        Err(e) => synthetic_info(&e.to_string()),
    }
}

fn synthetic_info(reason: &str) -> Response {
    warn!("Coordinator info unavailable, returning fallback: {}", reason);
    (
        StatusCode::OK,
        axum::Json(json!({
            "nodeId": "dyrasql",
            "state": "ACTIVE",
            "environment": "production",
            "coordinator": true,
            "starting": false
        })),
    )
        .into_response()
}

/// `GET|POST /loginType`: no interactive login
pub async fn login_type() -> Response {
    (StatusCode::OK, axum::Json(json!({ "supportedTypes": [] }))).into_response()
}

/// `GET /v1/statement` is not part of the protocol
pub async fn statement_method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        axum::Json(json!({
            "error": "Method not allowed. Use POST /v1/statement to execute queries.",
            "code": "METHOD_NOT_ALLOWED"
        })),
    )
        .into_response()
}

/// Relay an upstream response, buffering it when it turns out to be small
async fn relay(
    state: &AppState,
    upstream: reqwest::Response,
    ctx: RelayContext,
) -> Result<Response, ApiError> {
    let status = upstream.status();
    let mut headers = downstream_headers(upstream.headers());
    if !headers.contains_key(header::CONTENT_TYPE) {
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    let threshold = state.settings.streaming_threshold;
    let known_large = upstream
        .content_length()
        .map(|len| len as usize >= threshold)
        .unwrap_or(false);

    let fill_to = match (known_large, ctx.opens_session) {
        (false, _) => threshold,
        (true, true) => SNIFF_LEN,
        (true, false) => 0,
    };

    let mut upstream_body = upstream.bytes_stream().boxed();
    let mut prefix = BytesMut::new();
    while prefix.len() < fill_to {
        match upstream_body.next().await {
            Some(Ok(chunk)) => prefix.extend_from_slice(&chunk),
            Some(Err(e)) => {
                return Err(DyraError::ClusterUnavailable(format!(
                    "{}: body read failed: {}",
                    ctx.cluster.id, e
                ))
                .into())
            }
            None => {
                let body = finish_buffered(state, &ctx, prefix.freeze());
                metrics::record_response("buffered");
                return Ok(build_response(status, headers, Body::from(body)));
            }
        }
    }

    metrics::record_response("streamed");
    let query_id = ctx.query_id.clone().or_else(|| {
        if ctx.opens_session {
            sniff_query_id(&prefix)
        } else {
            None
        }
    });
    if ctx.opens_session {
        if let Some(id) = &query_id {
            state.sessions.insert(QuerySession::new(
                id.clone(),
                ctx.cluster.id.clone(),
                ctx.fingerprint.clone(),
            ));
        }
    }

    let mut rewriter = state.settings.rewriter_for(&ctx.cluster);
    let head = rewriter.push(&prefix).freeze();
    let streamed = StreamedBody {
        upstream: upstream_body,
        rewriter,
        sessions: Arc::clone(&state.sessions),
        query_id,
        cluster_id: ctx.cluster.id,
    };
    let body = stream::once(async move { Ok::<Bytes, std::io::Error>(head) }).chain(streamed.into_stream());
    Ok(build_response(status, headers, Body::from_stream(body)))
}

/// Session bookkeeping, in-band metrics and URI rewriting for a fully buffered body
fn finish_buffered(state: &AppState, ctx: &RelayContext, body: Bytes) -> Bytes {
    if let Ok(page) = serde_json::from_slice::<StatementResponse>(&body) {
        let query_id = ctx.query_id.clone().or_else(|| page.id.clone());
        if let Some(id) = &query_id {
            if page.is_terminal() {
                if !ctx.opens_session {
                    state.sessions.evict(id);
                }
            } else if ctx.opens_session {
                state.sessions.insert(QuerySession::new(
                    id.clone(),
                    ctx.cluster.id.clone(),
                    ctx.fingerprint.clone(),
                ));
            }
        }

        if let Some(fingerprint) = &ctx.fingerprint {
            if let Some(metric) = page.execution_metric(fingerprint) {
                let history = Arc::clone(state.router.history());
                tokio::spawn(async move {
                    history.record_metric(&metric, "in_band").await;
                });
            }
        }
    }
    state.settings.rewriter_for(&ctx.cluster).rewrite_all(&body)
}

fn sniff_query_id(prefix: &[u8]) -> Option<String> {
    let head = &prefix[..prefix.len().min(SNIFF_LEN)];
    let text = String::from_utf8_lossy(head);
    RESPONSE_ID
        .captures(&text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Upstream body relayed chunk by chunk. Dropping it drops the upstream
/// response, which cancels the request on the cluster side.
struct StreamedBody {
    upstream: BoxStream<'static, reqwest::Result<Bytes>>,
    rewriter: UriRewriter,
    sessions: Arc<SessionTable>,
    query_id: Option<String>,
    cluster_id: String,
}

impl StreamedBody {
    fn into_stream(self) -> impl futures::Stream<Item = Result<Bytes, std::io::Error>> + Send {
        stream::unfold(Some(self), |state| async move {
            let mut body = match state {
                Some(body) => body,
                None => return None,
            };
            loop {
                match body.upstream.next().await {
                    Some(Ok(chunk)) => {
                        let out = body.rewriter.push(&chunk);
                        if !out.is_empty() {
                            return Some((Ok(out.freeze()), Some(body)));
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Stream from {} broke off: {}", body.cluster_id, e);
                        return Some((Err(std::io::Error::other(e)), None));
                    }
                    None => {
                        let tail = body.rewriter.finish().freeze();
                        if !body.rewriter.saw_next_uri() {
                            if let Some(id) = &body.query_id {
                                body.sessions.evict(id);
                            }
                        }
                        return Some((Ok(tail), None));
                    }
                }
            }
        })
    }
}

fn build_response(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn preview(sql: &str) -> String {
    sql.chars()
        .take(100)
        .map(|c| if c == '\n' { ' ' } else { c })
        .collect()
}
