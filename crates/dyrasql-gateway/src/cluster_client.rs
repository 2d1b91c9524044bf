//! HTTP client for the Trino execution clusters
//!
//! One pooled `reqwest::Client` is shared by every forwarded request. Transport
//! failures surface as `ClusterUnavailable`; HTTP error statuses are passed
//! through to the caller untouched.

use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method};
use bytes::Bytes;
use dyrasql_common::{DyraError, Result};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::analyzer::{ExplainExecutor, ExplainFailure};
use crate::cluster::ClusterProfile;
use crate::metrics;
use crate::protocol::{StatementResponse, STATEMENT_PATH};

/// Headers never copied between client and cluster
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "content-length",
    "transfer-encoding",
    "content-encoding",
    "accept-encoding",
];

pub const TRINO_USER_HEADER: &str = "x-trino-user";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const INFO_TIMEOUT: Duration = Duration::from_secs(2);

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// Request headers worth forwarding, with compression disabled upstream
pub fn upstream_headers(incoming: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in incoming {
        if !is_hop_by_hop(name) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    headers
}

/// Headers for a statement submission: `X-Trino-*` from the client plus the resolved user
pub fn statement_headers(incoming: &HeaderMap, user: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in incoming {
        if name.as_str().starts_with("x-trino-") {
            headers.append(name.clone(), value.clone());
        }
    }
    let user = HeaderValue::from_str(user)
        .map_err(|_| DyraError::Unauthorized("identity is not a valid header value".into()))?;
    headers.insert(HeaderName::from_static(TRINO_USER_HEADER), user);
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    Ok(headers)
}

/// Response headers safe to hand back to the client
pub fn downstream_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in upstream {
        if !is_hop_by_hop(name) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}

/// Pooled HTTP client for all three clusters
#[derive(Clone)]
pub struct ClusterClient {
    http: reqwest::Client,
    data_timeout: Duration,
}

impl ClusterClient {
    pub fn new(data_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| DyraError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http, data_timeout })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Submit SQL to a cluster's statement endpoint
    pub async fn submit_statement(
        &self,
        cluster: &ClusterProfile,
        sql: String,
        headers: HeaderMap,
        timeout: Duration,
    ) -> Result<reqwest::Response> {
        let request = self
            .http
            .post(cluster.url_for(STATEMENT_PATH))
            .headers(headers)
            .body(sql)
            .timeout(timeout);
        self.execute(cluster, request).await
    }

    /// Forward a follow-up request (`nextUri` poll, cancellation, anything else) verbatim
    pub async fn forward(
        &self,
        cluster: &ClusterProfile,
        method: Method,
        path_and_query: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<reqwest::Response> {
        let mut request = self
            .http
            .request(method.clone(), cluster.url_for(path_and_query))
            .headers(upstream_headers(headers))
            .timeout(self.data_timeout);
        if method == Method::POST || method == Method::PUT {
            request = request.body(body);
        }
        self.execute(cluster, request).await
    }

    /// Coordinator info document
    pub async fn info(&self, cluster: &ClusterProfile) -> Result<reqwest::Response> {
        let request = self
            .http
            .get(cluster.url_for("/v1/info"))
            .header(header::ACCEPT_ENCODING, "identity")
            .timeout(INFO_TIMEOUT);
        self.execute(cluster, request).await
    }

    async fn execute(
        &self,
        cluster: &ClusterProfile,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let start = Instant::now();
        match request.send().await {
            Ok(response) => {
                let status = response.status();
                metrics::record_backend_request(
                    &cluster.id,
                    status.as_str(),
                    start.elapsed().as_secs_f64(),
                );
                debug!("{} answered {} in {:?}", cluster.id, status, start.elapsed());
                Ok(response)
            }
            Err(e) => {
                let status = if e.is_timeout() { "timeout" } else { "error" };
                metrics::record_backend_request(&cluster.id, status, start.elapsed().as_secs_f64());
                warn!("Cluster {} unreachable: {}", cluster.id, e);
                Err(DyraError::ClusterUnavailable(format!("{}: {}", cluster.id, e)))
            }
        }
    }
}

/// Runs EXPLAIN statements through the statement protocol on one cluster
pub struct TrinoExplainExecutor {
    http: reqwest::Client,
    cluster: ClusterProfile,
    user: String,
}

impl TrinoExplainExecutor {
    pub fn new(client: &ClusterClient, cluster: ClusterProfile, user: impl Into<String>) -> Self {
        Self {
            http: client.http().clone(),
            cluster,
            user: user.into(),
        }
    }

    async fn page(
        &self,
        request: reqwest::RequestBuilder,
    ) -> std::result::Result<StatementResponse, ExplainFailure> {
        let response = request
            .header(TRINO_USER_HEADER, &self.user)
            .send()
            .await
            .map_err(|e| ExplainFailure::Unavailable(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExplainFailure::Unavailable(format!("HTTP {}", status)));
        }
        let page: StatementResponse = response
            .json()
            .await
            .map_err(|e| ExplainFailure::Unavailable(format!("unreadable response: {}", e)))?;
        if let Some(err) = &page.error {
            return Err(ExplainFailure::Rejected {
                error_name: err.error_name.clone(),
                message: err.message.clone(),
            });
        }
        Ok(page)
    }
}

#[async_trait]
impl ExplainExecutor for TrinoExplainExecutor {
    async fn run(&self, statement: &str) -> std::result::Result<Vec<Vec<Value>>, ExplainFailure> {
        let submit = self
            .http
            .post(self.cluster.url_for(STATEMENT_PATH))
            .header(header::CONTENT_TYPE, "text/plain")
            .body(statement.to_string());
        let mut page = self.page(submit).await?;
        let mut rows = page.data.take().unwrap_or_default();

        while let Some(next_uri) = page.next_uri.take() {
            page = self.page(self.http.get(&next_uri)).await?;
            if let Some(data) = page.data.take() {
                rows.extend(data);
            }
        }
        debug!("Explain on {} returned {} rows", self.cluster.id, rows.len());
        Ok(rows)
    }
}
