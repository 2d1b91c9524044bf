//! Trino statement protocol documents
//!
//! Only the fields the router looks at are modelled; everything else in a
//! response body is passed through untouched.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;

use crate::model::ExecutionMetric;

/// Statement path prefix on every cluster
pub const STATEMENT_PATH: &str = "/v1/statement";

static QUERY_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/(\d{8}_\d{6}_\d{5}_[A-Za-z0-9]+)(?:/|$)").expect("constant pattern")
});

/// One page of a statement result (`POST /v1/statement` or a `nextUri` GET)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub info_uri: Option<String>,
    #[serde(default)]
    pub next_uri: Option<String>,
    #[serde(default)]
    pub data: Option<Vec<Vec<Value>>>,
    #[serde(default)]
    pub stats: Option<StatementStats>,
    #[serde(default)]
    pub error: Option<QueryError>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementStats {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub elapsed_time_millis: u64,
    #[serde(default)]
    pub processed_bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryError {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub error_name: Option<String>,
    #[serde(default)]
    pub error_code: Option<i64>,
}

impl StatementResponse {
    /// No follow-up URI: the client has received everything
    pub fn is_terminal(&self) -> bool {
        self.next_uri.is_none()
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
            || self
                .stats
                .as_ref()
                .map(|s| s.state.eq_ignore_ascii_case("FAILED"))
                .unwrap_or(false)
    }

    /// Execution metric for a terminal page, or `None` while the query is still running
    pub fn execution_metric(&self, fingerprint: &str) -> Option<ExecutionMetric> {
        if !self.is_terminal() {
            return None;
        }
        let stats = self.stats.clone().unwrap_or_default();
        let metric = ExecutionMetric::new(
            fingerprint,
            stats.elapsed_time_millis as f64 / 1000.0,
            !self.is_failed(),
        )
        .with_bytes(stats.processed_bytes);
        Some(match &self.error {
            Some(err) => metric.with_error(err.message.clone()),
            None => metric,
        })
    }
}

/// Query id embedded in a statement or query path.
///
/// Handles `/v1/statement/queued/{id}/..`, `/v1/statement/executing/{id}/..`
/// and the older `/v1/statement/{id}/..` layout.
pub fn query_id_from_path(path: &str) -> Option<&str> {
    QUERY_ID
        .captures(path)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_id_from_path() {
        assert_eq!(
            query_id_from_path("/v1/statement/queued/20240101_120000_00001_abcde/y1b2/1"),
            Some("20240101_120000_00001_abcde")
        );
        assert_eq!(
            query_id_from_path("/v1/statement/executing/20240101_120000_00002_xyz12/y2/0"),
            Some("20240101_120000_00002_xyz12")
        );
        assert_eq!(
            query_id_from_path("/v1/statement/20240101_120000_00003_q9/1"),
            Some("20240101_120000_00003_q9")
        );
        assert_eq!(
            query_id_from_path("/v1/query/20240101_120000_00004_aa"),
            Some("20240101_120000_00004_aa")
        );
        assert_eq!(query_id_from_path("/v1/info"), None);
    }

    #[test]
    fn test_parse_initial_response() {
        let body = r#"{
            "id": "20240101_120000_00001_abcde",
            "infoUri": "http://trino-ecs:8080/ui/query.html?20240101_120000_00001_abcde",
            "nextUri": "http://trino-ecs:8080/v1/statement/queued/20240101_120000_00001_abcde/y/1",
            "stats": {"state": "QUEUED", "queued": true, "elapsedTimeMillis": 0}
        }"#;
        let resp: StatementResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.id.as_deref(), Some("20240101_120000_00001_abcde"));
        assert!(!resp.is_terminal());
        assert!(resp.execution_metric("fp").is_none());
    }

    #[test]
    fn test_terminal_success_metric() {
        let body = r#"{
            "id": "q",
            "data": [[1]],
            "stats": {"state": "FINISHED", "elapsedTimeMillis": 2500, "processedBytes": 4096}
        }"#;
        let resp: StatementResponse = serde_json::from_str(body).unwrap();
        let metric = resp.execution_metric("fp").unwrap();
        assert!(metric.success);
        assert_eq!(metric.execution_time, 2.5);
        assert_eq!(metric.bytes_processed, 4096);
        assert!(metric.error_message.is_none());
    }

    #[test]
    fn test_terminal_failure_metric() {
        let body = r#"{
            "id": "q",
            "stats": {"state": "FAILED", "elapsedTimeMillis": 120},
            "error": {"message": "Table 'x' does not exist", "errorName": "TABLE_NOT_FOUND", "errorCode": 46}
        }"#;
        let resp: StatementResponse = serde_json::from_str(body).unwrap();
        let metric = resp.execution_metric("fp").unwrap();
        assert!(!metric.success);
        assert_eq!(metric.error_message.as_deref(), Some("Table 'x' does not exist"));
        assert_eq!(
            resp.error.unwrap().error_name.as_deref(),
            Some("TABLE_NOT_FOUND")
        );
    }
}
