//! Volume estimation from cluster EXPLAIN plans
//!
//! Strategies are tried in order:
//! 1. `EXPLAIN (TYPE IO)`: JSON with per-table row and byte estimates
//! 2. `EXPLAIN (TYPE DISTRIBUTED)`: text plan, table scans plus cost annotations
//! 3. Give up: volume unknown, the decision is marked analysis-degraded
//!
//! A syntax error from the cluster aborts routing. A view-resolution error
//! skips straight to step 3.

use async_trait::async_trait;
use dyrasql_common::{DyraError, Result};
use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::errors::{classify_explain_error, ErrorCategory};
use crate::metrics;
use crate::model::VolumeSource;

static TABLE_SCAN_REGEXES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)TableScan\[table\s*=\s*([^\],]+)",
        r"(?i)ScanProject\[table\s*=\s*([^\],]+)",
        r"(?i)table:([a-zA-Z_]\w*\.[a-zA-Z_]\w*\.[a-zA-Z_]\w*)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("constant pattern"))
    .collect()
});

static COST_REGEXES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // est. 1000 rows, 8.5 MB
        r"est\.\s*([\d.]+)\s*rows?,\s*([\d.]+)\s*(\w+)",
        // {rows: 1000 (8.5MB), ...}
        r"rows:\s*([\d.]+)\s*\(([\d.]+)\s*([a-zA-Z]+)\)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("constant pattern"))
    .collect()
});

/// Average data file size used to derive a file count from bytes
pub const AVERAGE_FILE_BYTES: f64 = 50.0 * 1024.0 * 1024.0;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Why an explain statement produced no rows
#[derive(Debug, Clone, PartialEq)]
pub enum ExplainFailure {
    /// The cluster ran the statement and reported a query error
    Rejected {
        error_name: Option<String>,
        message: String,
    },
    /// Transport failure, unexpected HTTP status or timeout
    Unavailable(String),
}

/// Runs a statement on the explain cluster and returns its data rows
#[async_trait]
pub trait ExplainExecutor: Send + Sync {
    async fn run(&self, statement: &str) -> std::result::Result<Vec<Vec<Value>>, ExplainFailure>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExplainType {
    Io,
    Distributed,
}

impl ExplainType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExplainType::Io => "io",
            ExplainType::Distributed => "distributed",
        }
    }

    fn statement(&self, sql: &str) -> String {
        match self {
            ExplainType::Io => format!("EXPLAIN (TYPE IO) {}", sql),
            ExplainType::Distributed => format!("EXPLAIN (TYPE DISTRIBUTED) {}", sql),
        }
    }
}

/// Estimated read volume of one table
#[derive(Debug, Clone, PartialEq)]
pub struct TableEstimate {
    pub name: String,
    pub bytes: f64,
    pub rows: f64,
}

impl TableEstimate {
    pub fn file_count(&self) -> u64 {
        if self.bytes > 0.0 {
            (self.bytes / AVERAGE_FILE_BYTES).ceil() as u64
        } else {
            0
        }
    }
}

/// Aggregated volume over all tables of a statement
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeEstimate {
    pub tables: Vec<TableEstimate>,
    pub source: VolumeSource,
    /// Set when `source` is `Unavailable`
    pub degraded_reason: Option<&'static str>,
}

impl VolumeEstimate {
    fn from_tables(tables: Vec<TableEstimate>, source: VolumeSource) -> Self {
        Self {
            tables,
            source,
            degraded_reason: None,
        }
    }

    fn unavailable(reason: &'static str) -> Self {
        Self {
            tables: Vec::new(),
            source: VolumeSource::Unavailable,
            degraded_reason: Some(reason),
        }
    }

    pub fn total_bytes(&self) -> f64 {
        self.tables.iter().map(|t| t.bytes).sum()
    }

    pub fn data_size_gb(&self) -> f64 {
        self.total_bytes() / BYTES_PER_GB
    }

    pub fn record_count(&self) -> u64 {
        self.tables.iter().map(|t| t.rows).sum::<f64>().max(0.0) as u64
    }

    pub fn file_count(&self) -> u64 {
        self.tables.iter().map(TableEstimate::file_count).sum()
    }
}

/// Outcome of one explain strategy
enum Attempt {
    Estimate(Vec<TableEstimate>),
    Syntax(String),
    View,
    Fallback(&'static str),
}

/// Runs the explain fallback chain against one executor
pub struct VolumeEstimator {
    executor: Arc<dyn ExplainExecutor>,
    timeout: Duration,
    default_catalog: String,
}

impl VolumeEstimator {
    pub fn new(executor: Arc<dyn ExplainExecutor>, timeout: Duration, default_catalog: impl Into<String>) -> Self {
        Self {
            executor,
            timeout,
            default_catalog: default_catalog.into(),
        }
    }

    /// Estimate the volume read by `sql` (already catalog-qualified).
    ///
    /// Only a syntax error reported by the cluster is returned as an error.
    pub async fn estimate(&self, sql: &str) -> Result<VolumeEstimate> {
        for explain_type in [ExplainType::Io, ExplainType::Distributed] {
            match self.attempt(explain_type, sql).await {
                Attempt::Estimate(tables) => {
                    let source = match explain_type {
                        ExplainType::Io => VolumeSource::ExplainIo,
                        ExplainType::Distributed => VolumeSource::ExplainDistributed,
                    };
                    return Ok(VolumeEstimate::from_tables(tables, source));
                }
                Attempt::Syntax(message) => return Err(DyraError::QuerySyntax(message)),
                Attempt::View => return Ok(VolumeEstimate::unavailable("view_error")),
                Attempt::Fallback(reason) => {
                    debug!("explain {} unusable ({}), trying next strategy", explain_type.as_str(), reason);
                }
            }
        }
        Ok(VolumeEstimate::unavailable("explain_failed"))
    }

    async fn attempt(&self, explain_type: ExplainType, sql: &str) -> Attempt {
        let kind = explain_type.as_str();
        let statement = explain_type.statement(sql);
        info!(
            "Running explain {} for: {}",
            kind,
            statement.chars().take(80).collect::<String>().replace('\n', " ")
        );

        let rows = match tokio::time::timeout(self.timeout, self.executor.run(&statement)).await {
            Err(_) => {
                warn!("explain {} timed out after {:?}", kind, self.timeout);
                metrics::record_explain(kind, "timeout");
                return Attempt::Fallback("timeout");
            }
            Ok(Err(ExplainFailure::Unavailable(reason))) => {
                warn!("explain {} cluster unavailable: {}", kind, reason);
                metrics::record_explain(kind, "unavailable");
                return Attempt::Fallback("unavailable");
            }
            Ok(Err(ExplainFailure::Rejected { error_name, message })) => {
                let classified = classify_explain_error(error_name.as_deref(), &message);
                metrics::record_explain(kind, &format!("error_{}", classified.category));
                debug!("explain {} raw error: {}", kind, classified.raw_error);
                if classified.category.continues_fallback() {
                    warn!("explain {} error: {}", kind, classified.message);
                    return Attempt::Fallback("error");
                }
                return match classified.category {
                    ErrorCategory::Syntax => Attempt::Syntax(classified.message),
                    _ => {
                        warn!("explain {} view error: {}", kind, classified.message);
                        Attempt::View
                    }
                };
            }
            Ok(Ok(rows)) => rows,
        };

        let tables = match explain_type {
            ExplainType::Io => parse_io_plan(&rows),
            ExplainType::Distributed => parse_distributed_plan(&plan_text(&rows), &self.default_catalog),
        };

        if tables.is_empty() {
            info!("explain {} found no tables", kind);
            metrics::record_explain(kind, "no_tables");
            return Attempt::Fallback("no_tables");
        }

        metrics::record_explain(kind, "ok");
        debug!("explain {} parsed {} tables", kind, tables.len());
        Attempt::Estimate(tables)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IoPlan {
    #[serde(default)]
    input_table_column_infos: Vec<IoTableInfo>,
}

#[derive(Debug, Deserialize)]
struct IoTableInfo {
    #[serde(default)]
    table: IoTable,
    #[serde(default)]
    estimate: IoEstimate,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IoTable {
    #[serde(default)]
    catalog: String,
    #[serde(default)]
    schema_table: SchemaTable,
}

#[derive(Debug, Default, Deserialize)]
struct SchemaTable {
    #[serde(default)]
    schema: String,
    #[serde(default)]
    table: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IoEstimate {
    #[serde(default, deserialize_with = "lenient_f64")]
    output_row_count: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    output_size_in_bytes: f64,
}

/// Numbers, numeric strings and "NaN"; anything non-finite reads as 0
fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    let parsed = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    Ok(if parsed.is_finite() && parsed > 0.0 { parsed } else { 0.0 })
}

/// Parse `EXPLAIN (TYPE IO, FORMAT JSON)` output: the first cell holds the JSON document
pub fn parse_io_plan(rows: &[Vec<Value>]) -> Vec<TableEstimate> {
    let Some(cell) = rows.first().and_then(|r| r.first()) else {
        return Vec::new();
    };

    let plan: std::result::Result<IoPlan, _> = match cell {
        Value::String(text) => serde_json::from_str(text),
        other => serde_json::from_value(other.clone()),
    };

    let plan = match plan {
        Ok(plan) => plan,
        Err(e) => {
            warn!("Failed to parse IO plan: {}", e);
            return Vec::new();
        }
    };

    plan.input_table_column_infos
        .into_iter()
        .filter(|info| {
            !info.table.catalog.is_empty()
                && !info.table.schema_table.schema.is_empty()
                && !info.table.schema_table.table.is_empty()
        })
        .map(|info| TableEstimate {
            name: format!(
                "{}.{}.{}",
                info.table.catalog, info.table.schema_table.schema, info.table.schema_table.table
            ),
            bytes: info.estimate.output_size_in_bytes,
            rows: info.estimate.output_row_count,
        })
        .collect()
}

/// Join the single-column text rows of a distributed plan
fn plan_text(rows: &[Vec<Value>]) -> String {
    rows.iter()
        .filter_map(|r| r.first())
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse a distributed text plan.
///
/// Cost annotations cannot be attributed to individual scans, so their sum is
/// split evenly across the tables found.
pub fn parse_distributed_plan(plan: &str, default_catalog: &str) -> Vec<TableEstimate> {
    let mut names: Vec<String> = Vec::new();
    for regex in TABLE_SCAN_REGEXES.iter() {
        for caps in regex.captures_iter(plan) {
            if let Some(name) = caps.get(1).and_then(|m| qualify_plan_table(m.as_str(), default_catalog)) {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
    }

    if names.is_empty() {
        return Vec::new();
    }

    let mut total_rows = 0.0;
    let mut total_bytes = 0.0;
    for regex in COST_REGEXES.iter() {
        for caps in regex.captures_iter(plan) {
            let rows = caps[1].parse::<f64>().unwrap_or(0.0);
            let size = caps[2].parse::<f64>().unwrap_or(0.0);
            total_rows += rows;
            total_bytes += size * unit_multiplier(&caps[3]);
        }
    }

    let n = names.len() as f64;
    names
        .into_iter()
        .map(|name| TableEstimate {
            name,
            bytes: total_bytes / n,
            rows: total_rows / n,
        })
        .collect()
}

/// Turn a plan table reference such as `iceberg:sales.orders$data@42` into `catalog.schema.table`
fn qualify_plan_table(reference: &str, default_catalog: &str) -> Option<String> {
    let compact: String = reference.chars().filter(|c| !c.is_whitespace()).collect();
    let base = compact.split(['$', '@']).next().unwrap_or_default().replacen(':', ".", 1);
    let parts: Vec<&str> = base.split('.').filter(|p| !p.is_empty()).collect();
    match parts.len() {
        0 | 1 => None,
        2 => Some(format!("{}.{}.{}", default_catalog, parts[0], parts[1])),
        _ => Some(format!("{}.{}.{}", parts[0], parts[1], parts[2..].join("."))),
    }
}

fn unit_multiplier(unit: &str) -> f64 {
    match unit.to_lowercase().as_str() {
        "kb" => 1024.0,
        "mb" => 1024.0 * 1024.0,
        "gb" => BYTES_PER_GB,
        "tb" => BYTES_PER_GB * 1024.0,
        "pb" => BYTES_PER_GB * 1024.0 * 1024.0,
        _ => 1.0,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Scripted executor answering each explain type with a fixed result
    pub(crate) struct ScriptedExecutor {
        pub io: std::result::Result<Vec<Vec<Value>>, ExplainFailure>,
        pub distributed: std::result::Result<Vec<Vec<Value>>, ExplainFailure>,
        pub calls: Mutex<Vec<String>>,
    }

    impl ScriptedExecutor {
        pub(crate) fn new(
            io: std::result::Result<Vec<Vec<Value>>, ExplainFailure>,
            distributed: std::result::Result<Vec<Vec<Value>>, ExplainFailure>,
        ) -> Self {
            Self {
                io,
                distributed,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn failing() -> Self {
            Self::new(
                Err(ExplainFailure::Unavailable("connection refused".into())),
                Err(ExplainFailure::Unavailable("connection refused".into())),
            )
        }
    }

    #[async_trait]
    impl ExplainExecutor for ScriptedExecutor {
        async fn run(&self, statement: &str) -> std::result::Result<Vec<Vec<Value>>, ExplainFailure> {
            self.calls.lock().push(statement.to_string());
            if statement.starts_with("EXPLAIN (TYPE IO)") {
                self.io.clone()
            } else {
                self.distributed.clone()
            }
        }
    }

    pub(crate) fn io_rows(bytes: f64, rows: f64) -> Vec<Vec<Value>> {
        let plan = json!({
            "inputTableColumnInfos": [{
                "table": {
                    "catalog": "iceberg",
                    "schemaTable": { "schema": "sales", "table": "orders" }
                },
                "estimate": { "outputRowCount": rows, "outputSizeInBytes": bytes }
            }]
        });
        vec![vec![Value::String(plan.to_string())]]
    }

    fn estimator(executor: ScriptedExecutor) -> VolumeEstimator {
        VolumeEstimator::new(Arc::new(executor), Duration::from_secs(5), "iceberg")
    }

    #[test]
    fn test_parse_io_plan() {
        let tables = parse_io_plan(&io_rows(3.0 * BYTES_PER_GB, 1_150_371.0));
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name, "iceberg.sales.orders");
        assert_eq!(tables[0].rows, 1_150_371.0);
        // 3 GiB over 50 MiB files
        assert_eq!(tables[0].file_count(), 62);
    }

    #[test]
    fn test_parse_io_plan_nan_estimates() {
        let plan = json!({
            "inputTableColumnInfos": [{
                "table": { "catalog": "hive", "schemaTable": { "schema": "logs", "table": "events" } },
                "estimate": { "outputRowCount": "NaN", "outputSizeInBytes": "NaN" }
            }, {
                "table": { "catalog": "", "schemaTable": { "schema": "x", "table": "y" } }
            }]
        });
        let tables = parse_io_plan(&[vec![Value::String(plan.to_string())]]);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].bytes, 0.0);
        assert_eq!(tables[0].file_count(), 0);
    }

    #[test]
    fn test_parse_io_plan_garbage() {
        assert!(parse_io_plan(&[]).is_empty());
        assert!(parse_io_plan(&[vec![json!("not json")]]).is_empty());
    }

    #[test]
    fn test_parse_distributed_plan() {
        let plan = "Fragment 1 [SOURCE]\n\
            \x20   TableScan[table = iceberg:sales.orders$data@7, grouped = false]\n\
            \x20       Estimates: {rows: 1000 (2GB), cpu: ?, memory: 0B, network: 0B}\n\
            \x20   ScanProject[table = crm.customers]\n\
            \x20       est. 500 rows, 2 GB\n";
        let tables = parse_distributed_plan(plan, "iceberg");
        let names: Vec<_> = tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["iceberg.sales.orders", "iceberg.crm.customers"]);
        assert_eq!(tables[0].bytes, 2.0 * BYTES_PER_GB);
        assert_eq!(tables[0].rows, 750.0);
    }

    #[test]
    fn test_parse_distributed_plan_without_tables() {
        assert!(parse_distributed_plan("Output[x]\n  Values", "iceberg").is_empty());
    }

    #[tokio::test]
    async fn test_io_explain_used_first() {
        let executor = ScriptedExecutor::new(Ok(io_rows(10.0 * BYTES_PER_GB, 100.0)), Ok(vec![]));
        let est = estimator(executor).estimate("select * from iceberg.sales.orders").await.unwrap();
        assert_eq!(est.source, VolumeSource::ExplainIo);
        assert!((est.data_size_gb() - 10.0).abs() < 1e-9);
        assert_eq!(est.record_count(), 100);
    }

    #[tokio::test]
    async fn test_falls_back_to_distributed() {
        let executor = ScriptedExecutor::new(
            Ok(vec![vec![json!(r#"{"inputTableColumnInfos": []}"#)]]),
            Ok(vec![vec![json!("TableScan[table = iceberg.sales.orders]")], vec![json!("est. 10 rows, 1 kB")]]),
        );
        let est = estimator(executor).estimate("select * from iceberg.sales.v_orders").await.unwrap();
        assert_eq!(est.source, VolumeSource::ExplainDistributed);
        assert_eq!(est.total_bytes(), 1024.0);
    }

    #[tokio::test]
    async fn test_both_failing_degrades() {
        let est = estimator(ScriptedExecutor::failing()).estimate("select * from t").await.unwrap();
        assert_eq!(est.source, VolumeSource::Unavailable);
        assert_eq!(est.degraded_reason, Some("explain_failed"));
        assert!(est.tables.is_empty());
    }

    #[tokio::test]
    async fn test_view_error_skips_distributed() {
        let executor = Arc::new(ScriptedExecutor::new(
            Err(ExplainFailure::Rejected {
                error_name: None,
                message: "Failed analyzing stored view 'iceberg.s.v': Catalog 'old' not found".into(),
            }),
            Ok(vec![vec![json!("TableScan[table = iceberg.s.t]")]]),
        ));
        let est = VolumeEstimator::new(executor.clone(), Duration::from_secs(5), "iceberg")
            .estimate("select * from iceberg.s.v")
            .await
            .unwrap();
        assert_eq!(est.degraded_reason, Some("view_error"));
        assert_eq!(executor.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_io_explain_continues_to_distributed() {
        let executor = Arc::new(ScriptedExecutor::new(
            Err(ExplainFailure::Rejected {
                error_name: Some("GENERIC_INTERNAL_ERROR".into()),
                message: "Query exceeded per-node memory limit\n\tat io.trino.Foo".into(),
            }),
            Ok(vec![vec![json!("TableScan[table = iceberg.s.t]")], vec![json!("est. 4 rows, 2 MB")]]),
        ));
        let est = VolumeEstimator::new(executor.clone(), Duration::from_secs(5), "iceberg")
            .estimate("select * from iceberg.s.t")
            .await
            .unwrap();
        assert_eq!(est.source, VolumeSource::ExplainDistributed);
        assert_eq!(est.total_bytes(), 2.0 * 1024.0 * 1024.0);
        assert_eq!(executor.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_syntax_error_aborts() {
        let executor = ScriptedExecutor::new(
            Err(ExplainFailure::Rejected {
                error_name: Some("SYNTAX_ERROR".into()),
                message: "line 1:8: mismatched input 'FROMM'".into(),
            }),
            Ok(vec![]),
        );
        let err = estimator(executor).estimate("select * fromm t").await.unwrap_err();
        assert!(matches!(err, DyraError::QuerySyntax(_)));
    }

    #[tokio::test]
    async fn test_slow_executor_times_out() {
        struct Slow;

        #[async_trait]
        impl ExplainExecutor for Slow {
            async fn run(&self, _statement: &str) -> std::result::Result<Vec<Vec<Value>>, ExplainFailure> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(vec![])
            }
        }

        let est = VolumeEstimator::new(Arc::new(Slow), Duration::from_millis(20), "iceberg")
            .estimate("select * from t")
            .await
            .unwrap();
        assert_eq!(est.source, VolumeSource::Unavailable);
    }
}
