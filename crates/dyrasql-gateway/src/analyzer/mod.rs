//! Query Analyzer
//!
//! Turns raw SQL into a fingerprint plus a [`QueryAnalysis`]:
//! - normalization and fingerprinting ([`normalize`])
//! - static structure signals and table extraction ([`complexity`])
//! - volume estimation through cluster EXPLAIN with fallback ([`explain`])

pub mod complexity;
pub mod explain;
pub mod normalize;

use dyrasql_common::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub use complexity::{is_keepalive, is_metadata_query};
pub use explain::{ExplainExecutor, ExplainFailure, VolumeEstimator};
pub use normalize::NormalizedQuery;

use crate::metrics;
use crate::model::{short_fingerprint, QueryAnalysis, VolumeSource};

/// Analyzer settings
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Columns whose predicates count as partition pruning (lowercase)
    pub partition_columns: Vec<String>,
    /// Catalog prefixed to two-part table names before explaining
    pub default_catalog: String,
    pub explain_timeout: Duration,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            partition_columns: ["date", "dt", "data", "timestamp", "year", "month", "day"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            default_catalog: "iceberg".to_string(),
            explain_timeout: Duration::from_secs(30),
        }
    }
}

pub struct QueryAnalyzer {
    volume: VolumeEstimator,
    config: AnalyzerConfig,
}

impl QueryAnalyzer {
    pub fn new(executor: Arc<dyn ExplainExecutor>, config: AnalyzerConfig) -> Self {
        let volume = VolumeEstimator::new(executor, config.explain_timeout, config.default_catalog.clone());
        Self { volume, config }
    }

    /// Normalize, fingerprint and analyze a raw statement
    pub async fn analyze(&self, raw_query: &str) -> Result<QueryAnalysis> {
        let query = NormalizedQuery::new(raw_query)?;
        self.analyze_normalized(&query).await
    }

    /// Analyze an already normalized statement
    pub async fn analyze_normalized(&self, query: &NormalizedQuery) -> Result<QueryAnalysis> {
        let normalized = query.normalized_text.as_str();
        let tables = complexity::extract_tables(&query.raw_text, normalized);

        if is_metadata_query(normalized) {
            debug!("Metadata query {}", short_fingerprint(&query.fingerprint));
            return Ok(QueryAnalysis {
                fingerprint: query.fingerprint.clone(),
                tables,
                is_metadata_query: true,
                volume_source: VolumeSource::Skipped,
                ..Default::default()
            });
        }

        let signals = complexity::extract_signals(normalized, &self.config.partition_columns);
        let mut analysis = QueryAnalysis {
            fingerprint: query.fingerprint.clone(),
            tables,
            joins: signals.joins,
            has_aggregation: signals.has_aggregation,
            subqueries: signals.subqueries,
            has_partition_filter: signals.has_partition_filter,
            has_non_partition_filter: signals.has_non_partition_filter,
            volume_source: VolumeSource::NoTables,
            ..Default::default()
        };

        if analysis.tables.is_empty() {
            return Ok(analysis);
        }

        let qualified = complexity::qualify_with_catalog(&query.raw_text, &self.config.default_catalog);
        let estimate = self.volume.estimate(&qualified).await?;

        analysis.volume_source = estimate.source;
        if estimate.source == VolumeSource::Unavailable {
            let reason = estimate.degraded_reason.unwrap_or("explain_failed");
            warn!(
                "Analysis degraded for {} ({}), using neutral volume",
                short_fingerprint(&query.fingerprint),
                reason
            );
            metrics::record_analysis_degraded(reason);
            return Ok(analysis);
        }

        analysis.data_size_gb = estimate.data_size_gb();
        analysis.record_count = estimate.record_count();
        analysis.file_count = estimate.file_count();
        analysis.tables = estimate.tables.into_iter().map(|t| t.name).collect();
        debug!(
            "Analyzed {}: {:.3} GB, {} rows, {} files across {} tables",
            short_fingerprint(&query.fingerprint),
            analysis.data_size_gb,
            analysis.record_count,
            analysis.file_count,
            analysis.tables.len()
        );
        Ok(analysis)
    }
}
