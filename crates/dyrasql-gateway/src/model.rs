//! Routing data model shared by the analyzer, decision engine and history manager

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::cluster::ClusterTier;

/// Structured analysis of one statement.
///
/// Derived once per uncached fingerprint and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub fingerprint: String,
    /// Tables referenced by the statement (catalog-qualified when known)
    pub tables: Vec<String>,
    /// Estimated bytes read, in GiB
    pub data_size_gb: f64,
    pub record_count: u64,
    pub file_count: u64,
    pub joins: u32,
    pub has_aggregation: bool,
    pub subqueries: u32,
    pub has_partition_filter: bool,
    pub has_non_partition_filter: bool,
    /// Catalog/introspection statement routed without scoring
    pub is_metadata_query: bool,
    /// Where the volume numbers came from
    pub volume_source: VolumeSource,
}

impl QueryAnalysis {
    /// Every explain strategy failed and volume numbers are unknown
    pub fn is_degraded(&self) -> bool {
        self.volume_source == VolumeSource::Unavailable
    }
}

/// Origin of the volume estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeSource {
    /// EXPLAIN (TYPE IO)
    ExplainIo,
    /// EXPLAIN (TYPE DISTRIBUTED) text plan
    ExplainDistributed,
    /// Statement references no tables, nothing to estimate
    NoTables,
    /// Statement was never explained (metadata fast path)
    #[default]
    Skipped,
    /// Explain chain exhausted ("analysis-degraded")
    Unavailable,
}

/// The three normalized routing inputs, each in [0, 1]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingFactors {
    pub volume: f64,
    pub complexity: f64,
    pub historical: f64,
}

/// A routing decision as stored in the decision cache.
///
/// Cache writes always replace the whole entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub fingerprint: String,
    pub cluster_id: String,
    pub tier: ClusterTier,
    pub score: f64,
    pub factors: RoutingFactors,
    pub created_at: DateTime<Utc>,
    pub ttl_expiry: DateTime<Utc>,
    /// Set on the read path only; never persisted as true
    #[serde(default)]
    pub cached: bool,
    /// Explain chain was exhausted when this decision was computed
    #[serde(default)]
    pub analysis_degraded: bool,
}

impl RoutingDecision {
    /// Build a fresh (uncached) decision valid for `ttl`
    pub fn new(
        fingerprint: impl Into<String>,
        cluster_id: impl Into<String>,
        tier: ClusterTier,
        score: f64,
        factors: RoutingFactors,
        ttl: std::time::Duration,
    ) -> Self {
        let created_at = Utc::now();
        let ttl = Duration::from_std(ttl).unwrap_or_else(|_| Duration::hours(24));
        Self {
            fingerprint: fingerprint.into(),
            cluster_id: cluster_id.into(),
            tier,
            score,
            factors,
            created_at,
            ttl_expiry: created_at + ttl,
            cached: false,
            analysis_degraded: false,
        }
    }

    /// Whether the entry is past its TTL at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.ttl_expiry
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// One post-execution measurement. Appended, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetric {
    pub fingerprint: String,
    /// Wall-clock execution time in seconds
    pub execution_time: f64,
    #[serde(default)]
    pub bytes_processed: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl ExecutionMetric {
    pub fn new(fingerprint: impl Into<String>, execution_time: f64, success: bool) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            execution_time,
            bytes_processed: 0,
            success,
            error_message: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_bytes(mut self, bytes: u64) -> Self {
        self.bytes_processed = bytes;
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

/// Truncated fingerprint for log lines
pub fn short_fingerprint(fingerprint: &str) -> &str {
    fingerprint
        .char_indices()
        .nth(16)
        .map_or(fingerprint, |(end, _)| &fingerprint[..end])
}

/// Whether `value` has the shape of a statement fingerprint (64 hex characters)
pub fn is_fingerprint(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_fingerprint_respects_char_boundaries() {
        let hex = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";
        assert_eq!(short_fingerprint(hex), "0123456789abcdef");
        assert_eq!(short_fingerprint("abc"), "abc");
        assert_eq!(short_fingerprint("aaaaaaaaaaaaaaaé-rest"), "aaaaaaaaaaaaaaaé");
        assert_eq!(short_fingerprint("ééééééééééééééééé"), "éééééééééééééééé");
    }

    #[test]
    fn test_is_fingerprint() {
        assert!(is_fingerprint(&"a1".repeat(32)));
        assert!(!is_fingerprint("abc"));
        assert!(!is_fingerprint(&format!("{}é", "a".repeat(62))));
        assert!(!is_fingerprint(&"g".repeat(64)));
    }

    #[test]
    fn test_decision_expiry() {
        let d = RoutingDecision::new(
            "abc",
            "ecs",
            ClusterTier::Light,
            0.1,
            RoutingFactors::default(),
            std::time::Duration::from_secs(60),
        );
        assert!(!d.is_expired());
        assert!(d.is_expired_at(d.created_at + Duration::seconds(60)));
        assert!(!d.cached);
    }

    #[test]
    fn test_decision_json_round_trip_keeps_cached_false() {
        let d = RoutingDecision::new(
            "abc",
            "emr-standard",
            ClusterTier::Medium,
            0.42,
            RoutingFactors {
                volume: 0.5,
                complexity: 0.2,
                historical: 0.5,
            },
            std::time::Duration::from_secs(3600),
        );
        let json = serde_json::to_string(&d).unwrap();
        let back: RoutingDecision = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn test_short_fingerprint() {
        assert_eq!(short_fingerprint("0123456789abcdef0123"), "0123456789abcdef");
        assert_eq!(short_fingerprint("abc"), "abc");
    }

    #[test]
    fn test_degraded_flag() {
        let analysis = QueryAnalysis {
            volume_source: VolumeSource::Unavailable,
            ..Default::default()
        };
        assert!(analysis.is_degraded());
        assert!(!QueryAnalysis::default().is_degraded());
    }
}
