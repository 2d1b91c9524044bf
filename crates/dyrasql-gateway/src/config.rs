//! Gateway configuration
//!
//! Command-line flags with environment fallbacks, validated once into a
//! [`GatewayConfig`]. Anything out of range aborts startup.

use clap::{ArgAction, Parser};
use dyrasql_common::config::{ensure_non_empty, ensure_positive, parse_list};
use dyrasql_common::Result;
use std::time::Duration;

use crate::analyzer::AnalyzerConfig;
use crate::cluster::{ClusterProfile, ClusterRegistry, ClusterTier};
use crate::decision_engine::{RoutingWeights, TierThresholds};
use crate::proxy::{ProxyMode, ProxySettings};

#[derive(Parser, Debug, Clone)]
#[command(name = "dyrasql-gateway")]
#[command(about = "DyraSQL - score-based SQL routing in front of Trino clusters")]
pub struct Args {
    /// HTTP listen port
    #[arg(long, env = "HTTP_PORT", default_value = "8080")]
    pub http_port: u16,

    /// URL clients use to reach this router (proxy-mode URI rewriting)
    #[arg(long, env = "DYRASQL_PUBLIC_URL", default_value = "http://localhost:8080")]
    pub public_url: String,

    #[arg(long, env = "DYRASQL_WEIGHT_VOLUME", default_value = "0.5")]
    pub weight_volume: f64,

    #[arg(long, env = "DYRASQL_WEIGHT_COMPLEXITY", default_value = "0.3")]
    pub weight_complexity: f64,

    #[arg(long, env = "DYRASQL_WEIGHT_HISTORICAL", default_value = "0.2")]
    pub weight_historical: f64,

    /// Scores below this go to the light cluster
    #[arg(long, env = "DYRASQL_ECS_THRESHOLD", default_value = "0.3")]
    pub ecs_threshold: f64,

    /// Scores at or below this (and at or above the light threshold) go to the medium cluster
    #[arg(long, env = "DYRASQL_EMR_STANDARD_THRESHOLD", default_value = "0.5")]
    pub emr_standard_threshold: f64,

    /// Lifetime of cached routing decisions
    #[arg(long, env = "DYRASQL_DECISION_TTL_SECS", default_value = "86400")]
    pub decision_ttl_secs: u64,

    /// Responses at or above this many bytes are streamed
    #[arg(long, env = "STREAMING_THRESHOLD", default_value = "65536")]
    pub streaming_threshold: u64,

    /// Bypass mode: follow-up URIs point straight at the cluster
    #[arg(long, env = "BYPASS_MODE", default_value_t = true, action = ArgAction::Set)]
    pub bypass_mode: bool,

    #[arg(long, env = "DYRASQL_SESSION_IDLE_SECS", default_value = "900")]
    pub session_idle_secs: u64,

    #[arg(long, env = "DYRASQL_EXPLAIN_TIMEOUT_SECS", default_value = "30")]
    pub explain_timeout_secs: u64,

    /// Timeout for every decision cache / history store call
    #[arg(long, env = "DYRASQL_CACHE_TIMEOUT_MS", default_value = "500")]
    pub cache_timeout_ms: u64,

    /// Timeout for statements and follow-ups forwarded to a cluster
    #[arg(long, env = "DATA_TIMEOUT", default_value = "300")]
    pub data_timeout_secs: u64,

    #[arg(long, env = "DYRASQL_KEEPALIVE_TIMEOUT_SECS", default_value = "5")]
    pub keepalive_timeout_secs: u64,

    /// Header carrying the caller identity
    #[arg(long, env = "DYRASQL_IDENTITY_HEADER", default_value = "X-Trino-User")]
    pub identity_header: String,

    /// Columns whose predicates count as partition filters
    #[arg(
        long,
        env = "DYRASQL_PARTITION_COLUMNS",
        default_value = "date,dt,data,timestamp,year,month,day"
    )]
    pub partition_columns: String,

    /// Catalog prefixed to two-part table names before EXPLAIN
    #[arg(long, env = "DYRASQL_DEFAULT_CATALOG", default_value = "iceberg")]
    pub default_catalog: String,

    /// User submitting EXPLAIN statements
    #[arg(long, env = "TRINO_USER", default_value = "admin")]
    pub explain_user: String,

    /// Redis URL for the decision cache and history; in-process store when unset
    #[arg(long, env = "DYRASQL_REDIS_URL")]
    pub redis_url: Option<String>,

    #[arg(long, env = "TRINO_ECS_URL", default_value = "http://trino-ecs:8080")]
    pub ecs_url: String,

    #[arg(long, env = "TRINO_ECS_EXTERNAL_URL", default_value = "http://localhost:8081")]
    pub ecs_external_url: String,

    #[arg(long, env = "TRINO_EMR_STANDARD_URL", default_value = "http://trino-emr-standard:8080")]
    pub emr_standard_url: String,

    #[arg(long, env = "TRINO_EMR_STANDARD_EXTERNAL_URL", default_value = "http://localhost:8082")]
    pub emr_standard_external_url: String,

    #[arg(long, env = "TRINO_EMR_OPTIMIZED_URL", default_value = "http://trino-emr-optimized:8080")]
    pub emr_optimized_url: String,

    #[arg(long, env = "TRINO_EMR_OPTIMIZED_EXTERNAL_URL", default_value = "http://localhost:8083")]
    pub emr_optimized_external_url: String,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit JSON log lines
    #[arg(long, env = "JSON_LOGS", default_value_t = false, action = ArgAction::Set)]
    pub json_logs: bool,
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub http_port: u16,
    pub weights: RoutingWeights,
    pub thresholds: TierThresholds,
    pub decision_ttl: Duration,
    pub cache_timeout: Duration,
    pub session_idle: Duration,
    pub analyzer: AnalyzerConfig,
    pub explain_user: String,
    pub redis_url: Option<String>,
    pub clusters: ClusterRegistry,
    pub proxy: ProxySettings,
    pub log_level: String,
    pub json_logs: bool,
}

impl Args {
    /// Validate every option and build the runtime configuration
    pub fn into_config(self) -> Result<GatewayConfig> {
        let weights = RoutingWeights {
            volume: self.weight_volume,
            complexity: self.weight_complexity,
            historical: self.weight_historical,
        };
        weights.validate()?;
        let thresholds = TierThresholds::new(self.ecs_threshold, self.emr_standard_threshold)?;

        for (name, value) in [
            ("decision_ttl_secs", self.decision_ttl_secs),
            ("streaming_threshold", self.streaming_threshold),
            ("session_idle_secs", self.session_idle_secs),
            ("explain_timeout_secs", self.explain_timeout_secs),
            ("cache_timeout_ms", self.cache_timeout_ms),
            ("data_timeout", self.data_timeout_secs),
            ("keepalive_timeout_secs", self.keepalive_timeout_secs),
        ] {
            ensure_positive(name, value)?;
        }
        for (name, value) in [
            ("public_url", self.public_url.as_str()),
            ("identity_header", self.identity_header.as_str()),
            ("default_catalog", self.default_catalog.as_str()),
            ("explain_user", self.explain_user.as_str()),
            ("ecs_url", self.ecs_url.as_str()),
            ("ecs_external_url", self.ecs_external_url.as_str()),
            ("emr_standard_url", self.emr_standard_url.as_str()),
            ("emr_standard_external_url", self.emr_standard_external_url.as_str()),
            ("emr_optimized_url", self.emr_optimized_url.as_str()),
            ("emr_optimized_external_url", self.emr_optimized_external_url.as_str()),
        ] {
            ensure_non_empty(name, value)?;
        }
        if axum::http::HeaderName::from_bytes(self.identity_header.as_bytes()).is_err() {
            return Err(dyrasql_common::DyraError::Config(format!(
                "identity_header {:?} is not a valid header name",
                self.identity_header
            )));
        }

        let clusters = ClusterRegistry::new(
            ClusterProfile::new("ecs", self.ecs_url, self.ecs_external_url, ClusterTier::Light),
            ClusterProfile::new(
                "emr-standard",
                self.emr_standard_url,
                self.emr_standard_external_url,
                ClusterTier::Medium,
            ),
            ClusterProfile::new(
                "emr-optimized",
                self.emr_optimized_url,
                self.emr_optimized_external_url,
                ClusterTier::Heavy,
            ),
        )?;

        let data_timeout = Duration::from_secs(self.data_timeout_secs);
        Ok(GatewayConfig {
            http_port: self.http_port,
            weights,
            thresholds,
            decision_ttl: Duration::from_secs(self.decision_ttl_secs),
            cache_timeout: Duration::from_millis(self.cache_timeout_ms),
            session_idle: Duration::from_secs(self.session_idle_secs),
            analyzer: AnalyzerConfig {
                partition_columns: parse_list(&self.partition_columns),
                default_catalog: self.default_catalog.trim().to_lowercase(),
                explain_timeout: Duration::from_secs(self.explain_timeout_secs),
            },
            explain_user: self.explain_user,
            redis_url: self.redis_url.filter(|url| !url.trim().is_empty()),
            clusters,
            proxy: ProxySettings {
                mode: if self.bypass_mode {
                    ProxyMode::Bypass
                } else {
                    ProxyMode::Proxy
                },
                public_url: self.public_url.trim_end_matches('/').to_string(),
                streaming_threshold: self.streaming_threshold as usize,
                identity_header: self.identity_header,
                keepalive_timeout: Duration::from_secs(self.keepalive_timeout_secs),
                data_timeout,
            },
            log_level: self.log_level,
            json_logs: self.json_logs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dyrasql_common::DyraError;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["dyrasql-gateway"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = args(&[]).into_config().unwrap();
        assert_eq!(config.thresholds, TierThresholds::default());
        assert_eq!(config.weights, RoutingWeights::default());
        assert_eq!(config.decision_ttl, Duration::from_secs(86_400));
        assert_eq!(config.clusters.lightest().id, "ecs");
        assert_eq!(config.analyzer.partition_columns.len(), 7);
    }

    #[test]
    fn test_proxy_mode_flag() {
        let config = args(&["--bypass-mode", "false", "--public-url", "http://router:9000/"])
            .into_config()
            .unwrap();
        assert_eq!(config.proxy.mode, ProxyMode::Proxy);
        assert_eq!(config.proxy.public_url, "http://router:9000");
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let err = args(&["--ecs-threshold", "0.6", "--emr-standard-threshold", "0.5"])
            .into_config()
            .unwrap_err();
        assert!(matches!(err, DyraError::Config(_)));
    }

    #[test]
    fn test_weight_sum_rejected() {
        let err = args(&["--weight-volume", "0.9", "--weight-complexity", "0.9"])
            .into_config()
            .unwrap_err();
        assert!(err.to_string().contains("sum"));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = args(&["--cache-timeout-ms", "0"]).into_config().unwrap_err();
        assert!(err.to_string().contains("cache_timeout_ms"));
    }
}
