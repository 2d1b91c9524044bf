//! Prometheus Metrics for the DyraSQL gateway
//!
//! Exports metrics for:
//! - Routing decisions and scores
//! - Decision cache and history store access
//! - Query analysis (explain outcomes, degradations)
//! - Proxied backend traffic and sessions

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram, register_histogram_vec, register_int_gauge,
    CounterVec, Encoder, Histogram, HistogramVec, IntGauge, TextEncoder,
};
use tracing::error;

// ═══════════════════════════════════════════════════════════════════════════
// ROUTING METRICS
// ═══════════════════════════════════════════════════════════════════════════

/// Routing decisions by cluster and decision source
pub static ROUTING_DECISIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "dyrasql_routing_decisions_total",
        "Total routing decisions by cluster and source",
        &["cluster", "source"]
    )
    .expect("metric can be registered")
});

/// Distribution of routing scores
pub static ROUTING_SCORE: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "dyrasql_routing_score",
        "Routing score of computed decisions",
        vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0]
    )
    .expect("metric can be registered")
});

/// Decision cache lookups by result (hit, miss, error)
pub static CACHE_ACCESS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "dyrasql_cache_access_total",
        "Decision cache lookups by result",
        &["result"]
    )
    .expect("metric can be registered")
});

// ═══════════════════════════════════════════════════════════════════════════
// ANALYSIS METRICS
// ═══════════════════════════════════════════════════════════════════════════

/// Explain requests by type and outcome
pub static EXPLAIN_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "dyrasql_explain_total",
        "Explain requests by type and outcome",
        &["type", "outcome"]
    )
    .expect("metric can be registered")
});

/// Analyses that fell back to a neutral volume factor
pub static ANALYSIS_DEGRADED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "dyrasql_analysis_degraded_total",
        "Analyses without volume estimate by reason",
        &["reason"]
    )
    .expect("metric can be registered")
});

// ═══════════════════════════════════════════════════════════════════════════
// PROXY METRICS
// ═══════════════════════════════════════════════════════════════════════════

/// Backend request latency by cluster and status
pub static BACKEND_REQUEST_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "dyrasql_backend_request_seconds",
        "Latency of requests forwarded to execution clusters",
        &["cluster", "status"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]
    )
    .expect("metric can be registered")
});

/// Sessions currently tracked for follow-up affinity
pub static ACTIVE_SESSIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "dyrasql_active_sessions",
        "Query sessions tracked for follow-up routing"
    )
    .expect("metric can be registered")
});

/// Responses returned to clients by delivery mode (buffered, streamed)
pub static RESPONSES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "dyrasql_responses_total",
        "Proxied responses by delivery mode",
        &["mode"]
    )
    .expect("metric can be registered")
});

/// Execution metrics recorded by channel (side_channel, in_band) and result
pub static EXECUTION_METRICS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "dyrasql_execution_metrics_total",
        "Execution metrics recorded by channel and result",
        &["channel", "result"]
    )
    .expect("metric can be registered")
});

/// Register all metrics up front so they show on the first scrape
pub fn init_metrics() {
    Lazy::force(&ROUTING_DECISIONS_TOTAL);
    Lazy::force(&ROUTING_SCORE);
    Lazy::force(&CACHE_ACCESS_TOTAL);
    Lazy::force(&EXPLAIN_TOTAL);
    Lazy::force(&ANALYSIS_DEGRADED_TOTAL);
    Lazy::force(&BACKEND_REQUEST_SECONDS);
    Lazy::force(&ACTIVE_SESSIONS);
    Lazy::force(&RESPONSES_TOTAL);
    Lazy::force(&EXECUTION_METRICS_TOTAL);
}

/// Encode the default registry in the text exposition format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

pub fn record_routing_decision(cluster: &str, source: &str, score: f64) {
    ROUTING_DECISIONS_TOTAL
        .with_label_values(&[cluster, source])
        .inc();
    if source == "computed" {
        ROUTING_SCORE.observe(score);
    }
}

pub fn record_cache_access(result: &str) {
    CACHE_ACCESS_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_explain(explain_type: &str, outcome: &str) {
    EXPLAIN_TOTAL.with_label_values(&[explain_type, outcome]).inc();
}

pub fn record_analysis_degraded(reason: &str) {
    ANALYSIS_DEGRADED_TOTAL.with_label_values(&[reason]).inc();
}

pub fn record_backend_request(cluster: &str, status: &str, duration_secs: f64) {
    BACKEND_REQUEST_SECONDS
        .with_label_values(&[cluster, status])
        .observe(duration_secs);
}

pub fn set_active_sessions(count: usize) {
    ACTIVE_SESSIONS.set(count as i64);
}

pub fn record_response(mode: &str) {
    RESPONSES_TOTAL.with_label_values(&[mode]).inc();
}

pub fn record_execution_metric(channel: &str, result: &str) {
    EXECUTION_METRICS_TOTAL
        .with_label_values(&[channel, result])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_recorded_series() {
        init_metrics();
        record_routing_decision("ecs", "computed", 0.12);
        record_explain("io", "ok");
        let text = encode_metrics();
        assert!(text.contains("dyrasql_routing_decisions_total"));
        assert!(text.contains("dyrasql_explain_total"));
    }
}
