//! Decision Engine - routing score and cluster selection
//!
//! Pure functions, no I/O and no shared state:
//!
//! | Score                          | Tier   |
//! |--------------------------------|--------|
//! | `< light_threshold`            | light  |
//! | `<= medium_threshold`          | medium |
//! | `> medium_threshold`           | heavy  |
//!
//! `S = w1·fv + w2·fc + w3·fh`, clamped to `[0, 1]`.

use dyrasql_common::config::ensure_unit_interval;
use dyrasql_common::{DyraError, Result};
use serde::{Deserialize, Serialize};

use crate::cluster::ClusterTier;
use crate::model::{ExecutionMetric, QueryAnalysis, RoutingFactors, VolumeSource};

/// Only this many of the most recent executions feed the historical factor
pub const HISTORY_WINDOW: usize = 10;

/// Factor used when nothing is known
pub const NEUTRAL_FACTOR: f64 = 0.5;

const WEIGHT_SUM_TOLERANCE: f64 = 0.1;

/// Score weights for the three factors
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoutingWeights {
    pub volume: f64,
    pub complexity: f64,
    pub historical: f64,
}

impl Default for RoutingWeights {
    fn default() -> Self {
        Self {
            volume: 0.5,
            complexity: 0.3,
            historical: 0.2,
        }
    }
}

impl RoutingWeights {
    /// Each weight in [0, 1] and the sum within 1 ± 0.1
    pub fn validate(&self) -> Result<()> {
        ensure_unit_interval("weight_volume", self.volume)?;
        ensure_unit_interval("weight_complexity", self.complexity)?;
        ensure_unit_interval("weight_historical", self.historical)?;
        let sum = self.volume + self.complexity + self.historical;
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(DyraError::Config(format!(
                "routing weights must sum to approximately 1.0, got {:.3}",
                sum
            )));
        }
        Ok(())
    }
}

/// Cluster-selection thresholds.
///
/// Only constructible through [`TierThresholds::new`], so `light < medium`
/// always holds for a value in hand.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TierThresholds {
    light: f64,
    medium: f64,
}

impl TierThresholds {
    pub fn new(light: f64, medium: f64) -> Result<Self> {
        ensure_unit_interval("ecs_threshold", light)?;
        ensure_unit_interval("emr_standard_threshold", medium)?;
        if light >= medium {
            return Err(DyraError::Config(format!(
                "ecs_threshold ({}) must be lower than emr_standard_threshold ({})",
                light, medium
            )));
        }
        Ok(Self { light, medium })
    }

    pub fn light(&self) -> f64 {
        self.light
    }

    pub fn medium(&self) -> f64 {
        self.medium
    }
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            light: 0.3,
            medium: 0.5,
        }
    }
}

/// Clamp to [0, 1]; NaN collapses to 0
fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// `0.7·min(size_gb/100, 1) + 0.3·min(file_count/1000, 1)`
pub fn volume_factor(size_gb: f64, file_count: u64) -> f64 {
    let size = clamp_unit(size_gb / 100.0);
    let files = clamp_unit(file_count as f64 / 1000.0);
    clamp_unit(0.7 * size + 0.3 * files)
}

/// Static complexity from the extracted structure signals
pub fn complexity_factor(
    joins: u32,
    has_aggregation: bool,
    subqueries: u32,
    has_partition_filter: bool,
    has_non_partition_filter: bool,
) -> f64 {
    let mut total = (joins as f64 * 0.1).min(0.3);
    if has_aggregation {
        total += 0.2;
    }
    total += (subqueries as f64 * 0.1).min(0.3);
    if has_partition_filter {
        total -= 0.1;
    }
    if has_non_partition_filter {
        total += 0.1;
    }
    clamp_unit(total)
}

/// Banded factor from recent executions, most recent first.
///
/// Deliberately a step function:
/// success rate < 0.8 → 0.7, else avg > 60s → 0.6, else avg < 5s → 0.3, else 0.5.
pub fn historical_factor(history: &[ExecutionMetric]) -> f64 {
    let recent = &history[..history.len().min(HISTORY_WINDOW)];
    if recent.is_empty() {
        return NEUTRAL_FACTOR;
    }

    let n = recent.len() as f64;
    let successes = recent.iter().filter(|m| m.success).count() as f64;
    let success_rate = successes / n;
    let avg_execution_time = recent.iter().map(|m| m.execution_time).sum::<f64>() / n;

    if success_rate < 0.8 {
        0.7
    } else if avg_execution_time > 60.0 {
        0.6
    } else if avg_execution_time < 5.0 {
        0.3
    } else {
        NEUTRAL_FACTOR
    }
}

/// Weighted score clamped to [0, 1]
pub fn score(factors: &RoutingFactors, weights: &RoutingWeights) -> f64 {
    clamp_unit(
        weights.volume * factors.volume
            + weights.complexity * factors.complexity
            + weights.historical * factors.historical,
    )
}

/// Map a score to a tier. Metadata queries always go to the lightest tier.
pub fn select_cluster(score: f64, is_metadata_query: bool, thresholds: &TierThresholds) -> ClusterTier {
    if is_metadata_query {
        return ClusterTier::Light;
    }
    if score < thresholds.light {
        ClusterTier::Light
    } else if score <= thresholds.medium {
        ClusterTier::Medium
    } else {
        ClusterTier::Heavy
    }
}

/// Output of one scoring pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scored {
    pub factors: RoutingFactors,
    pub score: f64,
    pub tier: ClusterTier,
}

/// Weights and thresholds bundled, validated once at startup
#[derive(Debug, Clone, Default)]
pub struct DecisionEngine {
    weights: RoutingWeights,
    thresholds: TierThresholds,
}

impl DecisionEngine {
    pub fn new(weights: RoutingWeights, thresholds: TierThresholds) -> Result<Self> {
        weights.validate()?;
        Ok(Self {
            weights,
            thresholds,
        })
    }

    /// Score an analysis against its execution history
    pub fn decide(&self, analysis: &QueryAnalysis, history: &[ExecutionMetric]) -> Scored {
        if analysis.is_metadata_query {
            return Scored {
                factors: RoutingFactors::default(),
                score: 0.0,
                tier: ClusterTier::Light,
            };
        }

        let volume = match analysis.volume_source {
            VolumeSource::Unavailable => NEUTRAL_FACTOR,
            VolumeSource::NoTables | VolumeSource::Skipped => 0.0,
            VolumeSource::ExplainIo | VolumeSource::ExplainDistributed => {
                volume_factor(analysis.data_size_gb, analysis.file_count)
            }
        };
        let complexity = complexity_factor(
            analysis.joins,
            analysis.has_aggregation,
            analysis.subqueries,
            analysis.has_partition_filter,
            analysis.has_non_partition_filter,
        );
        let factors = RoutingFactors {
            volume,
            complexity,
            historical: historical_factor(history),
        };
        let score = score(&factors, &self.weights);
        Scored {
            factors,
            score,
            tier: select_cluster(score, false, &self.thresholds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn metric(secs: f64, success: bool) -> ExecutionMetric {
        ExecutionMetric::new("fp", secs, success)
    }

    #[test]
    fn test_volume_factor() {
        assert_eq!(volume_factor(0.0, 0), 0.0);
        assert!((volume_factor(50.0, 500) - (0.35 + 0.15)).abs() < 1e-9);
        assert_eq!(volume_factor(1_000.0, 1_000_000), 1.0);
    }

    #[test]
    fn test_complexity_factor_caps_and_clamps() {
        assert_eq!(complexity_factor(0, false, 0, false, false), 0.0);
        // joins and subqueries each cap at 0.3
        assert!((complexity_factor(10, true, 10, false, true) - 0.9).abs() < 1e-9);
        // partition filter alone cannot go negative
        assert_eq!(complexity_factor(0, false, 0, true, false), 0.0);
        assert!((complexity_factor(2, true, 1, true, false) - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_historical_bands() {
        assert_eq!(historical_factor(&[]), 0.5);
        let failing: Vec<_> = (0..5).map(|i| metric(1.0, i < 3)).collect();
        assert_eq!(historical_factor(&failing), 0.7);
        assert_eq!(historical_factor(&[metric(61.0, true), metric(70.0, true)]), 0.6);
        assert_eq!(historical_factor(&[metric(1.0, true), metric(2.0, true)]), 0.3);
        assert_eq!(historical_factor(&[metric(5.0, true), metric(60.0, true)]), 0.5);
    }

    #[test]
    fn test_historical_uses_only_recent_window() {
        // ten fast successes, then older failures that must be ignored
        let mut history: Vec<_> = (0..10).map(|_| metric(1.0, true)).collect();
        history.extend((0..20).map(|_| metric(100.0, false)));
        assert_eq!(historical_factor(&history), 0.3);
    }

    #[test]
    fn test_scenario_b_heavy() {
        let weights = RoutingWeights {
            volume: 0.7,
            complexity: 0.2,
            historical: 0.1,
        };
        let factors = RoutingFactors {
            volume: 0.8,
            complexity: 0.6,
            historical: 0.5,
        };
        let s = score(&factors, &weights);
        assert!((s - 0.73).abs() < 1e-9);
        let thresholds = TierThresholds::new(0.3, 0.5).unwrap();
        assert_eq!(select_cluster(s, false, &thresholds), ClusterTier::Heavy);
    }

    #[test]
    fn test_select_cluster_boundaries() {
        let t = TierThresholds::default();
        assert_eq!(select_cluster(0.29, false, &t), ClusterTier::Light);
        assert_eq!(select_cluster(0.3, false, &t), ClusterTier::Medium);
        assert_eq!(select_cluster(0.5, false, &t), ClusterTier::Medium);
        assert_eq!(select_cluster(0.51, false, &t), ClusterTier::Heavy);
        assert_eq!(select_cluster(0.99, true, &t), ClusterTier::Light);
    }

    #[test]
    fn test_thresholds_must_be_ordered() {
        assert!(TierThresholds::new(0.5, 0.5).is_err());
        assert!(TierThresholds::new(0.7, 0.3).is_err());
        assert!(TierThresholds::new(-0.1, 0.3).is_err());
        assert!(TierThresholds::new(0.3, 0.7).is_ok());
    }

    #[test]
    fn test_weight_validation() {
        assert!(RoutingWeights::default().validate().is_ok());
        let bad = RoutingWeights {
            volume: 0.9,
            complexity: 0.9,
            historical: 0.9,
        };
        assert!(bad.validate().is_err());
        let near = RoutingWeights {
            volume: 0.5,
            complexity: 0.3,
            historical: 0.25,
        };
        assert!(near.validate().is_ok());
    }

    #[test]
    fn test_degraded_analysis_uses_neutral_volume() {
        let engine = DecisionEngine::default();
        let analysis = QueryAnalysis {
            volume_source: VolumeSource::Unavailable,
            data_size_gb: 900.0,
            file_count: 50_000,
            ..Default::default()
        };
        let scored = engine.decide(&analysis, &[]);
        assert_eq!(scored.factors.volume, 0.5);
        assert_eq!(scored.factors.historical, 0.5);
    }

    #[test]
    fn test_metadata_analysis_is_light() {
        let engine = DecisionEngine::default();
        let analysis = QueryAnalysis {
            is_metadata_query: true,
            joins: 5,
            ..Default::default()
        };
        let scored = engine.decide(&analysis, &[metric(500.0, false)]);
        assert_eq!(scored.tier, ClusterTier::Light);
        assert_eq!(scored.score, 0.0);
    }

    proptest! {
        #[test]
        fn prop_score_in_unit_interval(
            fv in 0.0f64..=1.0, fc in 0.0f64..=1.0, fh in 0.0f64..=1.0,
            w1 in 0.0f64..=1.0, w2 in 0.0f64..=1.0, w3 in 0.0f64..=1.0,
        ) {
            let s = score(
                &RoutingFactors { volume: fv, complexity: fc, historical: fh },
                &RoutingWeights { volume: w1, complexity: w2, historical: w3 },
            );
            prop_assert!((0.0..=1.0).contains(&s));
        }

        #[test]
        fn prop_select_cluster_monotonic(a in 0.0f64..=1.0, b in 0.0f64..=1.0, l in 0.0f64..0.5, gap in 0.01f64..0.5) {
            let t = TierThresholds::new(l, l + gap).unwrap();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(select_cluster(lo, false, &t) <= select_cluster(hi, false, &t));
        }

        #[test]
        fn prop_factors_in_unit_interval(size in 0.0f64..1e6, files in 0u64..10_000_000, joins in 0u32..100, subs in 0u32..100,
            agg: bool, part: bool, nonpart: bool) {
            prop_assert!((0.0..=1.0).contains(&volume_factor(size, files)));
            prop_assert!((0.0..=1.0).contains(&complexity_factor(joins, agg, subs, part, nonpart)));
        }
    }
}
