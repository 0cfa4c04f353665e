//! Composite module health scoring.
//!
//! # Scoring Formula
//!
//! ```text
//! goodness(v) = 1 - clamp((v - good) / (poor - good), 0, 1)     (v known, v >= 0)
//!             = 0                                              (v missing or negative)
//!
//! score = round(100 × Σ wᵢ·goodnessᵢ / Σ wᵢ), clamped to [0, 100]
//! ```
//!
//! A value at or below `good` contributes its full weight; a value at or
//! above `poor` contributes nothing. Missing data never aborts scoring.

use serde::{Deserialize, Serialize};

use crate::domain::{HealingError, HealingResult, RawMetrics};

/// Reference range and weight for one metric dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricRange {
    /// Value at or below which the dimension is fully healthy.
    pub good: f64,
    /// Value at or above which the dimension contributes nothing.
    pub poor: f64,
    /// Relative weight in the composite.
    pub weight: f64,
}

impl MetricRange {
    pub const fn new(good: f64, poor: f64, weight: f64) -> Self {
        Self { good, poor, weight }
    }

    /// Normalized goodness in `[0, 1]`.
    pub fn goodness(&self, value: Option<i64>) -> f64 {
        match value {
            Some(v) if v >= 0 => {
                let span = self.poor - self.good;
                let badness = ((v as f64 - self.good) / span).clamp(0.0, 1.0);
                1.0 - badness
            }
            _ => 0.0,
        }
    }
}

/// Per-dimension scoring configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub complexity: MetricRange,
    pub size: MetricRange,
    pub lint_issues: MetricRange,
    pub type_issues: MetricRange,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            complexity: MetricRange::new(5.0, 60.0, 0.35),
            size: MetricRange::new(100.0, 1500.0, 0.20),
            lint_issues: MetricRange::new(0.0, 50.0, 0.25),
            type_issues: MetricRange::new(0.0, 20.0, 0.20),
        }
    }
}

impl ScoringConfig {
    fn ranges(&self) -> [(&'static str, &MetricRange); 4] {
        [
            ("complexity", &self.complexity),
            ("size", &self.size),
            ("lint_issues", &self.lint_issues),
            ("type_issues", &self.type_issues),
        ]
    }

    pub fn validate(&self) -> HealingResult<()> {
        let mut total_weight = 0.0;
        for (name, range) in self.ranges() {
            if !(range.good.is_finite() && range.poor.is_finite() && range.poor > range.good) {
                return Err(HealingError::Config(format!(
                    "scoring.{name}: poor ({}) must be greater than good ({})",
                    range.poor, range.good
                )));
            }
            if !range.weight.is_finite() || range.weight < 0.0 {
                return Err(HealingError::Config(format!(
                    "scoring.{name}: weight must be a non-negative number"
                )));
            }
            total_weight += range.weight;
        }
        if total_weight <= 0.0 {
            return Err(HealingError::Config(
                "scoring: at least one weight must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-dimension contribution, for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub score: u8,
    pub complexity: f64,
    pub size: f64,
    pub lint_issues: f64,
    pub type_issues: f64,
}

/// Pure scorer over [`RawMetrics`].
#[derive(Debug, Clone, Default)]
pub struct HealthScorer {
    config: ScoringConfig,
}

impl HealthScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Composite health score in `[0, 100]`.
    pub fn score(&self, metrics: &RawMetrics) -> u8 {
        self.breakdown(metrics).score
    }

    pub fn breakdown(&self, metrics: &RawMetrics) -> ScoreBreakdown {
        let c = &self.config;
        let complexity = c.complexity.goodness(metrics.complexity);
        let size = c.size.goodness(metrics.size);
        let lint_issues = c.lint_issues.goodness(metrics.lint_issues);
        let type_issues = c.type_issues.goodness(metrics.type_issues);

        let total_weight =
            c.complexity.weight + c.size.weight + c.lint_issues.weight + c.type_issues.weight;
        let weighted = c.complexity.weight * complexity
            + c.size.weight * size
            + c.lint_issues.weight * lint_issues
            + c.type_issues.weight * type_issues;

        let score = if total_weight > 0.0 && weighted.is_finite() {
            (100.0 * weighted / total_weight).round().clamp(0.0, 100.0) as u8
        } else {
            0
        };

        ScoreBreakdown {
            score,
            complexity,
            size,
            lint_issues,
            type_issues,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pristine_module_scores_100() {
        let scorer = HealthScorer::default();
        assert_eq!(scorer.score(&RawMetrics::new(1, 20, 0, 0)), 100);
    }

    #[test]
    fn hopeless_module_scores_0() {
        let scorer = HealthScorer::default();
        assert_eq!(scorer.score(&RawMetrics::new(500, 90_000, 400, 300)), 0);
    }

    #[test]
    fn missing_and_negative_metrics_are_worst_case_not_errors() {
        let scorer = HealthScorer::default();
        assert_eq!(scorer.score(&RawMetrics::unknown()), 0);

        let mut partial = RawMetrics::new(1, 20, 0, 0);
        partial.lint_issues = Some(-3);
        let full = scorer.score(&RawMetrics::new(1, 20, 0, 0));
        let degraded = scorer.score(&partial);
        assert_eq!(full - degraded, 25, "lint weight 0.25 of 100 lost");
    }

    #[test]
    fn lower_complexity_never_lowers_score() {
        let scorer = HealthScorer::default();
        let mut last = 0;
        for complexity in (0..=80).rev() {
            let s = scorer.score(&RawMetrics::new(complexity, 300, 4, 1));
            assert!(s >= last, "score dropped at complexity {complexity}");
            last = s;
        }
    }

    #[test]
    fn validate_rejects_inverted_range_and_zero_weights() {
        let mut cfg = ScoringConfig::default();
        cfg.size = MetricRange::new(100.0, 50.0, 0.2);
        assert!(cfg.validate().is_err());

        let zero = MetricRange::new(0.0, 1.0, 0.0);
        let cfg = ScoringConfig {
            complexity: zero,
            size: zero,
            lint_issues: zero,
            type_issues: zero,
        };
        assert!(cfg.validate().is_err());
        assert!(ScoringConfig::default().validate().is_ok());
    }
}
