//! Candidate replacement sources.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::strategy::Strategy;

/// Fitness inputs for one candidate, all oriented so that larger is better.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FitnessComponents {
    /// `health_after - health_before`, in score points.
    pub health_gain: f64,
    /// `(complexity_before - complexity_after) / complexity_before`.
    pub complexity_reduction: f64,
    /// `(size_before - size_after) / size_before`.
    pub size_reduction: f64,
    /// `baseline_ms / candidate_ms - 1`, when a benchmark ran.
    pub performance_gain: Option<f64>,
}

/// One candidate rewrite of a module, produced under one strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub id: Uuid,
    pub strategy: Strategy,
    /// Regenerator attempts spent producing this candidate.
    pub attempts: u32,
    #[serde(skip_serializing, default)]
    pub source: String,
    pub fitness: Option<FitnessComponents>,
    pub benchmark_ms: Option<f64>,
}

impl Variant {
    pub fn new(strategy: Strategy, source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            strategy,
            attempts: 1,
            source: source.into(),
            fitness: None,
            benchmark_ms: None,
        }
    }
}
