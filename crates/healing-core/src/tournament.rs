//! Tournament selection among independently validated variants.
//!
//! # Fitness
//!
//! ```text
//! fitness = w_health      × health_gain / 100
//!         + w_complexity  × complexity_reduction
//!         + w_size        × size_reduction
//!         + w_performance × performance_gain      (0 when not benchmarked)
//! ```
//!
//! Every component is oriented so that larger is better and every weight is
//! non-negative, so raising one component never lowers fitness.
//!
//! Ranking: fitness descending, then resulting complexity ascending, then
//! resulting size ascending. Remaining ties fall back to strategy order and
//! then to submission order, so the winner is a pure function of the inputs.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use healing_state::ModuleId;

use crate::domain::{FitnessComponents, HealingError, HealingResult, RawMetrics, Strategy};

/// Weights of the fitness terms.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitnessWeights {
    pub health: f64,
    pub complexity: f64,
    pub size: f64,
    pub performance: f64,
}

impl Default for FitnessWeights {
    fn default() -> Self {
        Self {
            health: 1.0,
            complexity: 0.5,
            size: 0.25,
            performance: 0.25,
        }
    }
}

impl FitnessWeights {
    pub fn validate(&self) -> HealingResult<()> {
        let all = [
            ("health", self.health),
            ("complexity", self.complexity),
            ("size", self.size),
            ("performance", self.performance),
        ];
        if let Some((name, w)) = all.iter().find(|(_, w)| !w.is_finite() || *w < 0.0) {
            return Err(HealingError::Config(format!(
                "fitness.{name} must be a non-negative number, got {w}"
            )));
        }
        if all.iter().all(|(_, w)| *w == 0.0) {
            return Err(HealingError::Config(
                "fitness: at least one weight must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn score(&self, c: &FitnessComponents) -> f64 {
        self.health * c.health_gain / 100.0
            + self.complexity * c.complexity_reduction
            + self.size * c.size_reduction
            + self.performance * c.performance_gain.unwrap_or(0.0)
    }
}

/// Relative reduction `(before - after) / before`; 0 when either side is
/// unknown or the baseline is not positive.
fn relative_reduction(before: Option<i64>, after: Option<i64>) -> f64 {
    match (before, after) {
        (Some(b), Some(a)) if b > 0 && a >= 0 => (b - a) as f64 / b as f64,
        _ => 0.0,
    }
}

/// Build fitness components from validated before/after measurements.
///
/// `performance_gain` is `baseline_ms / candidate_ms - 1` when both timings
/// are positive.
pub fn fitness_components(
    health_before: u8,
    health_after: u8,
    before: &RawMetrics,
    after: &RawMetrics,
    baseline_ms: Option<f64>,
    candidate_ms: Option<f64>,
) -> FitnessComponents {
    let performance_gain = match (baseline_ms, candidate_ms) {
        (Some(b), Some(c)) if b > 0.0 && c > 0.0 => Some(b / c - 1.0),
        _ => None,
    };
    FitnessComponents {
        health_gain: f64::from(health_after) - f64::from(health_before),
        complexity_reduction: relative_reduction(before.complexity, after.complexity),
        size_reduction: relative_reduction(before.size, after.size),
        performance_gain,
    }
}

/// One tournament entrant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contender {
    /// Submission order within the task.
    pub index: usize,
    pub strategy: Strategy,
    /// Passed the full validation pipeline on its own.
    pub eligible: bool,
    pub fitness: FitnessComponents,
    pub complexity_after: Option<i64>,
    pub size_after: Option<i64>,
}

/// Ranked entry in a finished tournament.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standing {
    pub rank: usize,
    pub index: usize,
    pub strategy: Strategy,
    pub fitness: f64,
    pub winner: bool,
}

/// Outcome of a tournament with at least one eligible contender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TournamentOutcome {
    pub winner: usize,
    pub standings: Vec<Standing>,
}

/// Picks the fittest eligible contender.
#[derive(Debug, Clone, Default)]
pub struct TournamentSelector {
    weights: FitnessWeights,
}

impl TournamentSelector {
    pub fn new(weights: FitnessWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &FitnessWeights {
        &self.weights
    }

    /// Rank eligible contenders; [`HealingError::NoWinner`] when none is eligible.
    ///
    /// Ineligible contenders are never ranked, whatever their fitness.
    pub fn select_winner(&self, module: &ModuleId, contenders: &[Contender]) -> HealingResult<TournamentOutcome> {
        let mut ranked: Vec<(&Contender, f64)> = contenders
            .iter()
            .filter(|c| c.eligible)
            .map(|c| (c, self.weights.score(&c.fitness)))
            .collect();

        if ranked.is_empty() {
            return Err(HealingError::NoWinner {
                module: module.to_string(),
                candidates: contenders.len(),
            });
        }

        ranked.sort_by(|(a, fa), (b, fb)| {
            fb.total_cmp(fa)
                .then_with(|| cmp_known_low(a.complexity_after, b.complexity_after))
                .then_with(|| cmp_known_low(a.size_after, b.size_after))
                .then_with(|| a.strategy.cmp(&b.strategy))
                .then_with(|| a.index.cmp(&b.index))
        });

        let winner = ranked[0].0.index;
        let standings = ranked
            .iter()
            .enumerate()
            .map(|(rank, (c, fitness))| Standing {
                rank: rank + 1,
                index: c.index,
                strategy: c.strategy,
                fitness: *fitness,
                winner: rank == 0,
            })
            .collect();

        Ok(TournamentOutcome { winner, standings })
    }
}

/// Lower known values first; unknown sorts last.
fn cmp_known_low(a: Option<i64>, b: Option<i64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
