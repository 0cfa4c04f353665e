//! Orchestrator configuration.
//!
//! Loaded from TOML (`heal.toml`); every field has a default so an empty
//! file is a valid configuration.
//!
//! ```toml
//! workers = 8
//! min_improvement = 5
//! strategies = ["reduce_complexity", "decompose"]
//!
//! [fitness]
//! health = 1.0
//! complexity = 0.5
//!
//! [scoring.complexity]
//! good = 5
//! poor = 60
//! weight = 0.35
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{HealingError, HealingResult, Strategy};
use crate::health::ScoringConfig;
use crate::tournament::FitnessWeights;

/// Upper bound on `max_retries`.
pub const MAX_RETRIES_LIMIT: u32 = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Worker-pool size per level.
    pub workers: usize,
    /// Budget for one regenerator call.
    pub regenerator_timeout_ms: u64,
    /// Budget for one test-suite run.
    pub test_timeout_ms: u64,
    /// Minimum `health_after - health_before` for acceptance.
    pub min_improvement: i32,
    /// Regenerator retries per strategy after the first attempt.
    pub max_retries: u32,
    /// Base delay before a retry; doubles per attempt.
    pub retry_backoff_ms: u64,
    /// Upper bound on variants requested per module.
    pub max_variants: usize,
    /// Strategies in preference order.
    pub strategies: Vec<Strategy>,
    /// Rank strategies by knowledge-store history instead of fixed order.
    pub rank_by_knowledge: bool,
    pub fitness: FitnessWeights,
    pub scoring: ScoringConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            regenerator_timeout_ms: 120_000,
            test_timeout_ms: 300_000,
            min_improvement: 5,
            max_retries: 2,
            retry_backoff_ms: 250,
            max_variants: 4,
            strategies: Strategy::ALL.to_vec(),
            rank_by_knowledge: false,
            fitness: FitnessWeights::default(),
            scoring: ScoringConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_toml_str(s: &str) -> HealingResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| HealingError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> HealingResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text).map_err(|e| match e {
            HealingError::Config(msg) => HealingError::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    pub fn validate(&self) -> HealingResult<()> {
        if self.workers == 0 {
            return Err(HealingError::Config("workers must be at least 1".to_string()));
        }
        if self.regenerator_timeout_ms == 0 || self.test_timeout_ms == 0 {
            return Err(HealingError::Config("timeouts must be greater than zero".to_string()));
        }
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(HealingError::Config(format!(
                "max_retries must be at most {MAX_RETRIES_LIMIT}"
            )));
        }
        if self.max_variants == 0 {
            return Err(HealingError::Config("max_variants must be at least 1".to_string()));
        }
        if self.strategies.is_empty() {
            return Err(HealingError::Config("strategies must not be empty".to_string()));
        }
        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = self.strategies.iter().find(|s| !seen.insert(**s)) {
            return Err(HealingError::Config(format!("strategy listed twice: {dup}")));
        }
        self.fitness.validate()?;
        self.scoring.validate()?;
        Ok(())
    }

    pub fn regenerator_timeout(&self) -> Duration {
        Duration::from_millis(self.regenerator_timeout_ms)
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_millis(self.test_timeout_ms)
    }

    /// Delay before retry number `retry` (1-based), doubling each time.
    pub fn retry_backoff(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry.saturating_sub(1));
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }
}
