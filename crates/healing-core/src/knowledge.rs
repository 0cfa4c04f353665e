//! Knowledge Store: append-only log of accepted transformations.
//!
//! Entries are written only for accepted tasks and never rewritten. Strategy
//! planners read a snapshot taken once at run start, so what one worker
//! appends mid-run cannot change what another worker is asked to try.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use healing_state::{ModuleId, RecordKind, RecordLog};

use crate::domain::{HealingError, HealingResult, KnowledgeEntry, ModuleRecord, RawMetrics, Strategy};

/// Persisted health snapshot of one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub module: ModuleId,
    pub health: u8,
    pub metrics: RawMetrics,
    #[serde(default)]
    pub last_healed: Option<DateTime<Utc>>,
}

impl From<&ModuleRecord> for ScoreRecord {
    fn from(rec: &ModuleRecord) -> Self {
        Self {
            module: rec.id.clone(),
            health: rec.health,
            metrics: rec.metrics,
            last_healed: rec.last_healed,
        }
    }
}

/// Typed view over a [`RecordLog`].
#[derive(Clone)]
pub struct KnowledgeStore {
    log: Arc<dyn RecordLog>,
}

impl std::fmt::Debug for KnowledgeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeStore").finish_non_exhaustive()
    }
}

impl KnowledgeStore {
    pub fn new(log: Arc<dyn RecordLog>) -> Self {
        Self { log }
    }

    /// Append one entry; returns its sequence number.
    pub async fn append(&self, entry: &KnowledgeEntry) -> HealingResult<u64> {
        let payload = serde_json::to_value(entry)?;
        let record = self.log.append(RecordKind::Knowledge, payload).await?;
        tracing::debug!(module = %entry.module, strategy = %entry.strategy, seq = record.seq, "knowledge appended");
        Ok(record.seq)
    }

    pub async fn entries(&self) -> HealingResult<Vec<KnowledgeEntry>> {
        self.log
            .records_of(RecordKind::Knowledge)
            .await?
            .into_iter()
            .map(|r| serde_json::from_value(r.payload).map_err(HealingError::from))
            .collect()
    }

    pub async fn count(&self) -> HealingResult<usize> {
        Ok(self.log.records_of(RecordKind::Knowledge).await?.len())
    }

    pub async fn summary(&self) -> HealingResult<KnowledgeSummary> {
        Ok(KnowledgeSummary::from_entries(&self.entries().await?))
    }

    /// Persist the current score of a module.
    pub async fn record_score(&self, record: &ModuleRecord) -> HealingResult<()> {
        let payload = serde_json::to_value(ScoreRecord::from(record))?;
        self.log.append(RecordKind::Score, payload).await?;
        Ok(())
    }

    /// Most recent score per module.
    pub async fn latest_scores(&self) -> HealingResult<BTreeMap<ModuleId, ScoreRecord>> {
        let mut latest = BTreeMap::new();
        for record in self.log.records_of(RecordKind::Score).await? {
            let score: ScoreRecord = serde_json::from_value(record.payload)?;
            latest.insert(score.module.clone(), score);
        }
        Ok(latest)
    }
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

/// Aggregate outcome of one strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyStats {
    pub strategy: Strategy,
    pub count: usize,
    pub mean_health_gain: f64,
    /// Mean absolute complexity reduction over entries where both sides are known.
    pub mean_complexity_reduction: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeSummary {
    pub total: usize,
    /// One row per strategy seen, in strategy order.
    pub strategies: Vec<StrategyStats>,
}

impl KnowledgeSummary {
    pub fn from_entries(entries: &[KnowledgeEntry]) -> Self {
        let mut by_strategy: BTreeMap<Strategy, (usize, i64, i64, usize)> = BTreeMap::new();
        for e in entries {
            let row = by_strategy.entry(e.strategy).or_default();
            row.0 += 1;
            row.1 += i64::from(e.health_gain());
            if let Some(cr) = e.complexity_reduction() {
                row.2 += cr;
                row.3 += 1;
            }
        }

        let strategies = by_strategy
            .into_iter()
            .map(|(strategy, (count, gain, cr_sum, cr_n))| StrategyStats {
                strategy,
                count,
                mean_health_gain: gain as f64 / count as f64,
                mean_complexity_reduction: (cr_n > 0).then(|| cr_sum as f64 / cr_n as f64),
            })
            .collect();

        Self {
            total: entries.len(),
            strategies,
        }
    }

    pub fn get(&self, strategy: Strategy) -> Option<&StrategyStats> {
        self.strategies.iter().find(|s| s.strategy == strategy)
    }
}

// ---------------------------------------------------------------------------
// Strategy planning
// ---------------------------------------------------------------------------

/// Coarse complexity bucket used to compare modules with similar shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityBand {
    Unknown,
    Low,
    Medium,
    High,
}

impl ComplexityBand {
    pub fn of(complexity: Option<i64>) -> Self {
        match complexity {
            Some(c) if c < 0 => ComplexityBand::Unknown,
            Some(c) if c < 10 => ComplexityBand::Low,
            Some(c) if c < 25 => ComplexityBand::Medium,
            Some(_) => ComplexityBand::High,
            None => ComplexityBand::Unknown,
        }
    }
}

/// Chooses which strategies to ask the regenerator for, best first.
///
/// Planners are read-only with respect to the knowledge store.
pub trait StrategyPlanner: Send + Sync {
    fn plan(&self, module: &ModuleRecord, max_variants: usize) -> Vec<Strategy>;
}

/// Always the configured order.
#[derive(Debug, Clone)]
pub struct FixedStrategies {
    order: Vec<Strategy>,
}

impl FixedStrategies {
    pub fn new(order: Vec<Strategy>) -> Self {
        Self { order }
    }
}

impl StrategyPlanner for FixedStrategies {
    fn plan(&self, _module: &ModuleRecord, max_variants: usize) -> Vec<Strategy> {
        self.order.iter().copied().take(max_variants).collect()
    }
}

/// Orders strategies by historical mean health gain on modules of the same
/// complexity band. Strategies with no history keep their configured
/// relative order after every ranked one.
#[derive(Debug, Clone)]
pub struct KnowledgeRankedStrategies {
    order: Vec<Strategy>,
    /// `(band, strategy) → (sum of gains, count)`
    history: BTreeMap<(ComplexityBand, Strategy), (i64, usize)>,
}

impl KnowledgeRankedStrategies {
    pub fn new(order: Vec<Strategy>, snapshot: &[KnowledgeEntry]) -> Self {
        let mut history: BTreeMap<(ComplexityBand, Strategy), (i64, usize)> = BTreeMap::new();
        for e in snapshot {
            let band = ComplexityBand::of(e.before.complexity);
            let slot = history.entry((band, e.strategy)).or_default();
            slot.0 += i64::from(e.health_gain());
            slot.1 += 1;
        }
        Self { order, history }
    }

    fn mean_gain(&self, band: ComplexityBand, strategy: Strategy) -> Option<f64> {
        self.history
            .get(&(band, strategy))
            .map(|(sum, n)| *sum as f64 / *n as f64)
    }
}

impl StrategyPlanner for KnowledgeRankedStrategies {
    fn plan(&self, module: &ModuleRecord, max_variants: usize) -> Vec<Strategy> {
        let band = ComplexityBand::of(module.metrics.complexity);
        let mut ranked: Vec<(usize, Strategy, Option<f64>)> = self
            .order
            .iter()
            .enumerate()
            .map(|(pos, s)| (pos, *s, self.mean_gain(band, *s)))
            .collect();
        ranked.sort_by(|(pa, _, ga), (pb, _, gb)| match (ga, gb) {
            (Some(a), Some(b)) => b.total_cmp(a).then(pa.cmp(pb)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => pa.cmp(pb),
        });
        ranked
            .into_iter()
            .map(|(_, s, _)| s)
            .take(max_variants)
            .collect()
    }
}
