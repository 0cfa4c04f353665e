//! Knowledge entries: the persisted record of one accepted transformation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use healing_state::ModuleId;

use crate::domain::module::ModuleRecord;
use crate::domain::strategy::Strategy;

/// Module characteristics at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSnapshot {
    pub health: u8,
    pub complexity: Option<i64>,
    pub size: Option<i64>,
}

impl From<&ModuleRecord> for ModuleSnapshot {
    fn from(rec: &ModuleRecord) -> Self {
        Self {
            health: rec.health,
            complexity: rec.metrics.complexity,
            size: rec.metrics.size,
        }
    }
}

/// One accepted transformation and its outcome. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub strategy: Strategy,
    pub module: ModuleId,
    pub before: ModuleSnapshot,
    pub after: ModuleSnapshot,
    pub recorded_at: DateTime<Utc>,
}

impl KnowledgeEntry {
    pub fn health_gain(&self) -> i32 {
        i32::from(self.after.health) - i32::from(self.before.health)
    }

    pub fn complexity_reduction(&self) -> Option<i64> {
        Some(self.before.complexity? - self.after.complexity?)
    }
}
