//! Module records and raw static-analysis metrics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use healing_state::ModuleId;

/// Raw metric counts reported by the static analyzer.
///
/// `None` (or a negative count) means the analyzer could not produce the
/// dimension; the scorer treats it as worst case.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMetrics {
    #[serde(default)]
    pub complexity: Option<i64>,
    #[serde(default)]
    pub size: Option<i64>,
    #[serde(default)]
    pub lint_issues: Option<i64>,
    #[serde(default)]
    pub type_issues: Option<i64>,
}

impl RawMetrics {
    pub fn new(complexity: i64, size: i64, lint_issues: i64, type_issues: i64) -> Self {
        Self {
            complexity: Some(complexity),
            size: Some(size),
            lint_issues: Some(lint_issues),
            type_issues: Some(type_issues),
        }
    }

    /// No dimension known.
    pub fn unknown() -> Self {
        Self::default()
    }
}

/// A module discovered in the repository, with its latest health snapshot.
///
/// Records are never deleted; they are updated on rescore and on accepted
/// merges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub id: ModuleId,
    /// Composite health score, 0–100.
    #[serde(default)]
    pub health: u8,
    #[serde(default)]
    pub metrics: RawMetrics,
    /// Outgoing import edges.
    #[serde(default)]
    pub imports: Vec<ModuleId>,
    /// Incoming import edges, filled in by the graph builder.
    #[serde(default)]
    pub dependents: Vec<ModuleId>,
    #[serde(default)]
    pub last_healed: Option<DateTime<Utc>>,
}

impl ModuleRecord {
    pub fn new(id: impl Into<ModuleId>, imports: Vec<ModuleId>) -> Self {
        Self {
            id: id.into(),
            health: 0,
            metrics: RawMetrics::unknown(),
            imports,
            dependents: Vec::new(),
            last_healed: None,
        }
    }

    /// Builder-style metrics + score.
    pub fn with_health(mut self, metrics: RawMetrics, health: u8) -> Self {
        self.metrics = metrics;
        self.health = health;
        self
    }

    /// Replace metrics and score after a rescore.
    pub fn rescore(&mut self, metrics: RawMetrics, health: u8) {
        self.metrics = metrics;
        self.health = health.min(100);
    }

    pub fn mark_healed(&mut self, at: DateTime<Utc>) {
        self.last_healed = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_deserializes_with_defaults() {
        let json = r#"{ "id": "pkg/a.py", "imports": ["pkg/b.py"] }"#;
        let rec: ModuleRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.id.as_str(), "pkg/a.py");
        assert_eq!(rec.health, 0);
        assert_eq!(rec.metrics, RawMetrics::unknown());
        assert!(rec.dependents.is_empty());
        assert!(rec.last_healed.is_none());
    }

    #[test]
    fn rescore_clamps_health() {
        let mut rec = ModuleRecord::new("m", vec![]);
        rec.rescore(RawMetrics::new(3, 40, 0, 0), 250);
        assert_eq!(rec.health, 100);
        assert_eq!(rec.metrics.complexity, Some(3));
    }
}
