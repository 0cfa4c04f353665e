//! Module manifest: the list of modules to heal and their imports.
//!
//! ```json
//! { "modules": [
//!     { "id": "pkg/core.py", "imports": [] },
//!     { "id": "pkg/api.py", "imports": ["pkg/core.py"],
//!       "metrics": { "complexity": 31, "size": 620, "lint_issues": 4, "type_issues": 1 } }
//! ] }
//! ```

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use healing_core::{HealthScorer, ModuleRecord, RawMetrics};
use healing_state::ModuleId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub modules: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: String,
    #[serde(default)]
    pub imports: Vec<String>,
    /// Last known metrics; the module scores 0 until analyzed when absent.
    #[serde(default)]
    pub metrics: Option<RawMetrics>,
}

impl Manifest {
    pub fn from_json(s: &str) -> Result<Self> {
        let manifest: Manifest = serde_json::from_str(s).context("manifest is not valid JSON")?;
        let mut seen = BTreeSet::new();
        for entry in &manifest.modules {
            if entry.id.trim().is_empty() {
                anyhow::bail!("manifest contains a module with an empty id");
            }
            if !seen.insert(entry.id.as_str()) {
                anyhow::bail!("module listed twice in manifest: {}", entry.id);
            }
        }
        Ok(manifest)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {:?}", path))?;
        Self::from_json(&text).with_context(|| format!("Invalid manifest {:?}", path))
    }

    /// Module records, scored with `scorer` where metrics are given.
    pub fn records(&self, scorer: &HealthScorer) -> Vec<ModuleRecord> {
        self.modules
            .iter()
            .map(|entry| {
                let imports = entry.imports.iter().map(|i| ModuleId::new(i.as_str())).collect();
                let record = ModuleRecord::new(entry.id.as_str(), imports);
                match entry.metrics {
                    Some(metrics) => record.with_health(metrics, scorer.score(&metrics)),
                    None => record,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use healing_core::ScoringConfig;

    #[test]
    fn parses_and_scores_entries() {
        let manifest = Manifest::from_json(
            r#"{ "modules": [
                { "id": "a.py" },
                { "id": "b.py", "imports": ["a.py"],
                  "metrics": { "complexity": 5, "size": 100, "lint_issues": 0, "type_issues": 0 } }
            ] }"#,
        )
        .unwrap();
        let records = manifest.records(&HealthScorer::new(ScoringConfig::default()));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].health, 0);
        assert_eq!(records[1].imports, vec![ModuleId::new("a.py")]);
        assert_eq!(records[1].health, 100);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = Manifest::from_json(r#"{ "modules": [ { "id": "a" }, { "id": "a" } ] }"#).unwrap_err();
        assert!(err.to_string().contains("twice"));
    }

    #[test]
    fn empty_id_is_rejected() {
        assert!(Manifest::from_json(r#"{ "modules": [ { "id": " " } ] }"#).is_err());
    }
}
