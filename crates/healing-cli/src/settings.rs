//! `heal.toml`: orchestrator settings at the top level plus the `[tools]` table.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use healing_core::OrchestratorConfig;
use healing_tools::ToolsConfig;

/// Looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG: &str = "heal.toml";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    pub orchestrator: OrchestratorConfig,
    pub tools: ToolsConfig,
}

impl Settings {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(Self {
            orchestrator: OrchestratorConfig::from_toml_str(text)?,
            tools: ToolsConfig::from_heal_toml(text)?,
        })
    }

    /// An explicit path must exist; the default `heal.toml` is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG), false),
        };
        if !path.exists() {
            if required {
                anyhow::bail!("Config file not found: {:?}", path);
            }
            return Ok(Self::default());
        }
        let text =
            std::fs::read_to_string(&path).with_context(|| format!("Failed to read config {:?}", path))?;
        Self::from_toml_str(&text).with_context(|| format!("Invalid config {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_file_feeds_both_sections() {
        let settings = Settings::from_toml_str(
            r#"
            workers = 6
            min_improvement = 8

            [tools.regenerator]
            command = ["./regen"]
            "#,
        )
        .unwrap();
        assert_eq!(settings.orchestrator.workers, 6);
        assert_eq!(settings.orchestrator.min_improvement, 8);
        assert_eq!(
            settings.tools.regenerator.as_ref().and_then(|c| c.program()),
            Some("./regen")
        );
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn invalid_orchestrator_values_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heal.toml");
        std::fs::write(&path, "workers = 0\n").unwrap();
        let err = Settings::load(Some(&path)).unwrap_err();
        assert!(format!("{err:#}").contains("workers"));
    }
}
