//! Improvement strategy tags.

use serde::{Deserialize, Serialize};

use crate::domain::error::HealingError;

/// Closed set of improvement strategies a regenerator can be asked to apply.
///
/// The declaration order is the default preference order and the final
/// tournament tie-breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Flatten control flow and remove branching.
    ReduceComplexity,
    /// Split oversized functions into smaller units.
    Decompose,
    /// Tighten type annotations and remove type errors.
    StrengthenTypes,
    /// Fix lint findings without changing behavior.
    CleanLint,
    /// Rewrite in current idioms of the language.
    Modernize,
}

impl Strategy {
    pub const ALL: [Strategy; 5] = [
        Strategy::ReduceComplexity,
        Strategy::Decompose,
        Strategy::StrengthenTypes,
        Strategy::CleanLint,
        Strategy::Modernize,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::ReduceComplexity => "reduce_complexity",
            Strategy::Decompose => "decompose",
            Strategy::StrengthenTypes => "strengthen_types",
            Strategy::CleanLint => "clean_lint",
            Strategy::Modernize => "modernize",
        }
    }

    /// Default instructions handed to the regenerator.
    pub fn instructions(&self) -> &'static str {
        match self {
            Strategy::ReduceComplexity => {
                "Reduce cyclomatic complexity: flatten nested conditionals, use early returns, \
                 and remove dead branches. Preserve public behavior exactly."
            }
            Strategy::Decompose => {
                "Split long functions into small, well-named helpers with a single purpose. \
                 Keep the public interface unchanged."
            }
            Strategy::StrengthenTypes => {
                "Add precise type annotations and fix every type-checker error without \
                 changing runtime behavior."
            }
            Strategy::CleanLint => {
                "Resolve all linter findings. Do not restructure code beyond what the \
                 findings require."
            }
            Strategy::Modernize => {
                "Rewrite using current language idioms and standard-library facilities. \
                 Preserve public behavior exactly."
            }
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Strategy {
    type Err = HealingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Strategy::ALL
            .iter()
            .copied()
            .find(|st| st.name() == s)
            .ok_or_else(|| HealingError::Config(format!("unknown strategy: {s}")))
    }
}
