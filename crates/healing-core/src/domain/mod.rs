//! Domain types for the healing orchestrator.
//!
//! Everything here is plain data plus the invariants that travel with it:
//! module records and metrics, strategy tags, task state, candidate variants,
//! knowledge entries, and the error taxonomy.

pub mod error;
pub mod knowledge;
pub mod module;
pub mod strategy;
pub mod task;
pub mod variant;

pub use error::{HealingError, HealingResult};
pub use knowledge::{KnowledgeEntry, ModuleSnapshot};
pub use module::{ModuleRecord, RawMetrics};
pub use strategy::Strategy;
pub use task::{FailureClass, HealingTask, StatusChange, TaskFailure, TaskStatus};
pub use variant::{FitnessComponents, Variant};
