//! sweep-engine: batch processing, validation, and campaign control.
//!
//! The engine consumes a normalized issue backlog (see `sweep-core`) and
//! drives checkpointed batches of mechanical fixes over a git working tree,
//! validating after each batch and rolling back on critical failures.

pub mod batch;
pub mod checkpoint;
pub mod controller;
pub mod gate;
pub mod monitor;
pub mod progress;
pub mod store;
pub mod validate;

pub use batch::{BatchProcessor, BatchResult, CommandFixer, FixOutcome, Fixer};
pub use checkpoint::{CheckpointError, CheckpointManager};
pub use controller::{CampaignController, CampaignPlan, ControllerError};
pub use gate::GateInput;
pub use monitor::Monitor;
pub use progress::{BaselineSignals, ProgressTracker};
pub use store::{StorageError, Store};
pub use validate::{CheckSpec, SymbolSnapshot, ValidationConfig, ValidationEngine};
