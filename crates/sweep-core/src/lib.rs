//! sweep-core: data model and shared plumbing for the campaign engine.

pub mod config;
pub mod events;
pub mod ingest;
pub mod report;
pub mod types;

pub use config::{ConfigError, EngineConfig, GateThresholds, ScoreWeights};
pub use types::*;
