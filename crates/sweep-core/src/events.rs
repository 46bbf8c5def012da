//! Event types for the campaign audit log.
//!
//! Events are append-only and replayed for post-hoc audit of what the
//! engine did to the working tree and why.

use crate::types::{CheckKind, Id, PhaseKind};
use serde::{Deserialize, Serialize};

/// Event type names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    CampaignCreated,
    CampaignResumed,
    PhaseStarted,
    PhaseFinished,
    BatchCompleted,
    BatchFailed,
    BatchRolledBack,
    CheckpointRestored,
    ValidationFinished,
    CampaignCompleted,
    CampaignHalted,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CampaignCreated => "CAMPAIGN_CREATED",
            Self::CampaignResumed => "CAMPAIGN_RESUMED",
            Self::PhaseStarted => "PHASE_STARTED",
            Self::PhaseFinished => "PHASE_FINISHED",
            Self::BatchCompleted => "BATCH_COMPLETED",
            Self::BatchFailed => "BATCH_FAILED",
            Self::BatchRolledBack => "BATCH_ROLLED_BACK",
            Self::CheckpointRestored => "CHECKPOINT_RESTORED",
            Self::ValidationFinished => "VALIDATION_FINISHED",
            Self::CampaignCompleted => "CAMPAIGN_COMPLETED",
            Self::CampaignHalted => "CAMPAIGN_HALTED",
        }
    }
}

/// Payload for CAMPAIGN_CREATED / CAMPAIGN_RESUMED events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignPayload {
    pub campaign_id: Id,
    pub name: String,
    pub total_issues: u32,
}

/// Payload for PHASE_STARTED / PHASE_FINISHED events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhasePayload {
    pub campaign_id: Id,
    pub phase: PhaseKind,
    #[serde(default)]
    pub warning: Option<String>,
}

/// Payload for batch lifecycle events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPayload {
    pub batch_id: Id,
    pub sequence: u32,
    pub issues_attempted: u32,
    pub issues_fixed: u32,
    pub duration_ms: u64,
}

/// Payload for CHECKPOINT_RESTORED events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointPayload {
    pub batch_id: Id,
    pub label: String,
    pub snapshot: String,
}

/// Payload for VALIDATION_FINISHED events. Carries enough evidence to
/// re-evaluate the quality gate from the audit log alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationPayload {
    pub batch_id: Id,
    pub passed: bool,
    pub quality_score: u8,
    pub requires_rollback: bool,
    #[serde(default)]
    pub failed_checks: Vec<CheckKind>,
    #[serde(default)]
    pub total_errors: u32,
    #[serde(default)]
    pub total_warnings: u32,
    #[serde(default)]
    pub slowest_check_ms: u64,
}

/// Payload for CAMPAIGN_COMPLETED / CAMPAIGN_HALTED events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignEndPayload {
    pub campaign_id: Id,
    pub eliminated: u32,
    pub remaining: u32,
    #[serde(default)]
    pub halt_reason: Option<String>,
    #[serde(default)]
    pub last_good_checkpoint: Option<String>,
}

/// Typed event payloads, tagged for storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    CampaignCreated(CampaignPayload),
    CampaignResumed(CampaignPayload),
    PhaseStarted(PhasePayload),
    PhaseFinished(PhasePayload),
    BatchCompleted(BatchPayload),
    BatchFailed(BatchPayload),
    BatchRolledBack(BatchPayload),
    CheckpointRestored(CheckpointPayload),
    ValidationFinished(ValidationPayload),
    CampaignCompleted(CampaignEndPayload),
    CampaignHalted(CampaignEndPayload),
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::CampaignCreated(_) => EventType::CampaignCreated,
            Self::CampaignResumed(_) => EventType::CampaignResumed,
            Self::PhaseStarted(_) => EventType::PhaseStarted,
            Self::PhaseFinished(_) => EventType::PhaseFinished,
            Self::BatchCompleted(_) => EventType::BatchCompleted,
            Self::BatchFailed(_) => EventType::BatchFailed,
            Self::BatchRolledBack(_) => EventType::BatchRolledBack,
            Self::CheckpointRestored(_) => EventType::CheckpointRestored,
            Self::ValidationFinished(_) => EventType::ValidationFinished,
            Self::CampaignCompleted(_) => EventType::CampaignCompleted,
            Self::CampaignHalted(_) => EventType::CampaignHalted,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// An event in the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Id,
    pub campaign_id: Id,
    pub batch_id: Option<Id>,
    pub event_type: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub payload_json: String,
}
