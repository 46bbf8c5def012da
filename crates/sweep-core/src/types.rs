//! Core types for the campaign engine.
//!
//! The engine consumes a normalized issue backlog and drives batches of
//! mechanical fixes over it. Everything here is a plain data carrier; the
//! behavior lives in `sweep-engine`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for campaigns, batches, checkpoints, and events.
/// Uses `UUIDv7` for time-ordered lexicographic sorting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(pub String);

impl Id {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// --- Enumerations ---

/// Severity reported by the external analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
        }
    }
}

/// Primary rule category of an issue.
///
/// Closed set: unknown category strings are rejected at the ingestion
/// boundary rather than carried through the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Formatting,
    UnusedSymbol,
    ImportHygiene,
    TypeSafety,
    Correctness,
    Security,
    Naming,
    Documentation,
}

impl IssueCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Formatting => "formatting",
            Self::UnusedSymbol => "unused_symbol",
            Self::ImportHygiene => "import_hygiene",
            Self::TypeSafety => "type_safety",
            Self::Correctness => "correctness",
            Self::Security => "security",
            Self::Naming => "naming",
            Self::Documentation => "documentation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "formatting" => Some(Self::Formatting),
            "unused_symbol" => Some(Self::UnusedSymbol),
            "import_hygiene" => Some(Self::ImportHygiene),
            "type_safety" => Some(Self::TypeSafety),
            "correctness" => Some(Self::Correctness),
            "security" => Some(Self::Security),
            "naming" => Some(Self::Naming),
            "documentation" => Some(Self::Documentation),
            _ => None,
        }
    }
}

/// How an issue should be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStrategy {
    AutoFix,
    #[default]
    ManualReview,
}

impl FixStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoFix => "auto_fix",
            Self::ManualReview => "manual_review",
        }
    }
}

/// Risk level attached to a resolution (ordering: Low < Medium < High).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// Batch lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    RolledBack,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::RolledBack => "ROLLED_BACK",
        }
    }
}

/// Campaign lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// Terminated by a fatal safety violation (rollback failure or
    /// exceeded failure threshold). No further batches execute.
    Halted,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Halted => "HALTED",
        }
    }
}

/// Validation check types. Command checks (compilation, tests, build) run
/// first, then the structural integrity checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Compilation,
    TestSuite,
    Component,
    Service,
    Build,
}

impl CheckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compilation => "compilation",
            Self::TestSuite => "test_suite",
            Self::Component => "component",
            Self::Service => "service",
            Self::Build => "build",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "compilation" => Some(Self::Compilation),
            "test_suite" => Some(Self::TestSuite),
            "component" => Some(Self::Component),
            "service" => Some(Self::Service),
            "build" => Some(Self::Build),
            _ => None,
        }
    }
}

/// Campaign phase kinds, in default execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    AutoFix,
    UnusedSymbolCleanup,
    ImportCleanup,
    DomainSensitiveCleanup,
}

impl PhaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoFix => "auto_fix",
            Self::UnusedSymbolCleanup => "unused_symbol_cleanup",
            Self::ImportCleanup => "import_cleanup",
            Self::DomainSensitiveCleanup => "domain_sensitive_cleanup",
        }
    }

    /// Categories this phase feeds to the batch processor.
    pub fn default_categories(&self) -> Vec<IssueCategory> {
        match self {
            Self::AutoFix => vec![
                IssueCategory::Formatting,
                IssueCategory::TypeSafety,
                IssueCategory::Naming,
                IssueCategory::Documentation,
            ],
            Self::UnusedSymbolCleanup => vec![IssueCategory::UnusedSymbol],
            Self::ImportCleanup => vec![IssueCategory::ImportHygiene],
            Self::DomainSensitiveCleanup => {
                vec![IssueCategory::Correctness, IssueCategory::Security]
            }
        }
    }

    /// Only the domain-sensitive phase may touch risk-sensitive files.
    pub fn overrides_risk_predicate(&self) -> bool {
        matches!(self, Self::DomainSensitiveCleanup)
    }
}

// --- Issues ---

/// How the analyzer recommends resolving an issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub strategy: FixStrategy,
    /// Analyzer confidence in the fix, in [0, 1].
    pub confidence: f64,
    pub risk: RiskLevel,
}

/// Domain context flags attached to an issue by the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IssueContext {
    /// Set when the file is excluded from automated fixing by policy.
    pub risk_sensitive: bool,
    pub test_file: bool,
}

/// One detected defect or smell, normalized by the external analyzer.
///
/// Immutable once produced: the engine consumes issues, it never mutates
/// them. Construct via [`crate::ingest::validate_issue`] so that only
/// checked shapes enter the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: Id,
    pub file: String,
    pub line: u32,
    pub column: u32,
    /// Analyzer rule identifier (e.g. `no-unused-vars`).
    pub rule: String,
    pub category: IssueCategory,
    #[serde(default)]
    pub secondary_category: Option<IssueCategory>,
    pub severity: Severity,
    pub auto_fixable: bool,
    pub resolution: Resolution,
    #[serde(default)]
    pub context: IssueContext,
}

// --- Batches ---

/// Per-batch work counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchCounters {
    pub issues_attempted: u32,
    pub issues_fixed: u32,
    pub issues_failed: u32,
    pub files_touched: u32,
    pub validations_passed: u32,
    pub validations_failed: u32,
    pub rollbacks_triggered: u32,
}

/// A unit of work: an ordered set of issues processed and validated together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: Id,
    pub campaign_id: Id,
    /// 1-indexed position within the campaign.
    pub sequence: u32,
    pub phase: PhaseKind,
    pub status: BatchStatus,
    #[serde(default)]
    pub counters: BatchCounters,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Batch {
    pub fn new(campaign_id: Id, sequence: u32, phase: PhaseKind) -> Self {
        Self {
            id: Id::new(),
            campaign_id,
            sequence,
            phase,
            status: BatchStatus::Pending,
            counters: BatchCounters::default(),
            started_at: None,
            ended_at: None,
        }
    }
}

// --- Checkpoints ---

/// Handle to a restorable working-tree snapshot.
///
/// Lifecycle: created before a batch applies any fix, consumed (restored)
/// only on validation failure, discarded after a successful batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRef {
    pub id: Id,
    /// Label under which the snapshot is stored in the backing VCS.
    pub label: String,
    /// Object id of the snapshot (HEAD when the tree was clean).
    pub snapshot: String,
    pub batch_id: Id,
    pub created_at: DateTime<Utc>,
    /// Untracked files present at snapshot time. Files outside this set
    /// that exist at restore time were introduced by the batch and are
    /// removed to make the restore byte-identical.
    #[serde(default)]
    pub untracked: Vec<String>,
}

// --- Validation ---

/// Outcome of one check type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub kind: CheckKind,
    pub passed: bool,
    /// Check was skipped (e.g. no related tests exist). Skips count as
    /// passes but carry a warning.
    #[serde(default)]
    pub skipped: bool,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    pub duration_ms: u64,
    #[serde(default)]
    pub retries: u32,
}

/// Aggregated outcome of a full validation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComprehensiveValidationResult {
    pub passed: bool,
    pub results: Vec<ValidationResult>,
    /// Weighted composite in [0, 100].
    pub quality_score: u8,
    /// True iff a check in the configured critical set failed.
    pub requires_rollback: bool,
}

impl ComprehensiveValidationResult {
    /// Errors from all failed checks, flattened in check order.
    pub fn all_errors(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| !r.passed)
            .flat_map(|r| r.errors.iter().map(String::as_str))
            .collect()
    }
}

// --- Metrics ---

/// First full measurement a campaign is scored against.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Baseline {
    pub total_issues: u32,
    pub issues_by_category: Vec<(IssueCategory, u32)>,
    pub issues_by_severity: Vec<(Severity, u32)>,
    /// Issue count in risk-sensitive (domain) files.
    pub domain_issues: u32,
    pub compile_errors: Option<u32>,
    pub build_time_ms: Option<u64>,
    pub file_inventory: Option<u32>,
    /// 0-100. Each sub-measurement that failed to collect subtracts a
    /// fixed penalty rather than silently trusting partial data.
    pub confidence: u8,
    pub captured_at: Option<DateTime<Utc>>,
}

/// Point-in-time quality measurement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityMetrics {
    pub timestamp: Option<DateTime<Utc>>,
    /// Issue reduction relative to the baseline, in percent.
    pub issue_reduction_pct: f64,
    /// 0-100, derived from validation pass rate.
    pub build_stability: u8,
    /// 0-100, integrity of risk-sensitive (domain) files.
    pub domain_integrity: u8,
    /// Weighted composite in [0, 100].
    pub overall_score: u8,
    pub reduction_target_met: bool,
    pub stability_target_met: bool,
    pub remaining_issues: u32,
}

/// Target thresholds a campaign aims for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignTargets {
    pub reduction_pct: f64,
    pub min_quality_score: u8,
}

impl Default for CampaignTargets {
    fn default() -> Self {
        Self {
            reduction_pct: 90.0,
            min_quality_score: 80,
        }
    }
}

// --- Campaign run state ---

/// Cumulative tracking counters for a campaign.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignCounters {
    pub eliminated: u32,
    pub preserved: u32,
    pub transformed: u32,
    pub remaining: u32,
}

/// State of one phase within a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseState {
    pub kind: PhaseKind,
    pub completed: bool,
    #[serde(default)]
    pub batches_completed: u32,
    /// Set when the phase under-performed its targets. The controller
    /// records this and proceeds to the next phase.
    #[serde(default)]
    pub warning: Option<String>,
}

/// Top-level campaign state, persisted after every batch.
///
/// All fields default so that records written by older or newer campaign
/// versions deserialize cleanly (unknown fields are ignored by serde).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignRun {
    pub id: Id,
    pub name: String,
    pub status: CampaignStatus,
    pub workspace_root: String,
    pub baseline: Option<Baseline>,
    pub targets: CampaignTargets,
    pub phases: Vec<PhaseState>,
    pub counters: CampaignCounters,
    /// Items per minute over the run so far.
    pub velocity: f64,
    /// Estimated maintenance minutes saved (eliminated items x a fixed
    /// per-item constant). An estimate, not a measurement.
    pub roi_minutes_saved: f64,
    pub rollback_count: u32,
    pub last_completed_batch: u32,
    /// Issue ids that failed in earlier batches. Reseeds the processor's
    /// known-failed ledger on resume so they are never retried.
    pub failed_issue_ids: Vec<Id>,
    /// Distinct rule ids still present in the unfixed backlog.
    pub remaining_rules: Vec<String>,
    pub halt_reason: Option<String>,
    /// Last checkpoint known to have restored or discarded cleanly.
    pub last_good_checkpoint: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for CampaignRun {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: Id::new(),
            name: String::new(),
            status: CampaignStatus::Pending,
            workspace_root: String::new(),
            baseline: None,
            targets: CampaignTargets::default(),
            phases: Vec::new(),
            counters: CampaignCounters::default(),
            velocity: 0.0,
            roi_minutes_saved: 0.0,
            rollback_count: 0,
            last_completed_batch: 0,
            failed_issue_ids: Vec::new(),
            remaining_rules: Vec::new(),
            halt_reason: None,
            last_good_checkpoint: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// --- Quality gate ---

/// One threshold the gate found violated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdViolation {
    pub name: String,
    pub limit: f64,
    pub actual: f64,
}

/// Deployment-readiness verdict over a metrics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateResult {
    pub passed: bool,
    pub deployment_approved: bool,
    pub risk: RiskLevel,
    pub violations: Vec<ThresholdViolation>,
    /// Hard blockers force failure regardless of aggregate score.
    pub blockers: Vec<String>,
    pub recommendations: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_generates_unique_values() {
        let id1 = Id::new();
        let id2 = Id::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn batch_status_serializes_correctly() {
        assert_eq!(
            serde_json::to_string(&BatchStatus::RolledBack).unwrap(),
            "\"ROLLED_BACK\""
        );
        assert_eq!(
            serde_json::to_string(&BatchStatus::InProgress).unwrap(),
            "\"IN_PROGRESS\""
        );
    }

    #[test]
    fn check_kind_round_trips_through_parse() {
        for kind in [
            CheckKind::Compilation,
            CheckKind::TestSuite,
            CheckKind::Component,
            CheckKind::Service,
            CheckKind::Build,
        ] {
            assert_eq!(CheckKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(CheckKind::parse("lint"), None);
    }

    #[test]
    fn risk_level_orders_low_to_high() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
    }

    #[test]
    fn phase_categories_cover_unused_and_imports() {
        assert_eq!(
            PhaseKind::UnusedSymbolCleanup.default_categories(),
            vec![IssueCategory::UnusedSymbol]
        );
        assert_eq!(
            PhaseKind::ImportCleanup.default_categories(),
            vec![IssueCategory::ImportHygiene]
        );
    }

    #[test]
    fn only_domain_phase_overrides_risk_predicate() {
        assert!(PhaseKind::DomainSensitiveCleanup.overrides_risk_predicate());
        assert!(!PhaseKind::AutoFix.overrides_risk_predicate());
        assert!(!PhaseKind::ImportCleanup.overrides_risk_predicate());
    }

    #[test]
    fn campaign_run_ignores_unknown_fields() {
        // Forward compatibility: records from newer campaign versions must
        // still deserialize.
        let json = r#"{"id":"abc","name":"x","status":"RUNNING","future_field":42}"#;
        let run: CampaignRun = serde_json::from_str(json).unwrap();
        assert_eq!(run.name, "x");
        assert_eq!(run.status, CampaignStatus::Running);
    }

    #[test]
    fn campaign_run_defaults_missing_fields() {
        let json = r#"{"name":"partial"}"#;
        let run: CampaignRun = serde_json::from_str(json).unwrap();
        assert_eq!(run.status, CampaignStatus::Pending);
        assert_eq!(run.rollback_count, 0);
        assert!(run.baseline.is_none());
        assert!(run.failed_issue_ids.is_empty());
        assert!(run.remaining_rules.is_empty());
    }

    #[test]
    fn campaign_run_carries_failed_ledger_and_remaining_rules() {
        let mut run = CampaignRun::default();
        run.failed_issue_ids = vec![Id::from_string("i1"), Id::from_string("i2")];
        run.remaining_rules = vec!["no-eval".to_string()];
        let json = serde_json::to_string(&run).unwrap();
        let loaded: CampaignRun = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded.failed_issue_ids, run.failed_issue_ids);
        assert_eq!(loaded.remaining_rules, vec!["no-eval".to_string()]);
    }
}
