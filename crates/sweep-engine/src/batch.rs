//! Batch processor: the safety-critical core loop.
//!
//! One batch is checkpoint, fix, validate, then reclaim: discard the
//! checkpoint on success, restore it on a critical validation failure.
//! Batches are strictly sequential; nothing here is concurrent.
//!
//! Issue selection is conservative by default: only auto-fixable issues at
//! or above the confidence floor, at or below the risk ceiling, outside
//! risk-sensitive files, and not already known to have failed.

use chrono::Utc;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use sweep_core::config::EngineConfig;
use sweep_core::types::{
    Batch, BatchStatus, CheckpointRef, ComprehensiveValidationResult, FixStrategy, Id, Issue,
    PhaseKind,
};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::checkpoint::{CheckpointError, CheckpointManager};
use crate::validate::ValidationEngine;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

pub type Result<T> = std::result::Result<T, BatchError>;

/// Why a fix application failed outright (as opposed to individual issues
/// the fixer reports as unfixable).
#[derive(Debug, Error)]
pub enum FixError {
    #[error("failed to spawn fix command: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("fix command timed out after {0} seconds")]
    Timeout(u32),
}

/// Per-issue outcome reported by a fixer.
#[derive(Debug, Clone, Default)]
pub struct FixOutcome {
    pub fixed: Vec<Id>,
    /// Issues the fixer declined or failed to fix, with reasons.
    pub failed: Vec<(Id, String)>,
}

/// Applies mechanical fixes for a set of issues.
///
/// Implementations mutate the working tree and report per-issue outcomes;
/// checkpointing and validation around the call are the processor's job.
pub trait Fixer {
    fn apply(
        &self,
        issues: &[Issue],
        workspace_root: &Path,
    ) -> impl std::future::Future<Output = std::result::Result<FixOutcome, FixError>> + Send;
}

/// Fixer that shells out to an external command.
///
/// `{files}` in the template expands to the space-separated unique files of
/// the sub-batch. Exit 0 marks every issue fixed; any other exit marks every
/// issue failed.
#[derive(Debug, Clone)]
pub struct CommandFixer {
    cmd: String,
    timeout_sec: u32,
}

impl CommandFixer {
    pub fn new(cmd: impl Into<String>, timeout_sec: u32) -> Self {
        Self {
            cmd: cmd.into(),
            timeout_sec,
        }
    }
}

impl Fixer for CommandFixer {
    async fn apply(
        &self,
        issues: &[Issue],
        workspace_root: &Path,
    ) -> std::result::Result<FixOutcome, FixError> {
        let files = unique_files(issues);
        let cmd = self.cmd.replace("{files}", &files.join(" "));
        debug!(cmd = %cmd, issues = issues.len(), "running fix command");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&cmd)
            .current_dir(workspace_root)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let status = if self.timeout_sec > 0 {
            tokio::select! {
                result = child.wait() => result?,
                () = tokio::time::sleep(Duration::from_secs(u64::from(self.timeout_sec))) => {
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                    return Err(FixError::Timeout(self.timeout_sec));
                }
            }
        } else {
            child.wait().await?
        };

        let mut outcome = FixOutcome::default();
        if status.success() {
            outcome.fixed = issues.iter().map(|i| i.id.clone()).collect();
        } else {
            let reason = format!("fix command exited with {}", status.code().unwrap_or(-1));
            outcome.failed = issues
                .iter()
                .map(|i| (i.id.clone(), reason.clone()))
                .collect();
        }
        Ok(outcome)
    }
}

/// Outcome of one processed sub-batch.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub batch: Batch,
    pub validation: Option<ComprehensiveValidationResult>,
    pub fixed_issues: Vec<Id>,
    pub failed_issues: Vec<Id>,
    /// Checkpoint taken for this batch. None in dry runs and when rollback
    /// is disabled.
    pub checkpoint: Option<CheckpointRef>,
}

impl BatchResult {
    pub fn rolled_back(&self) -> bool {
        self.batch.status == BatchStatus::RolledBack
    }
}

/// Drives the checkpoint-fix-validate loop over sub-batches of issues.
///
/// The risk predicate is injected by the host; the processor never decides
/// on its own which files are risk-sensitive.
pub struct BatchProcessor<F> {
    fixer: F,
    config: EngineConfig,
    checkpoints: CheckpointManager,
    validator: ValidationEngine,
    risk_predicate: Box<dyn Fn(&str) -> bool + Send + Sync>,
    /// Issues that already failed once this campaign. Never retried.
    known_failed: HashSet<Id>,
    workspace_root: PathBuf,
}

impl<F> std::fmt::Debug for BatchProcessor<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchProcessor")
            .field("workspace_root", &self.workspace_root)
            .field("known_failed", &self.known_failed.len())
            .finish_non_exhaustive()
    }
}

impl<F: Fixer> BatchProcessor<F> {
    pub fn new(
        fixer: F,
        config: EngineConfig,
        workspace_root: impl Into<PathBuf>,
        risk_predicate: Box<dyn Fn(&str) -> bool + Send + Sync>,
    ) -> Self {
        let workspace_root = workspace_root.into();
        // State under the workspace is engine-owned; restores must not
        // touch it.
        let mut checkpoints = CheckpointManager::new(&workspace_root);
        let state_dir = config
            .state_dir
            .strip_prefix(&workspace_root)
            .unwrap_or(&config.state_dir);
        if state_dir.is_relative() {
            checkpoints =
                checkpoints.ignore_prefix(format!("{}/", state_dir.to_string_lossy()));
        }
        Self {
            fixer,
            checkpoints,
            validator: ValidationEngine::from_engine_config(&config, &workspace_root),
            config,
            risk_predicate,
            known_failed: HashSet::new(),
            workspace_root,
        }
    }

    /// Number of issues in the known-failed ledger.
    pub fn known_failed_count(&self) -> usize {
        self.known_failed.len()
    }

    /// Seed the known-failed ledger, used when resuming a campaign.
    pub fn mark_failed(&mut self, ids: impl IntoIterator<Item = Id>) {
        self.known_failed.extend(ids);
    }

    /// Select the issues a phase may touch, in input order.
    pub fn select_eligible<'a>(&self, phase: PhaseKind, issues: &'a [Issue]) -> Vec<&'a Issue> {
        let categories = phase.default_categories();
        issues
            .iter()
            .filter(|issue| {
                if !categories.contains(&issue.category) {
                    return false;
                }
                if !issue.auto_fixable || issue.resolution.strategy != FixStrategy::AutoFix {
                    return false;
                }
                if issue.resolution.confidence < self.config.confidence_min {
                    return false;
                }
                if issue.resolution.risk > self.config.max_risk {
                    return false;
                }
                if self.known_failed.contains(&issue.id) {
                    return false;
                }
                // Risk-sensitive files are off limits except in the phase
                // explicitly chartered for them.
                let sensitive = issue.context.risk_sensitive || (self.risk_predicate)(&issue.file);
                if sensitive && !phase.overrides_risk_predicate() {
                    return false;
                }
                true
            })
            .collect()
    }

    /// Split eligible issues into sub-batches of the configured size.
    pub fn chunk<'a>(&self, eligible: &[&'a Issue]) -> Vec<Vec<&'a Issue>> {
        eligible
            .chunks(self.config.batch_size)
            .map(<[&Issue]>::to_vec)
            .collect()
    }

    /// Process one sub-batch end to end.
    ///
    /// A `CheckpointError::RestoreFailed` from here means the working tree
    /// is in an unknown state; the caller must halt the campaign.
    pub async fn run_batch(
        &mut self,
        campaign_id: &Id,
        sequence: u32,
        phase: PhaseKind,
        issues: &[Issue],
    ) -> Result<BatchResult> {
        let mut batch = Batch::new(campaign_id.clone(), sequence, phase);
        batch.status = BatchStatus::InProgress;
        batch.started_at = Some(Utc::now());
        batch.counters.issues_attempted = issues.len() as u32;

        let files = unique_files(issues);
        batch.counters.files_touched = files.len() as u32;

        info!(
            batch_id = %batch.id,
            sequence,
            phase = phase.as_str(),
            issues = issues.len(),
            files = files.len(),
            "batch started"
        );

        if self.config.dry_run {
            // Report what would be attempted without touching anything.
            batch.status = BatchStatus::Completed;
            batch.ended_at = Some(Utc::now());
            info!(batch_id = %batch.id, "dry run, no changes applied");
            return Ok(BatchResult {
                batch,
                validation: None,
                fixed_issues: Vec::new(),
                failed_issues: Vec::new(),
                checkpoint: None,
            });
        }

        // Snapshot exported symbols before any mutation so validation can
        // diff against the pre-batch state.
        let symbols = self.validator.snapshot(&files);

        // With rollback disabled there is nothing to restore to, so no
        // snapshot is taken and leftover stash state is never inspected.
        let checkpoint = if self.config.enable_rollback {
            Some(self.checkpoints.checkpoint("pre-batch", &batch.id)?)
        } else {
            None
        };

        let outcome = match self.fixer.apply(issues, &self.workspace_root).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // The fixer itself failed. Revert any partial effects and
                // mark every issue failed.
                warn!(batch_id = %batch.id, error = %e, "fixer failed, reverting batch");
                if let Some(cp) = &checkpoint {
                    self.checkpoints.restore(cp)?;
                    batch.counters.rollbacks_triggered = 1;
                }
                let failed: Vec<Id> = issues.iter().map(|i| i.id.clone()).collect();
                self.known_failed.extend(failed.iter().cloned());
                batch.counters.issues_failed = failed.len() as u32;
                batch.status = BatchStatus::Failed;
                batch.ended_at = Some(Utc::now());
                return Ok(BatchResult {
                    batch,
                    validation: None,
                    fixed_issues: Vec::new(),
                    failed_issues: failed,
                    checkpoint,
                });
            }
        };

        let mut fixed: Vec<Id> = outcome.fixed;
        let mut failed: Vec<Id> = outcome.failed.iter().map(|(id, _)| id.clone()).collect();
        for (id, reason) in &outcome.failed {
            debug!(issue_id = %id, reason = %reason, "issue not fixed");
        }

        let validation = if self.config.validate_after_each_batch {
            Some(self.validator.validate(&files, &batch.id, &symbols).await)
        } else {
            None
        };

        match &validation {
            Some(result) if result.requires_rollback => {
                if let Some(cp) = &checkpoint {
                    warn!(
                        batch_id = %batch.id,
                        quality_score = result.quality_score,
                        errors = result.all_errors().len(),
                        "critical validation failure, rolling back"
                    );
                    // RestoreFailed propagates; it is fatal to the campaign.
                    self.checkpoints.restore(cp)?;
                    batch.counters.rollbacks_triggered = 1;
                    batch.status = BatchStatus::RolledBack;
                } else {
                    // Rollback disabled by policy. The fixes stay in the
                    // tree but the issues are recorded as failed.
                    warn!(batch_id = %batch.id, "critical validation failure, rollback disabled");
                    batch.status = BatchStatus::Failed;
                }
                failed.append(&mut fixed);
                self.known_failed.extend(failed.iter().cloned());
                batch.counters.validations_failed = 1;
            }
            Some(result) if !result.passed => {
                // Non-critical failure degrades the score but keeps the
                // fixes.
                self.reclaim(&checkpoint)?;
                self.known_failed.extend(failed.iter().cloned());
                batch.counters.validations_failed = 1;
                batch.status = BatchStatus::Completed;
            }
            Some(_) => {
                self.reclaim(&checkpoint)?;
                self.known_failed.extend(failed.iter().cloned());
                batch.counters.validations_passed = 1;
                batch.status = BatchStatus::Completed;
            }
            None => {
                self.reclaim(&checkpoint)?;
                self.known_failed.extend(failed.iter().cloned());
                batch.status = BatchStatus::Completed;
            }
        }

        batch.counters.issues_fixed = fixed.len() as u32;
        batch.counters.issues_failed = failed.len() as u32;
        batch.ended_at = Some(Utc::now());

        info!(
            batch_id = %batch.id,
            status = batch.status.as_str(),
            fixed = batch.counters.issues_fixed,
            failed = batch.counters.issues_failed,
            "batch finished"
        );

        Ok(BatchResult {
            batch,
            validation,
            fixed_issues: fixed,
            failed_issues: failed,
            checkpoint,
        })
    }

    fn reclaim(&mut self, checkpoint: &Option<CheckpointRef>) -> Result<()> {
        if let Some(cp) = checkpoint {
            self.checkpoints.discard(cp)?;
        }
        Ok(())
    }
}

/// Unique files across a set of issues, in first-seen order.
fn unique_files(issues: &[Issue]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut files = Vec::new();
    for issue in issues {
        if seen.insert(issue.file.as_str()) {
            files.push(issue.file.clone());
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;
    use sweep_core::types::{IssueCategory, IssueContext, Resolution, RiskLevel, Severity};
    use tempfile::TempDir;

    fn setup_test_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        for args in [
            vec!["init"],
            vec!["config", "user.email", "test@test.com"],
            vec!["config", "user.name", "Test"],
        ] {
            StdCommand::new("git")
                .args(&args)
                .current_dir(dir.path())
                .output()
                .unwrap();
        }
        std::fs::write(dir.path().join("app.ts"), "let  x = 1;\n").unwrap();
        StdCommand::new("git")
            .args(["add", "."])
            .current_dir(dir.path())
            .output()
            .unwrap();
        StdCommand::new("git")
            .args(["commit", "-m", "initial"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        dir
    }

    fn issue(id: &str, file: &str, category: IssueCategory) -> Issue {
        Issue {
            id: Id::from_string(id),
            file: file.to_string(),
            line: 1,
            column: 1,
            rule: "no-multi-spaces".to_string(),
            category,
            secondary_category: None,
            severity: Severity::Warning,
            auto_fixable: true,
            resolution: Resolution {
                strategy: FixStrategy::AutoFix,
                confidence: 0.95,
                risk: RiskLevel::Low,
            },
            context: IssueContext::default(),
        }
    }

    /// Fixer that rewrites each issue's file with fixed content.
    struct RewriteFixer {
        content: String,
    }

    impl Fixer for RewriteFixer {
        async fn apply(
            &self,
            issues: &[Issue],
            workspace_root: &Path,
        ) -> std::result::Result<FixOutcome, FixError> {
            for file in unique_files(issues) {
                std::fs::write(workspace_root.join(file), &self.content)?;
            }
            Ok(FixOutcome {
                fixed: issues.iter().map(|i| i.id.clone()).collect(),
                failed: Vec::new(),
            })
        }
    }

    fn processor(
        dir: &TempDir,
        fixer: RewriteFixer,
        compile_cmd: &str,
    ) -> BatchProcessor<RewriteFixer> {
        let mut config = EngineConfig::default();
        config.compile_cmd = Some(compile_cmd.to_string());
        BatchProcessor::new(fixer, config, dir.path(), Box::new(|_| false))
    }

    #[test]
    fn select_eligible_applies_all_filters() {
        let dir = setup_test_repo();
        let fixer = RewriteFixer {
            content: String::new(),
        };
        let mut config = EngineConfig::default();
        config.confidence_min = 0.8;
        config.max_risk = RiskLevel::Medium;
        let mut proc = BatchProcessor::new(
            fixer,
            config,
            dir.path(),
            Box::new(|file: &str| file.contains("payments/")),
        );

        let mut low_confidence = issue("i2", "a.ts", IssueCategory::Formatting);
        low_confidence.resolution.confidence = 0.5;
        let mut high_risk = issue("i3", "a.ts", IssueCategory::Formatting);
        high_risk.resolution.risk = RiskLevel::High;
        let mut manual = issue("i4", "a.ts", IssueCategory::Formatting);
        manual.resolution.strategy = FixStrategy::ManualReview;
        let sensitive = issue("i5", "payments/ledger.ts", IssueCategory::Formatting);
        let wrong_phase = issue("i6", "a.ts", IssueCategory::UnusedSymbol);
        let failed_before = issue("i7", "a.ts", IssueCategory::Formatting);
        proc.mark_failed([Id::from_string("i7")]);

        let issues = vec![
            issue("i1", "a.ts", IssueCategory::Formatting),
            low_confidence,
            high_risk,
            manual,
            sensitive,
            wrong_phase,
            failed_before,
        ];

        let eligible = proc.select_eligible(PhaseKind::AutoFix, &issues);
        let ids: Vec<&str> = eligible.iter().map(|i| i.id.as_ref()).collect();
        assert_eq!(ids, vec!["i1"]);
    }

    #[test]
    fn domain_phase_admits_risk_sensitive_files() {
        let dir = setup_test_repo();
        let fixer = RewriteFixer {
            content: String::new(),
        };
        let proc = BatchProcessor::new(
            fixer,
            EngineConfig::default(),
            dir.path(),
            Box::new(|file: &str| file.contains("payments/")),
        );

        let issues = vec![issue("i1", "payments/ledger.ts", IssueCategory::Correctness)];
        assert!(proc.select_eligible(PhaseKind::AutoFix, &issues).is_empty());
        assert_eq!(
            proc.select_eligible(PhaseKind::DomainSensitiveCleanup, &issues)
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn successful_batch_keeps_fixes_and_discards_checkpoint() {
        let dir = setup_test_repo();
        let fixer = RewriteFixer {
            content: "let x = 1;\n".to_string(),
        };
        let mut proc = processor(&dir, fixer, "true");

        let issues = vec![issue("i1", "app.ts", IssueCategory::Formatting)];
        let result = proc
            .run_batch(&Id::from_string("c1"), 1, PhaseKind::AutoFix, &issues)
            .await
            .unwrap();

        assert_eq!(result.batch.status, BatchStatus::Completed);
        assert_eq!(result.batch.counters.issues_fixed, 1);
        assert_eq!(result.batch.counters.validations_passed, 1);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("app.ts")).unwrap(),
            "let x = 1;\n"
        );
        // Checkpoint reclaimed: nothing left in the stash.
        let stash = StdCommand::new("git")
            .args(["stash", "list"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        assert!(stash.stdout.is_empty());
    }

    #[tokio::test]
    async fn critical_failure_rolls_back_and_records_failures() {
        let dir = setup_test_repo();
        let fixer = RewriteFixer {
            content: "broken;\n".to_string(),
        };
        let mut proc = processor(&dir, fixer, "exit 1");

        let issues = vec![issue("i1", "app.ts", IssueCategory::Formatting)];
        let result = proc
            .run_batch(&Id::from_string("c1"), 1, PhaseKind::AutoFix, &issues)
            .await
            .unwrap();

        assert_eq!(result.batch.status, BatchStatus::RolledBack);
        assert_eq!(result.batch.counters.rollbacks_triggered, 1);
        assert_eq!(result.batch.counters.issues_fixed, 0);
        assert_eq!(result.batch.counters.issues_failed, 1);
        // The tree is back to its pre-batch content.
        assert_eq!(
            std::fs::read_to_string(dir.path().join("app.ts")).unwrap(),
            "let  x = 1;\n"
        );
        // Failed issues are never retried.
        assert!(proc.select_eligible(PhaseKind::AutoFix, &issues).is_empty());
    }

    #[tokio::test]
    async fn non_critical_failure_keeps_fixes() {
        let dir = setup_test_repo();
        let fixer = RewriteFixer {
            content: "let x = 1;\n".to_string(),
        };
        let mut config = EngineConfig::default();
        // Only a build check, which is not in the critical set.
        config.build_cmd = Some("exit 1".to_string());
        let mut proc = BatchProcessor::new(fixer, config, dir.path(), Box::new(|_| false));

        let issues = vec![issue("i1", "app.ts", IssueCategory::Formatting)];
        let result = proc
            .run_batch(&Id::from_string("c1"), 1, PhaseKind::AutoFix, &issues)
            .await
            .unwrap();

        assert_eq!(result.batch.status, BatchStatus::Completed);
        assert_eq!(result.batch.counters.validations_failed, 1);
        let validation = result.validation.unwrap();
        assert!(!validation.passed);
        assert!(!validation.requires_rollback);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("app.ts")).unwrap(),
            "let x = 1;\n"
        );
    }

    #[tokio::test]
    async fn rollback_disabled_takes_no_checkpoint() {
        let dir = setup_test_repo();
        // A leftover stash entry under the managed prefix would reject a
        // checkpoint; with rollback disabled it must not even be inspected.
        std::fs::write(dir.path().join("app.ts"), "leftover\n").unwrap();
        StdCommand::new("git")
            .args(["stash", "push", "-m", "sweep/ckpt/orphan: pre-batch"])
            .current_dir(dir.path())
            .output()
            .unwrap();

        let fixer = RewriteFixer {
            content: "let x = 1;\n".to_string(),
        };
        let mut config = EngineConfig::default();
        config.enable_rollback = false;
        config.compile_cmd = Some("true".to_string());
        let mut proc = BatchProcessor::new(fixer, config, dir.path(), Box::new(|_| false));

        let issues = vec![issue("i1", "app.ts", IssueCategory::Formatting)];
        let result = proc
            .run_batch(&Id::from_string("c1"), 1, PhaseKind::AutoFix, &issues)
            .await
            .unwrap();

        assert_eq!(result.batch.status, BatchStatus::Completed);
        assert!(result.checkpoint.is_none());
        // The orphan entry is untouched.
        let stash = StdCommand::new("git")
            .args(["stash", "list"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        assert!(String::from_utf8_lossy(&stash.stdout).contains("sweep/ckpt/orphan"));
    }

    #[tokio::test]
    async fn critical_failure_with_rollback_disabled_fails_in_place() {
        let dir = setup_test_repo();
        let fixer = RewriteFixer {
            content: "broken;\n".to_string(),
        };
        let mut config = EngineConfig::default();
        config.enable_rollback = false;
        config.compile_cmd = Some("exit 1".to_string());
        let mut proc = BatchProcessor::new(fixer, config, dir.path(), Box::new(|_| false));

        let issues = vec![issue("i1", "app.ts", IssueCategory::Formatting)];
        let result = proc
            .run_batch(&Id::from_string("c1"), 1, PhaseKind::AutoFix, &issues)
            .await
            .unwrap();

        assert_eq!(result.batch.status, BatchStatus::Failed);
        assert_eq!(result.batch.counters.rollbacks_triggered, 0);
        // The broken fix stays in the tree; the issues go on the ledger.
        assert_eq!(
            std::fs::read_to_string(dir.path().join("app.ts")).unwrap(),
            "broken;\n"
        );
        assert_eq!(proc.known_failed_count(), 1);
    }

    #[tokio::test]
    async fn dry_run_changes_nothing() {
        let dir = setup_test_repo();
        let fixer = RewriteFixer {
            content: "would change\n".to_string(),
        };
        let mut config = EngineConfig::default();
        config.dry_run = true;
        let mut proc = BatchProcessor::new(fixer, config, dir.path(), Box::new(|_| false));

        let issues = vec![issue("i1", "app.ts", IssueCategory::Formatting)];
        let result = proc
            .run_batch(&Id::from_string("c1"), 1, PhaseKind::AutoFix, &issues)
            .await
            .unwrap();

        assert_eq!(result.batch.status, BatchStatus::Completed);
        assert_eq!(result.batch.counters.issues_attempted, 1);
        assert_eq!(result.batch.counters.issues_fixed, 0);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("app.ts")).unwrap(),
            "let  x = 1;\n"
        );
    }

    #[tokio::test]
    async fn command_fixer_failure_marks_all_issues_failed() {
        let dir = setup_test_repo();
        let fixer = CommandFixer::new("exit 3", 10);
        let mut config = EngineConfig::default();
        config.compile_cmd = Some("true".to_string());
        let mut proc = BatchProcessor::new(fixer, config, dir.path(), Box::new(|_| false));

        let issues = vec![
            issue("i1", "app.ts", IssueCategory::Formatting),
            issue("i2", "app.ts", IssueCategory::Formatting),
        ];
        let result = proc
            .run_batch(&Id::from_string("c1"), 1, PhaseKind::AutoFix, &issues)
            .await
            .unwrap();

        assert_eq!(result.batch.counters.issues_fixed, 0);
        assert_eq!(result.batch.counters.issues_failed, 2);
        assert_eq!(proc.known_failed_count(), 2);
    }

    #[tokio::test]
    async fn command_fixer_expands_files_placeholder() {
        let dir = setup_test_repo();
        let fixer = CommandFixer::new("test \"{files}\" = \"app.ts\"", 10);
        let issues = vec![issue("i1", "app.ts", IssueCategory::Formatting)];
        let outcome = fixer.apply(&issues, dir.path()).await.unwrap();
        assert_eq!(outcome.fixed.len(), 1);
        assert!(outcome.failed.is_empty());
    }

    #[test]
    fn chunk_splits_by_batch_size() {
        let dir = setup_test_repo();
        let fixer = RewriteFixer {
            content: String::new(),
        };
        let mut config = EngineConfig::default();
        config.batch_size = 3;
        let proc = BatchProcessor::new(fixer, config, dir.path(), Box::new(|_| false));

        let issues: Vec<Issue> = (0..7)
            .map(|i| issue(&format!("i{i}"), "a.ts", IssueCategory::Formatting))
            .collect();
        let refs: Vec<&Issue> = issues.iter().collect();
        let chunks = proc.chunk(&refs);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 3);
        assert_eq!(chunks[2].len(), 1);
    }
}
