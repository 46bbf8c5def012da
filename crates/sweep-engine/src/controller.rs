//! Campaign controller: phase sequencing, persistence, and halt policy.
//!
//! Phases run in a fixed order and batches within them run strictly one at
//! a time. State is persisted after every batch so a crash or cancellation
//! loses at most the in-flight batch. Two conditions halt a campaign
//! outright: a failed rollback (working tree integrity unknown) and the
//! configured rollback limit being exceeded. A phase that under-performs
//! its targets is recorded as a warning and the campaign proceeds.

use chrono::Utc;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use sweep_core::config::EngineConfig;
use sweep_core::events::{
    BatchPayload, CampaignEndPayload, CampaignPayload, CheckpointPayload, EventPayload,
    PhasePayload, ValidationPayload,
};
use sweep_core::report::{BatchOutcome, CampaignSummary, ReportRow, ReportWriter};
use sweep_core::types::{
    BatchStatus, CampaignRun, CampaignStatus, CampaignTargets, ComprehensiveValidationResult, Id,
    Issue, PhaseKind, PhaseState, QualityMetrics,
};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::batch::{BatchError, BatchProcessor, BatchResult, Fixer};
use crate::checkpoint::{self, CheckpointError};
use crate::gate::{self, GateInput};
use crate::progress::{BaselineSignals, ProgressTracker};
use crate::store::{Store, StorageError};

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error("not a git workspace: {0}")]
    NotGitWorkspace(String),
    #[error("campaign is not resumable from status {0}")]
    NotResumable(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ControllerError>;

/// What to run: a named campaign over an ordered set of phases.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CampaignPlan {
    pub name: String,
    #[serde(default = "default_phases")]
    pub phases: Vec<PhaseKind>,
    #[serde(default)]
    pub targets: CampaignTargets,
}

fn default_phases() -> Vec<PhaseKind> {
    vec![
        PhaseKind::AutoFix,
        PhaseKind::UnusedSymbolCleanup,
        PhaseKind::ImportCleanup,
        PhaseKind::DomainSensitiveCleanup,
    ]
}

impl CampaignPlan {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phases: default_phases(),
            targets: CampaignTargets::default(),
        }
    }
}

/// Drives a campaign end to end.
pub struct CampaignController<F> {
    config: EngineConfig,
    store: Store,
    processor: BatchProcessor<F>,
    tracker: ProgressTracker,
    workspace_root: PathBuf,
    metrics_tx: watch::Sender<QualityMetrics>,
    cancel: CancellationToken,
    validations: Vec<ComprehensiveValidationResult>,
    /// (issue id, rule) pairs of the backlog this run operates on.
    backlog: Vec<(Id, String)>,
    fixed_issues: HashSet<Id>,
}

impl<F> std::fmt::Debug for CampaignController<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CampaignController")
            .field("workspace_root", &self.workspace_root)
            .finish_non_exhaustive()
    }
}

impl<F: Fixer> CampaignController<F> {
    /// Build a controller and the metrics channel the monitor subscribes to.
    pub fn new(
        config: EngineConfig,
        store: Store,
        fixer: F,
        workspace_root: impl Into<PathBuf>,
        risk_predicate: Arc<dyn Fn(&str) -> bool + Send + Sync>,
        cancel: CancellationToken,
    ) -> (Self, watch::Receiver<QualityMetrics>) {
        let workspace_root = workspace_root.into();
        let processor_pred = Arc::clone(&risk_predicate);
        let tracker_pred = Arc::clone(&risk_predicate);

        let processor = BatchProcessor::new(
            fixer,
            config.clone(),
            &workspace_root,
            Box::new(move |file: &str| processor_pred(file)),
        );
        let tracker = ProgressTracker::new(
            &config,
            CampaignTargets::default(),
            Box::new(move |file: &str| tracker_pred(file)),
        );

        let (metrics_tx, metrics_rx) = watch::channel(QualityMetrics::default());
        (
            Self {
                config,
                store,
                processor,
                tracker,
                workspace_root,
                metrics_tx,
                cancel,
                validations: Vec::new(),
                backlog: Vec::new(),
                fixed_issues: HashSet::new(),
            },
            metrics_rx,
        )
    }

    /// Start a new campaign over the given backlog.
    pub async fn run(
        &mut self,
        plan: CampaignPlan,
        issues: Vec<Issue>,
        signals: BaselineSignals,
    ) -> Result<CampaignSummary> {
        if !checkpoint::is_git_workspace(&self.workspace_root) {
            return Err(ControllerError::NotGitWorkspace(
                self.workspace_root.display().to_string(),
            ));
        }

        self.tracker.set_targets(plan.targets.clone());
        let baseline = self.tracker.establish_baseline(&issues, signals).clone();

        let mut run = CampaignRun {
            name: plan.name.clone(),
            status: CampaignStatus::Running,
            workspace_root: self.workspace_root.display().to_string(),
            baseline: Some(baseline),
            targets: plan.targets.clone(),
            phases: plan
                .phases
                .iter()
                .map(|&kind| PhaseState {
                    kind,
                    completed: false,
                    batches_completed: 0,
                    warning: None,
                })
                .collect(),
            ..CampaignRun::default()
        };

        self.store.insert_campaign(&run).await?;
        self.store
            .append_event(
                &run.id,
                None,
                &EventPayload::CampaignCreated(CampaignPayload {
                    campaign_id: run.id.clone(),
                    name: run.name.clone(),
                    total_issues: issues.len() as u32,
                }),
            )
            .await?;

        info!(
            campaign_id = %run.id,
            name = %run.name,
            issues = issues.len(),
            phases = run.phases.len(),
            "campaign started"
        );

        self.execute(&mut run, &issues).await
    }

    /// Resume a previously persisted campaign over the current backlog.
    pub async fn resume(
        &mut self,
        campaign_id: &Id,
        issues: Vec<Issue>,
    ) -> Result<CampaignSummary> {
        if !checkpoint::is_git_workspace(&self.workspace_root) {
            return Err(ControllerError::NotGitWorkspace(
                self.workspace_root.display().to_string(),
            ));
        }

        let mut run = self.store.get_campaign(campaign_id).await?;
        match run.status {
            CampaignStatus::Pending | CampaignStatus::Running => {}
            status => return Err(ControllerError::NotResumable(status.as_str().to_string())),
        }

        self.tracker.set_targets(run.targets.clone());
        self.tracker.resume(run.baseline.clone(), run.counters);
        // Issues that failed before this process started are never retried.
        self.processor
            .mark_failed(run.failed_issue_ids.iter().cloned());
        run.status = CampaignStatus::Running;
        self.store.save_campaign(&run).await?;
        self.store
            .append_event(
                campaign_id,
                None,
                &EventPayload::CampaignResumed(CampaignPayload {
                    campaign_id: campaign_id.clone(),
                    name: run.name.clone(),
                    total_issues: issues.len() as u32,
                }),
            )
            .await?;

        info!(
            campaign_id = %campaign_id,
            last_completed_batch = run.last_completed_batch,
            "campaign resumed"
        );

        self.execute(&mut run, &issues).await
    }

    /// Run all incomplete phases, persisting after every batch.
    async fn execute(
        &mut self,
        run: &mut CampaignRun,
        issues: &[Issue],
    ) -> Result<CampaignSummary> {
        self.backlog = issues
            .iter()
            .map(|i| (i.id.clone(), i.rule.clone()))
            .collect();

        let mut report = self.open_report()?;
        self.write_row(
            &mut report,
            ReportRow::new(Utc::now().timestamp_millis(), "CAMPAIGN_START")
                .with_message(run.name.clone()),
        );

        let mut sequence = run.last_completed_batch;
        let mut cancelled = false;

        for phase_index in 0..run.phases.len() {
            let phase = run.phases[phase_index].kind;
            if run.phases[phase_index].completed {
                continue;
            }
            if cancelled || self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            self.store
                .append_event(
                    &run.id,
                    None,
                    &EventPayload::PhaseStarted(PhasePayload {
                        campaign_id: run.id.clone(),
                        phase,
                        warning: None,
                    }),
                )
                .await?;
            info!(campaign_id = %run.id, phase = phase.as_str(), "phase started");

            let eligible: Vec<Issue> = self
                .processor
                .select_eligible(phase, issues)
                .into_iter()
                .cloned()
                .collect();
            let eligible_refs: Vec<&Issue> = eligible.iter().collect();
            let chunks = self.processor.chunk(&eligible_refs);
            let mut phase_fixed = 0u32;

            for chunk in chunks {
                // Cancellation is honored between batches; an in-flight
                // batch always finishes validating.
                if self.cancel.is_cancelled() {
                    info!(campaign_id = %run.id, "cancellation requested, stopping cleanly");
                    cancelled = true;
                    break;
                }

                sequence += 1;
                let owned: Vec<Issue> = chunk.into_iter().cloned().collect();
                let started = std::time::Instant::now();

                let result = match self.processor.run_batch(&run.id, sequence, phase, &owned).await
                {
                    Ok(result) => result,
                    Err(BatchError::Checkpoint(CheckpointError::RestoreFailed(reason))) => {
                        // The tree is in an unknown state. Nothing else is
                        // safe to run.
                        error!(campaign_id = %run.id, %reason, "rollback failed, halting campaign");
                        return self
                            .halt(run, format!("rollback failed: {reason}"), &mut report)
                            .await;
                    }
                    Err(e) => return Err(e.into()),
                };

                let duration_ms = started.elapsed().as_millis() as u64;
                phase_fixed += result.batch.counters.issues_fixed;
                self.record_batch(run, &result, duration_ms, &mut report)
                    .await?;
                run.phases[phase_index].batches_completed += 1;
                run.last_completed_batch = sequence;

                if result.rolled_back() {
                    run.rollback_count += 1;
                    if run.rollback_count >= self.config.max_failures_before_stop {
                        warn!(
                            campaign_id = %run.id,
                            rollback_count = run.rollback_count,
                            "rollback limit reached, halting campaign"
                        );
                        return self
                            .halt(
                                run,
                                format!(
                                    "rollback limit exceeded ({} rollbacks)",
                                    run.rollback_count
                                ),
                                &mut report,
                            )
                            .await;
                    }
                } else if result.batch.status == BatchStatus::Failed
                    && !self.config.continue_on_error
                {
                    warn!(campaign_id = %run.id, "batch failed, halting campaign");
                    return self
                        .halt(
                            run,
                            format!("batch {sequence} failed and continue_on_error is disabled"),
                            &mut report,
                        )
                        .await;
                } else if result.batch.status == BatchStatus::Completed {
                    run.last_good_checkpoint =
                        result.checkpoint.as_ref().map(|cp| cp.label.clone());
                }

                self.persist_progress(run).await?;
            }

            if !cancelled {
                // An under-performing phase is a warning, never a halt.
                if !eligible.is_empty() && phase_fixed == 0 {
                    let warning = format!(
                        "phase fixed 0 of {} eligible issues",
                        eligible.len()
                    );
                    warn!(campaign_id = %run.id, phase = phase.as_str(), %warning);
                    run.phases[phase_index].warning = Some(warning);
                }
                run.phases[phase_index].completed = true;
            }

            self.store
                .append_event(
                    &run.id,
                    None,
                    &EventPayload::PhaseFinished(PhasePayload {
                        campaign_id: run.id.clone(),
                        phase,
                        warning: run.phases[phase_index].warning.clone(),
                    }),
                )
                .await?;
            self.persist_progress(run).await?;
        }

        if !cancelled {
            run.status = CampaignStatus::Completed;
        }
        self.finish(run, &mut report).await
    }

    /// Persist one batch outcome: row, event, counters, metrics.
    async fn record_batch(
        &mut self,
        run: &mut CampaignRun,
        result: &BatchResult,
        duration_ms: u64,
        report: &mut Option<ReportWriter>,
    ) -> Result<()> {
        self.store.save_batch(&result.batch).await?;
        self.tracker.record_batch(result);
        self.fixed_issues.extend(result.fixed_issues.iter().cloned());
        for id in &result.failed_issues {
            if !run.failed_issue_ids.contains(id) {
                run.failed_issue_ids.push(id.clone());
            }
        }

        let payload = BatchPayload {
            batch_id: result.batch.id.clone(),
            sequence: result.batch.sequence,
            issues_attempted: result.batch.counters.issues_attempted,
            issues_fixed: result.batch.counters.issues_fixed,
            duration_ms,
        };
        let event = match result.batch.status {
            BatchStatus::RolledBack => EventPayload::BatchRolledBack(payload),
            BatchStatus::Failed => EventPayload::BatchFailed(payload),
            _ => EventPayload::BatchCompleted(payload),
        };
        self.store
            .append_event(&run.id, Some(&result.batch.id), &event)
            .await?;

        if result.batch.status == BatchStatus::RolledBack {
            if let Some(cp) = &result.checkpoint {
                self.store
                    .append_event(
                        &run.id,
                        Some(&result.batch.id),
                        &EventPayload::CheckpointRestored(CheckpointPayload {
                            batch_id: result.batch.id.clone(),
                            label: cp.label.clone(),
                            snapshot: cp.snapshot.clone(),
                        }),
                    )
                    .await?;
            }
        }

        if let Some(validation) = &result.validation {
            self.store
                .append_event(
                    &run.id,
                    Some(&result.batch.id),
                    &EventPayload::ValidationFinished(ValidationPayload {
                        batch_id: result.batch.id.clone(),
                        passed: validation.passed,
                        quality_score: validation.quality_score,
                        requires_rollback: validation.requires_rollback,
                        failed_checks: validation
                            .results
                            .iter()
                            .filter(|r| !r.passed)
                            .map(|r| r.kind)
                            .collect(),
                        total_errors: validation
                            .results
                            .iter()
                            .map(|r| r.errors.len() as u32)
                            .sum(),
                        total_warnings: validation
                            .results
                            .iter()
                            .map(|r| r.warnings.len() as u32)
                            .sum(),
                        slowest_check_ms: validation
                            .results
                            .iter()
                            .map(|r| r.duration_ms)
                            .max()
                            .unwrap_or(0),
                    }),
                )
                .await?;
            self.validations.push(validation.clone());
        }

        let mut row = ReportRow::new(Utc::now().timestamp_millis(), "BATCH_END")
            .with_batch(result.batch.sequence)
            .with_duration_ms(duration_ms)
            .with_issue_counts(
                result.batch.counters.issues_attempted,
                result.batch.counters.issues_fixed,
                result.batch.counters.issues_failed,
            )
            .with_message(result.batch.status.as_str());
        if let Some(validation) = &result.validation {
            row = row.with_quality_score(validation.quality_score);
        }
        self.write_row(report, row);

        let metrics = self.tracker.snapshot();
        self.store
            .append_metrics(&run.id, &metrics, self.config.history_capacity)
            .await?;
        // The monitor may have gone away; that is fine.
        let _ = self.metrics_tx.send(metrics);
        Ok(())
    }

    /// Fold tracker figures into the run and persist it.
    async fn persist_progress(&mut self, run: &mut CampaignRun) -> Result<()> {
        run.counters = self.tracker.counters();
        run.velocity = self.tracker.velocity(Utc::now());
        run.roi_minutes_saved = self.tracker.roi_minutes_saved();
        run.remaining_rules = self.remaining_rules();
        run.updated_at = Utc::now();
        self.store.save_campaign(run).await?;
        Ok(())
    }

    /// Distinct rule ids of backlog issues this run has not fixed, in
    /// first-seen order.
    fn remaining_rules(&self) -> Vec<String> {
        let mut rules: Vec<String> = Vec::new();
        for (id, rule) in &self.backlog {
            if !self.fixed_issues.contains(id) && !rules.contains(rule) {
                rules.push(rule.clone());
            }
        }
        rules
    }

    /// Terminate the campaign with a fatal reason.
    async fn halt(
        &mut self,
        run: &mut CampaignRun,
        reason: String,
        report: &mut Option<ReportWriter>,
    ) -> Result<CampaignSummary> {
        run.status = CampaignStatus::Halted;
        run.halt_reason = Some(reason.clone());
        self.persist_progress(run).await?;

        self.store
            .append_event(
                &run.id,
                None,
                &EventPayload::CampaignHalted(CampaignEndPayload {
                    campaign_id: run.id.clone(),
                    eliminated: run.counters.eliminated,
                    remaining: run.counters.remaining,
                    halt_reason: Some(reason.clone()),
                    last_good_checkpoint: run.last_good_checkpoint.clone(),
                }),
            )
            .await?;
        self.write_row(
            report,
            ReportRow::new(Utc::now().timestamp_millis(), "CAMPAIGN_HALT").with_message(reason),
        );
        self.summarize(run, report).await
    }

    /// Wrap up: final event, summary row, summary.json.
    async fn finish(
        &mut self,
        run: &mut CampaignRun,
        report: &mut Option<ReportWriter>,
    ) -> Result<CampaignSummary> {
        self.persist_progress(run).await?;
        if run.status == CampaignStatus::Completed {
            self.store
                .append_event(
                    &run.id,
                    None,
                    &EventPayload::CampaignCompleted(CampaignEndPayload {
                        campaign_id: run.id.clone(),
                        eliminated: run.counters.eliminated,
                        remaining: run.counters.remaining,
                        halt_reason: None,
                        last_good_checkpoint: run.last_good_checkpoint.clone(),
                    }),
                )
                .await?;
        }
        self.write_row(
            report,
            ReportRow::new(Utc::now().timestamp_millis(), "CAMPAIGN_END")
                .with_message(run.status.as_str()),
        );
        self.summarize(run, report).await
    }

    async fn summarize(
        &mut self,
        run: &CampaignRun,
        report: &mut Option<ReportWriter>,
    ) -> Result<CampaignSummary> {
        if let Some(writer) = report {
            writer.flush()?;
        }

        let metrics = self.tracker.snapshot();
        let gate_result = gate::evaluate(
            &metrics,
            &GateInput::from_validations(&self.validations, self.remaining_rules()),
            &self.config.gate,
        );

        let batches = self
            .store
            .list_batches(&run.id)
            .await?
            .into_iter()
            .map(|b| BatchOutcome {
                sequence: b.sequence,
                status: b.status,
                attempted: b.counters.issues_attempted,
                fixed: b.counters.issues_fixed,
                failed: b.counters.issues_failed,
                quality_score: None,
            })
            .collect();

        let summary = CampaignSummary {
            campaign_id: run.id.clone(),
            name: run.name.clone(),
            status: run.status,
            quality_score: metrics.overall_score,
            eliminated: run.counters.eliminated,
            remaining: run.counters.remaining,
            rollback_count: run.rollback_count,
            batches,
            halt_reason: run.halt_reason.clone(),
            last_good_checkpoint: run.last_good_checkpoint.clone(),
            blockers: gate_result.blockers,
            recommendations: gate_result.recommendations,
        };
        summary.write_json(&self.config.state_dir.join("summary.json"))?;

        info!(
            campaign_id = %run.id,
            status = run.status.as_str(),
            eliminated = summary.eliminated,
            remaining = summary.remaining,
            rollbacks = summary.rollback_count,
            "campaign finished"
        );
        Ok(summary)
    }

    fn open_report(&self) -> Result<Option<ReportWriter>> {
        let path = self.config.state_dir.join("report.tsv");
        Ok(Some(ReportWriter::new(&path)?))
    }

    fn write_row(&self, report: &mut Option<ReportWriter>, row: ReportRow) {
        if let Some(writer) = report {
            if let Err(e) = writer.write_row(&row) {
                warn!(error = %e, "failed to write report row");
            }
        }
    }
}
