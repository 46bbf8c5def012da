//! Progress tracker: baseline, per-batch accounting, and quality metrics.
//!
//! All figures here are reporting-grade: the ROI number is an explicit
//! estimate (eliminated items times a configured minutes-per-item constant)
//! and the baseline carries a confidence score that drops for every
//! sub-measurement that failed to collect, rather than silently trusting
//! partial data.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use sweep_core::config::EngineConfig;
use sweep_core::types::{
    Baseline, CampaignCounters, CampaignTargets, CheckKind, Issue, QualityMetrics, Severity,
};
use tracing::{debug, info};

use crate::batch::BatchResult;

/// Optional environment measurements taken alongside the issue scan.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaselineSignals {
    pub compile_errors: Option<u32>,
    pub build_time_ms: Option<u64>,
    pub file_inventory: Option<u32>,
}

/// Tracks campaign progress against a baseline.
pub struct ProgressTracker {
    targets: CampaignTargets,
    roi_minutes_per_item: f64,
    baseline_penalty: u8,
    history_capacity: usize,
    risk_predicate: Box<dyn Fn(&str) -> bool + Send + Sync>,

    baseline: Option<Baseline>,
    counters: CampaignCounters,
    started_at: DateTime<Utc>,
    validations_passed: u32,
    validations_failed: u32,
    integrity_failures: u32,
    history: VecDeque<QualityMetrics>,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("counters", &self.counters)
            .field("history_len", &self.history.len())
            .finish_non_exhaustive()
    }
}

impl ProgressTracker {
    pub fn new(
        config: &EngineConfig,
        targets: CampaignTargets,
        risk_predicate: Box<dyn Fn(&str) -> bool + Send + Sync>,
    ) -> Self {
        Self {
            targets,
            roi_minutes_per_item: config.roi_minutes_per_item,
            baseline_penalty: config.baseline_penalty,
            history_capacity: config.history_capacity,
            risk_predicate,
            baseline: None,
            counters: CampaignCounters::default(),
            started_at: Utc::now(),
            validations_passed: 0,
            validations_failed: 0,
            integrity_failures: 0,
            history: VecDeque::new(),
        }
    }

    /// Replace the targets snapshots are scored against.
    pub fn set_targets(&mut self, targets: CampaignTargets) {
        self.targets = targets;
    }

    pub fn baseline(&self) -> Option<&Baseline> {
        self.baseline.as_ref()
    }

    pub fn counters(&self) -> CampaignCounters {
        self.counters
    }

    /// Measure the starting state the campaign is scored against.
    ///
    /// Confidence starts at 100 and loses a fixed penalty for every signal
    /// that could not be collected.
    pub fn establish_baseline(&mut self, issues: &[Issue], signals: BaselineSignals) -> &Baseline {
        let mut by_category: Vec<(sweep_core::types::IssueCategory, u32)> = Vec::new();
        let mut by_severity: Vec<(Severity, u32)> = Vec::new();
        let mut domain_issues = 0u32;

        for issue in issues {
            match by_category.iter_mut().find(|(c, _)| *c == issue.category) {
                Some((_, n)) => *n += 1,
                None => by_category.push((issue.category, 1)),
            }
            match by_severity.iter_mut().find(|(s, _)| *s == issue.severity) {
                Some((_, n)) => *n += 1,
                None => by_severity.push((issue.severity, 1)),
            }
            if issue.context.risk_sensitive || (self.risk_predicate)(&issue.file) {
                domain_issues += 1;
            }
        }

        let missing = [
            signals.compile_errors.is_none(),
            signals.build_time_ms.is_none(),
            signals.file_inventory.is_none(),
        ]
        .iter()
        .filter(|m| **m)
        .count() as u8;
        let confidence = 100u8.saturating_sub(missing.saturating_mul(self.baseline_penalty));

        let total = issues.len() as u32;
        let baseline = Baseline {
            total_issues: total,
            issues_by_category: by_category,
            issues_by_severity: by_severity,
            domain_issues,
            compile_errors: signals.compile_errors,
            build_time_ms: signals.build_time_ms,
            file_inventory: signals.file_inventory,
            confidence,
            captured_at: Some(Utc::now()),
        };

        info!(
            total_issues = total,
            domain_issues,
            confidence,
            "baseline established"
        );

        self.counters.remaining = total;
        self.started_at = Utc::now();
        self.baseline = Some(baseline);
        self.baseline.as_ref().unwrap_or_else(|| unreachable!())
    }

    /// Restore tracker state when resuming a persisted campaign.
    pub fn resume(&mut self, baseline: Option<Baseline>, counters: CampaignCounters) {
        self.baseline = baseline;
        self.counters = counters;
        self.started_at = Utc::now();
    }

    /// Fold one batch outcome into the running totals.
    pub fn record_batch(&mut self, result: &BatchResult) {
        let fixed = result.batch.counters.issues_fixed;
        self.counters.eliminated += fixed;
        self.counters.remaining = self.remaining_invariant();

        self.validations_passed += result.batch.counters.validations_passed;
        self.validations_failed += result.batch.counters.validations_failed;

        if let Some(validation) = &result.validation {
            let integrity_broken = validation.results.iter().any(|r| {
                !r.passed && matches!(r.kind, CheckKind::Component | CheckKind::Service)
            });
            if integrity_broken {
                self.integrity_failures += 1;
            }
        }

        debug!(
            eliminated = self.counters.eliminated,
            remaining = self.counters.remaining,
            "progress updated"
        );
    }

    /// Record issues intentionally left in place (manual review, policy).
    pub fn record_preserved(&mut self, count: u32) {
        self.counters.preserved += count;
    }

    /// Record issues converted rather than removed (e.g. suppressions made
    /// explicit).
    pub fn record_transformed(&mut self, count: u32) {
        self.counters.transformed += count;
        self.counters.remaining = self.remaining_invariant();
    }

    /// remaining = total - eliminated - transformed, floored at zero.
    fn remaining_invariant(&self) -> u32 {
        let total = self.baseline.as_ref().map_or(0, |b| b.total_issues);
        total
            .saturating_sub(self.counters.eliminated)
            .saturating_sub(self.counters.transformed)
    }

    /// Issue reduction relative to the baseline, in percent.
    pub fn reduction_pct(&self) -> f64 {
        let total = self.baseline.as_ref().map_or(0, |b| b.total_issues);
        if total == 0 {
            return 0.0;
        }
        let gone = self.counters.eliminated + self.counters.transformed;
        f64::from(gone) / f64::from(total) * 100.0
    }

    /// Items eliminated per minute since the baseline was taken.
    pub fn velocity(&self, now: DateTime<Utc>) -> f64 {
        let minutes = (now - self.started_at).num_seconds() as f64 / 60.0;
        if minutes <= 0.0 {
            return 0.0;
        }
        f64::from(self.counters.eliminated) / minutes
    }

    /// Estimated minutes until the remaining backlog is gone, at the
    /// current velocity. None when velocity is zero.
    pub fn estimated_minutes_remaining(&self, now: DateTime<Utc>) -> Option<f64> {
        let velocity = self.velocity(now);
        if velocity <= 0.0 {
            return None;
        }
        Some(f64::from(self.counters.remaining) / velocity)
    }

    /// Estimated maintenance minutes saved. An estimate for reporting, not
    /// a measurement.
    pub fn roi_minutes_saved(&self) -> f64 {
        f64::from(self.counters.eliminated) * self.roi_minutes_per_item
    }

    /// Validation pass rate mapped to 0-100.
    fn build_stability(&self) -> u8 {
        let total = self.validations_passed + self.validations_failed;
        if total == 0 {
            return 100;
        }
        (f64::from(self.validations_passed) / f64::from(total) * 100.0).round() as u8
    }

    /// 100 minus 20 per batch that broke component or service integrity.
    fn domain_integrity(&self) -> u8 {
        100u8.saturating_sub(self.integrity_failures.saturating_mul(20).min(100) as u8)
    }

    /// Take a metrics snapshot and append it to the bounded history.
    pub fn snapshot(&mut self) -> QualityMetrics {
        let reduction = self.reduction_pct();
        let stability = self.build_stability();
        let integrity = self.domain_integrity();

        // Composite: reduction progress toward target carries the most
        // weight, stability and integrity split the rest.
        let reduction_score = if self.targets.reduction_pct > 0.0 {
            (reduction / self.targets.reduction_pct * 100.0).min(100.0)
        } else {
            100.0
        };
        let overall = (reduction_score * 0.4
            + f64::from(stability) * 0.3
            + f64::from(integrity) * 0.3)
            .round()
            .clamp(0.0, 100.0) as u8;

        let metrics = QualityMetrics {
            timestamp: Some(Utc::now()),
            issue_reduction_pct: reduction,
            build_stability: stability,
            domain_integrity: integrity,
            overall_score: overall,
            reduction_target_met: reduction >= self.targets.reduction_pct,
            stability_target_met: stability >= self.targets.min_quality_score,
            remaining_issues: self.counters.remaining,
        };

        if self.history.len() == self.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(metrics.clone());
        metrics
    }

    /// Snapshot history, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &QualityMetrics> {
        self.history.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use sweep_core::types::{
        Batch, BatchStatus, FixStrategy, Id, Issue, IssueCategory, IssueContext, PhaseKind,
        Resolution, RiskLevel,
    };

    fn issue(id: &str, file: &str, category: IssueCategory) -> Issue {
        Issue {
            id: Id::from_string(id),
            file: file.to_string(),
            line: 1,
            column: 1,
            rule: "r".to_string(),
            category,
            secondary_category: None,
            severity: Severity::Warning,
            auto_fixable: true,
            resolution: Resolution {
                strategy: FixStrategy::AutoFix,
                confidence: 0.9,
                risk: RiskLevel::Low,
            },
            context: IssueContext::default(),
        }
    }

    fn tracker() -> ProgressTracker {
        ProgressTracker::new(
            &EngineConfig::default(),
            CampaignTargets::default(),
            Box::new(|file: &str| file.contains("domain/")),
        )
    }

    fn batch_result(fixed: u32, passed: bool) -> BatchResult {
        let mut batch = Batch::new(Id::from_string("c1"), 1, PhaseKind::AutoFix);
        batch.status = if passed {
            BatchStatus::Completed
        } else {
            BatchStatus::RolledBack
        };
        batch.counters.issues_fixed = fixed;
        batch.counters.validations_passed = u32::from(passed);
        batch.counters.validations_failed = u32::from(!passed);
        BatchResult {
            batch,
            validation: None,
            fixed_issues: Vec::new(),
            failed_issues: Vec::new(),
            checkpoint: None,
        }
    }

    #[test]
    fn baseline_counts_categories_and_domain_issues() {
        let mut tracker = tracker();
        let issues = vec![
            issue("i1", "a.ts", IssueCategory::Formatting),
            issue("i2", "a.ts", IssueCategory::Formatting),
            issue("i3", "domain/pay.ts", IssueCategory::Correctness),
        ];
        let baseline = tracker.establish_baseline(
            &issues,
            BaselineSignals {
                compile_errors: Some(0),
                build_time_ms: Some(1000),
                file_inventory: Some(2),
            },
        );
        assert_eq!(baseline.total_issues, 3);
        assert_eq!(baseline.domain_issues, 1);
        assert_eq!(baseline.confidence, 100);
        assert!(baseline
            .issues_by_category
            .contains(&(IssueCategory::Formatting, 2)));
    }

    #[test]
    fn missing_signals_reduce_confidence_not_data() {
        let mut tracker = tracker();
        let issues = vec![issue("i1", "a.ts", IssueCategory::Formatting)];
        let baseline = tracker.establish_baseline(
            &issues,
            BaselineSignals {
                compile_errors: None,
                build_time_ms: None,
                file_inventory: Some(1),
            },
        );
        // Two missing signals at the default 25-point penalty each.
        assert_eq!(baseline.confidence, 50);
        assert_eq!(baseline.total_issues, 1);
    }

    #[test]
    fn remaining_never_goes_negative() {
        let mut tracker = tracker();
        let issues = vec![issue("i1", "a.ts", IssueCategory::Formatting)];
        tracker.establish_baseline(&issues, BaselineSignals::default());
        tracker.record_batch(&batch_result(5, true));
        assert_eq!(tracker.counters().remaining, 0);
        assert_eq!(tracker.counters().eliminated, 5);
    }

    #[test]
    fn reduction_pct_tracks_eliminated_and_transformed() {
        let mut tracker = tracker();
        let issues: Vec<Issue> = (0..100)
            .map(|i| issue(&format!("i{i}"), "a.ts", IssueCategory::Formatting))
            .collect();
        tracker.establish_baseline(&issues, BaselineSignals::default());
        tracker.record_batch(&batch_result(80, true));
        tracker.record_transformed(10);
        assert!((tracker.reduction_pct() - 90.0).abs() < f64::EPSILON);
        assert_eq!(tracker.counters().remaining, 10);
    }

    #[test]
    fn velocity_and_eta_derive_from_elapsed_time() {
        let mut tracker = tracker();
        let issues: Vec<Issue> = (0..40)
            .map(|i| issue(&format!("i{i}"), "a.ts", IssueCategory::Formatting))
            .collect();
        tracker.establish_baseline(&issues, BaselineSignals::default());
        tracker.record_batch(&batch_result(20, true));

        let now = tracker.started_at + Duration::minutes(10);
        assert!((tracker.velocity(now) - 2.0).abs() < 0.01);
        let eta = tracker.estimated_minutes_remaining(now).unwrap();
        assert!((eta - 10.0).abs() < 0.1);
    }

    #[test]
    fn roi_is_eliminated_times_constant() {
        let mut tracker = tracker();
        let issues: Vec<Issue> = (0..10)
            .map(|i| issue(&format!("i{i}"), "a.ts", IssueCategory::Formatting))
            .collect();
        tracker.establish_baseline(&issues, BaselineSignals::default());
        tracker.record_batch(&batch_result(10, true));
        // Default constant is 2 minutes per eliminated item.
        assert!((tracker.roi_minutes_saved() - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn snapshot_reflects_targets_and_history_is_bounded() {
        let mut config = EngineConfig::default();
        config.history_capacity = 3;
        let mut tracker = ProgressTracker::new(
            &config,
            CampaignTargets::default(),
            Box::new(|_| false),
        );
        let issues: Vec<Issue> = (0..100)
            .map(|i| issue(&format!("i{i}"), "a.ts", IssueCategory::Formatting))
            .collect();
        tracker.establish_baseline(&issues, BaselineSignals::default());
        tracker.record_batch(&batch_result(95, true));

        for _ in 0..5 {
            tracker.snapshot();
        }
        assert_eq!(tracker.history().count(), 3);

        let metrics = tracker.snapshot();
        assert!(metrics.reduction_target_met);
        assert_eq!(metrics.build_stability, 100);
        assert_eq!(metrics.remaining_issues, 5);
    }

    #[test]
    fn failed_validations_lower_stability() {
        let mut tracker = tracker();
        let issues: Vec<Issue> = (0..10)
            .map(|i| issue(&format!("i{i}"), "a.ts", IssueCategory::Formatting))
            .collect();
        tracker.establish_baseline(&issues, BaselineSignals::default());
        tracker.record_batch(&batch_result(5, true));
        tracker.record_batch(&batch_result(0, false));

        let metrics = tracker.snapshot();
        assert_eq!(metrics.build_stability, 50);
        assert!(!metrics.stability_target_met);
    }
}
