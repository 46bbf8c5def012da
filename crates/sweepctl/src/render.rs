//! Output rendering for sweepctl.
//!
//! Formats campaign, batch, and gate information for terminal display.

use chrono::{DateTime, Utc};
use sweep_core::report::CampaignSummary;
use sweep_core::types::{Batch, CampaignRun, GateResult, QualityMetrics};

/// Print a list of campaigns in tabular format.
pub fn print_campaign_list(campaigns: &[CampaignRun]) {
    if campaigns.is_empty() {
        println!("No campaigns found.");
        return;
    }

    println!(
        "{:<36}  {:<20}  {:<10}  {:>6}  {:>9}  {:<20}",
        "ID", "NAME", "STATUS", "FIXED", "REMAINING", "CREATED"
    );
    println!("{}", "-".repeat(110));

    for run in campaigns {
        println!(
            "{:<36}  {:<20}  {:<10}  {:>6}  {:>9}  {:<20}",
            run.id.0,
            truncate(&run.name, 20),
            run.status.as_str(),
            run.counters.eliminated,
            run.counters.remaining,
            format_time(&run.created_at),
        );
    }

    println!();
    println!("{} campaign(s)", campaigns.len());
}

/// Print detailed information about a campaign and its batches.
pub fn print_campaign_details(run: &CampaignRun, batches: &[Batch]) {
    println!("Campaign: {}", run.id);
    println!();
    println!("  Name:           {}", run.name);
    println!("  Status:         {}", run.status.as_str());
    println!("  Workspace:      {}", run.workspace_root);
    if let Some(baseline) = &run.baseline {
        println!(
            "  Baseline:       {} issues ({} domain), confidence {}%",
            baseline.total_issues, baseline.domain_issues, baseline.confidence
        );
    }
    println!(
        "  Progress:       {} eliminated, {} transformed, {} remaining",
        run.counters.eliminated, run.counters.transformed, run.counters.remaining
    );
    println!("  Velocity:       {:.2} items/min", run.velocity);
    println!(
        "  Est. saved:     {:.0} maintenance minutes (estimate)",
        run.roi_minutes_saved
    );
    println!("  Rollbacks:      {}", run.rollback_count);
    if let Some(reason) = &run.halt_reason {
        println!("  Halt reason:    {reason}");
    }
    if let Some(ckpt) = &run.last_good_checkpoint {
        println!("  Last good ckpt: {ckpt}");
    }

    println!();
    println!("  Phases:");
    for phase in &run.phases {
        let state = if phase.completed { "done" } else { "pending" };
        print!(
            "    {:<26} {} ({} batches)",
            phase.kind.as_str(),
            state,
            phase.batches_completed
        );
        if let Some(warning) = &phase.warning {
            print!("  [warning: {warning}]");
        }
        println!();
    }

    if !batches.is_empty() {
        println!();
        println!(
            "  {:<4}  {:<26}  {:<12}  {:>9}  {:>6}  {:>6}",
            "SEQ", "PHASE", "STATUS", "ATTEMPTED", "FIXED", "FAILED"
        );
        for batch in batches {
            println!(
                "  {:<4}  {:<26}  {:<12}  {:>9}  {:>6}  {:>6}",
                batch.sequence,
                batch.phase.as_str(),
                batch.status.as_str(),
                batch.counters.issues_attempted,
                batch.counters.issues_fixed,
                batch.counters.issues_failed,
            );
        }
    }
}

/// Print the terminal summary after a campaign run.
pub fn print_summary(summary: &CampaignSummary) {
    println!();
    println!("Campaign {} [{}]", summary.name, summary.status.as_str());
    println!("  Quality score:  {}", summary.quality_score);
    println!("  Eliminated:     {}", summary.eliminated);
    println!("  Remaining:      {}", summary.remaining);
    println!("  Rollbacks:      {}", summary.rollback_count);
    println!("  Batches:        {}", summary.batches.len());
    if let Some(reason) = &summary.halt_reason {
        println!("  Halt reason:    {reason}");
        if let Some(ckpt) = &summary.last_good_checkpoint {
            println!("  Recover from:   {ckpt}");
        }
    }
    for blocker in &summary.blockers {
        println!("  BLOCKER: {blocker}");
    }
    for rec in &summary.recommendations {
        println!("  hint: {rec}");
    }
}

/// Print the quality gate verdict.
pub fn print_gate(run: &CampaignRun, metrics: &QualityMetrics, result: &GateResult) {
    println!("Gate for campaign {} ({})", run.name, run.id);
    println!();
    println!(
        "  Verdict:        {}",
        if result.passed { "PASSED" } else { "FAILED" }
    );
    println!(
        "  Deployment:     {}",
        if result.deployment_approved {
            "approved"
        } else {
            "not approved"
        }
    );
    println!("  Risk:           {}", result.risk.as_str());
    println!(
        "  Reduction:      {:.1}% (target met: {})",
        metrics.issue_reduction_pct, metrics.reduction_target_met
    );
    println!("  Overall score:  {}", metrics.overall_score);

    if !result.blockers.is_empty() {
        println!();
        println!("  Blockers:");
        for blocker in &result.blockers {
            println!("    - {blocker}");
        }
    }
    if !result.violations.is_empty() {
        println!();
        println!("  Violations:");
        for violation in &result.violations {
            println!(
                "    - {}: {} (limit {})",
                violation.name, violation.actual, violation.limit
            );
        }
    }
    if !result.recommendations.is_empty() {
        println!();
        println!("  Recommendations:");
        for rec in &result.recommendations {
            println!("    - {rec}");
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}

fn format_time(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S").to_string()
}
