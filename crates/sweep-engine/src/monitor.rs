//! Read-only campaign monitor.
//!
//! Periodically logs the latest metrics snapshot published by the
//! controller. Strictly observational: it never mutates campaign state and
//! never influences batch sequencing.

use std::time::Duration;
use sweep_core::types::QualityMetrics;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Periodic metrics logger driven by a watch channel.
#[derive(Debug)]
pub struct Monitor {
    interval: Duration,
    metrics_rx: watch::Receiver<QualityMetrics>,
    cancel: CancellationToken,
}

impl Monitor {
    pub fn new(
        interval_sec: u32,
        metrics_rx: watch::Receiver<QualityMetrics>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            interval: Duration::from_secs(u64::from(interval_sec.max(1))),
            metrics_rx,
            cancel,
        }
    }

    /// Run until cancelled. Intended to be spawned alongside the controller.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        // The first tick fires immediately; skip it so the first report
        // covers a full interval.
        ticker.tick().await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    info!("monitor stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.report();
                }
            }
        }
    }

    fn report(&mut self) {
        let metrics = self.metrics_rx.borrow_and_update().clone();
        info!(
            reduction_pct = format!("{:.1}", metrics.issue_reduction_pct),
            remaining = metrics.remaining_issues,
            build_stability = metrics.build_stability,
            domain_integrity = metrics.domain_integrity,
            overall_score = metrics.overall_score,
            "campaign progress"
        );
        if !metrics.stability_target_met && metrics.build_stability < 50 {
            warn!(
                build_stability = metrics.build_stability,
                "build stability is degraded, consider reducing batch size"
            );
        }
    }
}
