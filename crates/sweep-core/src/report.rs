//! Machine-readable campaign reports.
//!
//! Two surfaces: an append-only `report.tsv` with one row per batch event,
//! and a `summary.json` written when a campaign terminates. Rendering for
//! humans is a host concern.
//!
//! TSV columns: `timestamp_ms`, kind, batch, `duration_ms`, attempted,
//!              fixed, failed, `quality_score`, message

use crate::types::{BatchStatus, CampaignStatus, Id};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// A single row in the report.tsv file.
#[derive(Debug, Clone)]
pub struct ReportRow {
    /// Unix timestamp in milliseconds.
    pub timestamp_ms: i64,
    /// Event kind (e.g., `CAMPAIGN_START`, `BATCH_END`).
    pub kind: String,
    /// Batch sequence label (empty for campaign-level rows).
    pub batch: String,
    pub duration_ms: Option<u64>,
    pub attempted: Option<u32>,
    pub fixed: Option<u32>,
    pub failed: Option<u32>,
    pub quality_score: Option<u8>,
    pub message: String,
}

impl ReportRow {
    pub fn new(timestamp_ms: i64, kind: impl Into<String>) -> Self {
        Self {
            timestamp_ms,
            kind: kind.into(),
            batch: String::new(),
            duration_ms: None,
            attempted: None,
            fixed: None,
            failed: None,
            quality_score: None,
            message: String::new(),
        }
    }

    pub fn with_batch(mut self, sequence: u32) -> Self {
        self.batch = sequence.to_string();
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_issue_counts(mut self, attempted: u32, fixed: u32, failed: u32) -> Self {
        self.attempted = Some(attempted);
        self.fixed = Some(fixed);
        self.failed = Some(failed);
        self
    }

    pub fn with_quality_score(mut self, score: u8) -> Self {
        self.quality_score = Some(score);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Format as a TSV line.
    fn to_tsv_line(&self) -> String {
        let duration = self.duration_ms.map(|d| d.to_string()).unwrap_or_default();
        let attempted = self.attempted.map(|a| a.to_string()).unwrap_or_default();
        let fixed = self.fixed.map(|f| f.to_string()).unwrap_or_default();
        let failed = self.failed.map(|f| f.to_string()).unwrap_or_default();
        let score = self
            .quality_score
            .map(|s| s.to_string())
            .unwrap_or_default();

        // Sanitize message to prevent TSV breakage
        let safe_message = sanitize_field(&self.message);

        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.timestamp_ms,
            self.kind,
            self.batch,
            duration,
            attempted,
            fixed,
            failed,
            score,
            safe_message,
        )
    }
}

/// Sanitize a field value to prevent TSV breakage.
fn sanitize_field(value: &str) -> String {
    value.replace(['\t', '\n', '\r'], " ")
}

/// TSV header row.
const HEADER: &str =
    "timestamp_ms\tkind\tbatch\tduration_ms\tattempted\tfixed\tfailed\tquality_score\tmessage";

/// Writer for report.tsv files.
pub struct ReportWriter {
    writer: BufWriter<File>,
}

impl std::fmt::Debug for ReportWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportWriter")
            .field("writer", &"BufWriter<File>")
            .finish()
    }
}

impl ReportWriter {
    /// Create a new report writer, writing header if the file is new.
    pub fn new(path: &Path) -> std::io::Result<Self> {
        let exists = path.exists();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);

        if !exists {
            writeln!(writer, "{HEADER}")?;
        }

        Ok(Self { writer })
    }

    pub fn write_row(&mut self, row: &ReportRow) -> std::io::Result<()> {
        writeln!(self.writer, "{}", row.to_tsv_line())
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

/// Outcome of one batch, as carried in the terminal summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub sequence: u32,
    pub status: BatchStatus,
    pub attempted: u32,
    pub fixed: u32,
    pub failed: u32,
    pub quality_score: Option<u8>,
}

/// Terminal summary of a campaign run (success, partial success, or halt).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignSummary {
    pub campaign_id: Id,
    pub name: String,
    pub status: CampaignStatus,
    pub quality_score: u8,
    pub eliminated: u32,
    pub remaining: u32,
    pub rollback_count: u32,
    pub batches: Vec<BatchOutcome>,
    #[serde(default)]
    pub halt_reason: Option<String>,
    /// Reference to the last-known-good checkpoint, surfaced on halt so an
    /// operator can recover manually.
    #[serde(default)]
    pub last_good_checkpoint: Option<String>,
    #[serde(default)]
    pub blockers: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl CampaignSummary {
    /// Write the summary as pretty JSON.
    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }
}
