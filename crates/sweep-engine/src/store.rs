//! SQLite persistence for campaigns, batches, metrics, and the event log.
//!
//! Campaign state is written after every batch so that a crash loses at most
//! one in-flight batch. The full `CampaignRun` travels as a JSON column;
//! the relational columns exist for listing and filtering only, which keeps
//! the schema stable while the state shape evolves.

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::path::Path;
use sweep_core::events::{Event, EventPayload};
use sweep_core::types::{Batch, BatchCounters, BatchStatus, CampaignRun, Id, PhaseKind, QualityMetrics};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("campaign not found: {0}")]
    CampaignNotFound(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Storage backend for the campaign engine.
pub struct Store {
    pool: Pool<Sqlite>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Open (or create) the database at the given path.
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;

        let store = Self { pool };
        store.migrate_embedded().await?;
        Ok(store)
    }

    /// Run embedded migrations. Idempotent.
    async fn migrate_embedded(&self) -> Result<()> {
        let migrations = [include_str!("../../../migrations/0001_init.sql")];

        for migration_sql in migrations {
            let cleaned: String = migration_sql
                .lines()
                .filter(|line| !line.trim().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n");

            for statement in cleaned.split(';') {
                let trimmed = statement.trim();
                if !trimmed.is_empty() {
                    match sqlx::query(trimmed).execute(&self.pool).await {
                        Ok(_) => {}
                        Err(e) => {
                            let msg = e.to_string();
                            if !msg.contains("duplicate column") && !msg.contains("already exists")
                            {
                                return Err(e.into());
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    // --- Campaign operations ---

    /// Insert a new campaign.
    pub async fn insert_campaign(&self, run: &CampaignRun) -> Result<()> {
        let state_json = serde_json::to_string(run)?;
        sqlx::query(
            r#"
            INSERT INTO campaigns (id, name, status, workspace_root, state_json, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(run.id.as_ref())
        .bind(&run.name)
        .bind(run.status.as_str())
        .bind(&run.workspace_root)
        .bind(&state_json)
        .bind(run.created_at.timestamp_millis())
        .bind(run.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Persist the full campaign state. Called after every batch.
    pub async fn save_campaign(&self, run: &CampaignRun) -> Result<()> {
        let state_json = serde_json::to_string(run)?;
        let result = sqlx::query(
            "UPDATE campaigns SET status = ?1, state_json = ?2, updated_at = ?3 WHERE id = ?4",
        )
        .bind(run.status.as_str())
        .bind(&state_json)
        .bind(Utc::now().timestamp_millis())
        .bind(run.id.as_ref())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::CampaignNotFound(run.id.to_string()));
        }
        Ok(())
    }

    /// Load a campaign by id.
    pub async fn get_campaign(&self, id: &Id) -> Result<CampaignRun> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT state_json FROM campaigns WHERE id = ?1")
                .bind(id.as_ref())
                .fetch_optional(&self.pool)
                .await?;
        let (state_json,) = row.ok_or_else(|| StorageError::CampaignNotFound(id.to_string()))?;
        Ok(serde_json::from_str(&state_json)?)
    }

    /// List campaigns, optionally filtered by workspace, newest first.
    pub async fn list_campaigns(&self, workspace_root: Option<&str>) -> Result<Vec<CampaignRun>> {
        let rows: Vec<(String,)> = match workspace_root {
            Some(ws) => {
                sqlx::query_as(
                    "SELECT state_json FROM campaigns WHERE workspace_root = ?1 \
                     ORDER BY created_at DESC",
                )
                .bind(ws)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as("SELECT state_json FROM campaigns ORDER BY created_at DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let mut runs = Vec::with_capacity(rows.len());
        for (state_json,) in rows {
            runs.push(serde_json::from_str(&state_json)?);
        }
        Ok(runs)
    }

    // --- Batch operations ---

    /// Insert or replace a batch record.
    pub async fn save_batch(&self, batch: &Batch) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO batches
                (id, campaign_id, sequence, phase, status,
                 issues_attempted, issues_fixed, issues_failed, files_touched,
                 validations_passed, validations_failed, rollbacks_triggered,
                 started_at, ended_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(batch.id.as_ref())
        .bind(batch.campaign_id.as_ref())
        .bind(i64::from(batch.sequence))
        .bind(batch.phase.as_str())
        .bind(batch.status.as_str())
        .bind(i64::from(batch.counters.issues_attempted))
        .bind(i64::from(batch.counters.issues_fixed))
        .bind(i64::from(batch.counters.issues_failed))
        .bind(i64::from(batch.counters.files_touched))
        .bind(i64::from(batch.counters.validations_passed))
        .bind(i64::from(batch.counters.validations_failed))
        .bind(i64::from(batch.counters.rollbacks_triggered))
        .bind(batch.started_at.map(|t| t.timestamp_millis()))
        .bind(batch.ended_at.map(|t| t.timestamp_millis()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// List batches for a campaign in sequence order.
    pub async fn list_batches(&self, campaign_id: &Id) -> Result<Vec<Batch>> {
        let rows = sqlx::query_as::<_, BatchRow>(
            "SELECT * FROM batches WHERE campaign_id = ?1 ORDER BY sequence ASC",
        )
        .bind(campaign_id.as_ref())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(BatchRow::into_batch).collect())
    }

    // --- Metrics history ---

    /// Append a metrics snapshot, evicting the oldest rows beyond `capacity`.
    pub async fn append_metrics(
        &self,
        campaign_id: &Id,
        metrics: &QualityMetrics,
        capacity: usize,
    ) -> Result<()> {
        let metrics_json = serde_json::to_string(metrics)?;
        sqlx::query(
            "INSERT INTO metrics_history (id, campaign_id, ts, metrics_json) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(Id::new().as_ref())
        .bind(campaign_id.as_ref())
        .bind(Utc::now().timestamp_millis())
        .bind(&metrics_json)
        .execute(&self.pool)
        .await?;

        // Keep the history bounded per campaign.
        sqlx::query(
            r#"
            DELETE FROM metrics_history
            WHERE campaign_id = ?1 AND id NOT IN (
                SELECT id FROM metrics_history
                WHERE campaign_id = ?1 ORDER BY ts DESC, id DESC LIMIT ?2
            )
            "#,
        )
        .bind(campaign_id.as_ref())
        .bind(capacity as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Metrics history for a campaign, oldest first.
    pub async fn list_metrics(&self, campaign_id: &Id) -> Result<Vec<QualityMetrics>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT metrics_json FROM metrics_history WHERE campaign_id = ?1 ORDER BY ts ASC, id ASC",
        )
        .bind(campaign_id.as_ref())
        .fetch_all(&self.pool)
        .await?;

        let mut metrics = Vec::with_capacity(rows.len());
        for (json,) in rows {
            metrics.push(serde_json::from_str(&json)?);
        }
        Ok(metrics)
    }

    // --- Event operations ---

    /// Append an event to the audit log.
    pub async fn append_event(
        &self,
        campaign_id: &Id,
        batch_id: Option<&Id>,
        payload: &EventPayload,
    ) -> Result<Event> {
        let id = Id::new();
        let now = Utc::now();
        let event_type = payload.event_type().as_str().to_string();
        let payload_json = payload.to_json()?;

        sqlx::query(
            "INSERT INTO events (id, campaign_id, batch_id, type, ts, payload_json) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(id.as_ref())
        .bind(campaign_id.as_ref())
        .bind(batch_id.map(AsRef::as_ref))
        .bind(&event_type)
        .bind(now.timestamp_millis())
        .bind(&payload_json)
        .execute(&self.pool)
        .await?;

        Ok(Event {
            id,
            campaign_id: campaign_id.clone(),
            batch_id: batch_id.cloned(),
            event_type,
            timestamp: now,
            payload_json,
        })
    }

    /// List events for a campaign in timestamp order.
    pub async fn list_events(&self, campaign_id: &Id) -> Result<Vec<Event>> {
        let rows = sqlx::query_as::<_, EventRow>(
            "SELECT * FROM events WHERE campaign_id = ?1 ORDER BY ts ASC",
        )
        .bind(campaign_id.as_ref())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(EventRow::into_event).collect())
    }
}

// --- Row types for SQLx ---

#[derive(sqlx::FromRow)]
struct BatchRow {
    id: String,
    campaign_id: String,
    sequence: i64,
    phase: String,
    status: String,
    issues_attempted: i64,
    issues_fixed: i64,
    issues_failed: i64,
    files_touched: i64,
    validations_passed: i64,
    validations_failed: i64,
    rollbacks_triggered: i64,
    started_at: Option<i64>,
    ended_at: Option<i64>,
}

impl BatchRow {
    fn into_batch(self) -> Batch {
        let phase = match self.phase.as_str() {
            "unused_symbol_cleanup" => PhaseKind::UnusedSymbolCleanup,
            "import_cleanup" => PhaseKind::ImportCleanup,
            "domain_sensitive_cleanup" => PhaseKind::DomainSensitiveCleanup,
            _ => PhaseKind::AutoFix,
        };
        let status = match self.status.as_str() {
            "PENDING" => BatchStatus::Pending,
            "IN_PROGRESS" => BatchStatus::InProgress,
            "COMPLETED" => BatchStatus::Completed,
            "ROLLED_BACK" => BatchStatus::RolledBack,
            _ => BatchStatus::Failed,
        };

        Batch {
            id: Id::from_string(self.id),
            campaign_id: Id::from_string(self.campaign_id),
            sequence: self.sequence as u32,
            phase,
            status,
            counters: BatchCounters {
                issues_attempted: self.issues_attempted as u32,
                issues_fixed: self.issues_fixed as u32,
                issues_failed: self.issues_failed as u32,
                files_touched: self.files_touched as u32,
                validations_passed: self.validations_passed as u32,
                validations_failed: self.validations_failed as u32,
                rollbacks_triggered: self.rollbacks_triggered as u32,
            },
            started_at: self.started_at.and_then(DateTime::from_timestamp_millis),
            ended_at: self.ended_at.and_then(DateTime::from_timestamp_millis),
        }
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: String,
    campaign_id: String,
    batch_id: Option<String>,
    #[sqlx(rename = "type")]
    event_type: String,
    ts: i64,
    payload_json: String,
}

impl EventRow {
    fn into_event(self) -> Event {
        Event {
            id: Id::from_string(self.id),
            campaign_id: Id::from_string(self.campaign_id),
            batch_id: self.batch_id.map(Id::from_string),
            event_type: self.event_type,
            timestamp: DateTime::from_timestamp_millis(self.ts).unwrap_or_default(),
            payload_json: self.payload_json,
        }
    }
}
