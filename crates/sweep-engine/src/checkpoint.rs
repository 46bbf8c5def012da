//! Checkpoint manager: reversible working-tree snapshots.
//!
//! Snapshots use git's stash-create/stash-store primitives so that taking a
//! checkpoint never mutates the working tree. Earlier batches' uncommitted
//! fixes therefore survive checkpointing and only a failed batch's own
//! changes are reverted on restore.
//!
//! Concurrency is not enforced here: the batch processor's sequential
//! discipline guarantees no two checkpoint operations run at once.

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Command;
use sweep_core::types::{CheckpointRef, Id};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Label prefix for snapshots owned by this manager.
const LABEL_PREFIX: &str = "sweep/ckpt/";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("failed to execute git: {0}")]
    Execution(#[from] std::io::Error),
    #[error("git command failed: {0}")]
    CommandFailed(String),
    #[error("invalid utf-8 in git output")]
    InvalidUtf8,
    #[error("a live checkpoint already exists for batch {0}")]
    CheckpointLive(String),
    #[error("unmanaged snapshot present in stash: {0}")]
    UnmanagedSnapshot(String),
    /// Restoring the snapshot itself failed. The working tree is now of
    /// unknown integrity; this must halt the entire campaign.
    #[error("rollback failed, working tree integrity unknown: {0}")]
    RestoreFailed(String),
}

pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Creates, restores, and discards working-tree snapshots.
#[derive(Debug)]
pub struct CheckpointManager {
    workspace_root: PathBuf,
    live: Option<CheckpointRef>,
    /// Untracked path prefixes the manager never snapshots or removes.
    /// Used for engine-owned state living inside the workspace.
    ignored_prefixes: Vec<String>,
}

impl CheckpointManager {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            live: None,
            ignored_prefixes: Vec::new(),
        }
    }

    /// Exclude an untracked path prefix from snapshots and restores.
    pub fn ignore_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.ignored_prefixes.push(prefix.into());
        self
    }

    /// The currently live (unreclaimed) checkpoint, if any.
    pub fn live(&self) -> Option<&CheckpointRef> {
        self.live.as_ref()
    }

    /// Snapshot the current working tree under a label.
    ///
    /// Fails if a live checkpoint already exists (at most one unreclaimed
    /// checkpoint per in-flight batch) or if the stash already holds entries
    /// under our prefix that this manager does not own.
    pub fn checkpoint(&mut self, reason: &str, batch_id: &Id) -> Result<CheckpointRef> {
        if let Some(live) = &self.live {
            return Err(CheckpointError::CheckpointLive(live.batch_id.to_string()));
        }
        if let Some(label) = self.find_managed_stash_label()? {
            return Err(CheckpointError::UnmanagedSnapshot(label));
        }

        let label = format!("{LABEL_PREFIX}{batch_id}: {reason}");
        let untracked = self.untracked_files()?;

        // `stash create` records the tree state without touching it. Empty
        // output means the tree is clean relative to HEAD.
        let created = self.run_git(&["stash", "create"])?;
        let snapshot = if created.is_empty() {
            self.run_git(&["rev-parse", "HEAD"])?
        } else {
            self.run_git(&["stash", "store", "-m", &label, &created])?;
            created
        };

        let checkpoint = CheckpointRef {
            id: Id::new(),
            label,
            snapshot,
            batch_id: batch_id.clone(),
            created_at: Utc::now(),
            untracked,
        };

        info!(
            batch_id = %batch_id,
            snapshot = %checkpoint.snapshot,
            "checkpoint created"
        );
        self.live = Some(checkpoint.clone());
        Ok(checkpoint)
    }

    /// Revert the working tree to the snapshot.
    ///
    /// Tracked files are restored to their recorded content; untracked files
    /// introduced since the snapshot are removed so the result is
    /// byte-identical. Any failure here is fatal to the campaign.
    pub fn restore(&mut self, checkpoint: &CheckpointRef) -> Result<()> {
        info!(
            batch_id = %checkpoint.batch_id,
            snapshot = %checkpoint.snapshot,
            "restoring checkpoint"
        );

        self.run_git(&["checkout", &checkpoint.snapshot, "--", "."])
            .map_err(|e| CheckpointError::RestoreFailed(e.to_string()))?;

        // Remove files the batch introduced.
        let now_untracked = self
            .untracked_files()
            .map_err(|e| CheckpointError::RestoreFailed(e.to_string()))?;
        for file in &now_untracked {
            if !checkpoint.untracked.contains(file) {
                let path = self.workspace_root.join(file);
                std::fs::remove_file(&path).map_err(|e| {
                    CheckpointError::RestoreFailed(format!(
                        "failed to remove {}: {e}",
                        path.display()
                    ))
                })?;
            }
        }

        // Reclaim the stash entry. The tree is already restored at this
        // point, so a drop failure is logged, not fatal.
        if let Err(e) = self.drop_stash_entry(checkpoint) {
            warn!(label = %checkpoint.label, error = %e, "failed to drop stash entry after restore");
        }

        self.live = None;
        Ok(())
    }

    /// Release a snapshot without applying it.
    pub fn discard(&mut self, checkpoint: &CheckpointRef) -> Result<()> {
        debug!(batch_id = %checkpoint.batch_id, "discarding checkpoint");
        self.drop_stash_entry(checkpoint)?;
        self.live = None;
        Ok(())
    }

    /// Drop the stash entry backing a checkpoint, if one was stored.
    fn drop_stash_entry(&self, checkpoint: &CheckpointRef) -> Result<()> {
        // Clean-tree checkpoints resolve to HEAD and store nothing.
        let Some(index) = self.find_stash_index(&checkpoint.label)? else {
            return Ok(());
        };
        self.run_git(&["stash", "drop", &format!("stash@{{{index}}}")])?;
        Ok(())
    }

    /// Find the stash index whose message equals `label`.
    fn find_stash_index(&self, label: &str) -> Result<Option<usize>> {
        let list = self.run_git(&["stash", "list", "--format=%gs"])?;
        for (index, line) in list.lines().enumerate() {
            // Messages stored via `stash store -m` appear verbatim; entries
            // from `stash push` carry an "On <branch>: " prefix.
            if line == label || line.ends_with(&format!(": {label}")) {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    /// Find any stash entry under our label prefix.
    fn find_managed_stash_label(&self) -> Result<Option<String>> {
        let list = self.run_git(&["stash", "list", "--format=%gs"])?;
        for line in list.lines() {
            if line.contains(LABEL_PREFIX) {
                return Ok(Some(line.to_string()));
            }
        }
        Ok(None)
    }

    /// Untracked, unignored files relative to the workspace root.
    fn untracked_files(&self) -> Result<Vec<String>> {
        let out = self.run_git(&["ls-files", "--others", "--exclude-standard"])?;
        Ok(out
            .lines()
            .filter(|line| {
                !self
                    .ignored_prefixes
                    .iter()
                    .any(|prefix| line.starts_with(prefix.as_str()))
            })
            .map(str::to_string)
            .collect())
    }

    /// Sha256 fingerprint over the sorted path+content of all tracked and
    /// untracked-unignored files. Used to verify byte-identical rollback.
    pub fn fingerprint(&self) -> Result<String> {
        let listed = self.run_git(&["ls-files", "--cached", "--others", "--exclude-standard"])?;
        let mut files: Vec<&str> = listed.lines().collect();
        files.sort_unstable();
        files.dedup();

        let mut hasher = Sha256::new();
        for file in files {
            let path = self.workspace_root.join(file);
            // Tracked files deleted from the working tree still appear in
            // ls-files; hash their absence explicitly.
            match std::fs::read(&path) {
                Ok(content) => {
                    hasher.update(file.as_bytes());
                    hasher.update([0u8]);
                    hasher.update(&content);
                }
                Err(_) => {
                    hasher.update(file.as_bytes());
                    hasher.update([1u8]);
                }
            }
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Run a git command in the workspace root, returning trimmed stdout.
    fn run_git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.workspace_root)
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CheckpointError::CommandFailed(format!(
                "git {}: {}",
                args.join(" "),
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8(output.stdout).map_err(|_| CheckpointError::InvalidUtf8)?;
        Ok(stdout.trim().to_string())
    }
}

/// Check whether a path is inside a git work tree.
pub fn is_git_workspace(path: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(path)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
