//! Validation engine: external checks plus structural integrity.
//!
//! Runs a configurable, ordered set of checks (compilation, related tests,
//! component/service symbol integrity, build dry-run) and folds them into a
//! single pass/fail plus a weighted quality score. Compilation and test
//! regressions are unacceptable at any automation level and force rollback;
//! non-critical failures only degrade the score.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use sweep_core::config::{EngineConfig, ScoreWeights};
use sweep_core::types::{CheckKind, ComprehensiveValidationResult, Id, ValidationResult};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Lines of tool output retained per check for the report.
const MAX_DIAGNOSTIC_LINES: usize = 20;

/// One externally-invoked check.
#[derive(Debug, Clone)]
pub struct CheckSpec {
    pub kind: CheckKind,
    pub cmd: String,
    /// Timeout in seconds (0 = no timeout). A timeout is a validation
    /// failure, never a crash.
    pub timeout_sec: u32,
}

/// Validation engine configuration.
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// External checks in execution order.
    pub checks: Vec<CheckSpec>,
    /// Spawn-failure retries per check.
    pub max_retries: u32,
    pub retry_backoff_sec: u32,
    /// Checks whose failure forces rollback.
    pub critical: Vec<CheckKind>,
    pub weights: ScoreWeights,
    pub symbol_markers: Vec<String>,
    pub component_patterns: Vec<String>,
    pub service_patterns: Vec<String>,
}

impl ValidationConfig {
    /// Build from engine config; only configured commands become checks.
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut checks = Vec::new();
        if let Some(cmd) = &config.compile_cmd {
            checks.push(CheckSpec {
                kind: CheckKind::Compilation,
                cmd: cmd.clone(),
                timeout_sec: config.compile_timeout_sec,
            });
        }
        if let Some(cmd) = &config.test_cmd {
            checks.push(CheckSpec {
                kind: CheckKind::TestSuite,
                cmd: cmd.clone(),
                timeout_sec: config.test_timeout_sec,
            });
        }
        if let Some(cmd) = &config.build_cmd {
            checks.push(CheckSpec {
                kind: CheckKind::Build,
                cmd: cmd.clone(),
                timeout_sec: config.build_timeout_sec,
            });
        }
        Self {
            checks,
            max_retries: config.max_retries,
            retry_backoff_sec: config.retry_backoff_sec,
            critical: config.critical_checks.clone(),
            weights: config.weights,
            symbol_markers: config.symbol_markers.clone(),
            component_patterns: config.component_patterns.clone(),
            service_patterns: config.service_patterns.clone(),
        }
    }
}

/// Exported-symbol inventory of the files a batch is about to touch.
///
/// Captured before fixes are applied; the post-batch integrity check is a
/// symbol diff against this, not a semantic proof.
#[derive(Debug, Clone, Default)]
pub struct SymbolSnapshot {
    /// File path -> hashes of symbol declaration lines.
    files: BTreeMap<String, Vec<String>>,
}

impl SymbolSnapshot {
    /// Scan `files` under `root` for lines starting with any marker.
    /// Missing files record an empty inventory.
    pub fn capture(root: &Path, files: &[String], markers: &[String]) -> Self {
        let mut map = BTreeMap::new();
        for file in files {
            map.insert(file.clone(), scan_symbols(&root.join(file), markers));
        }
        Self { files: map }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Files in the snapshot whose path contains any of `patterns`.
    fn files_matching<'a>(&'a self, patterns: &[String]) -> Vec<&'a str> {
        self.files
            .keys()
            .filter(|f| patterns.iter().any(|p| f.contains(p.as_str())))
            .map(String::as_str)
            .collect()
    }

    /// Symbols recorded for a file that are no longer present on disk.
    fn missing_symbols(&self, root: &Path, file: &str, markers: &[String]) -> Vec<String> {
        let Some(recorded) = self.files.get(file) else {
            return Vec::new();
        };
        let current = scan_symbols(&root.join(file), markers);
        recorded
            .iter()
            .filter(|s| !current.contains(s))
            .cloned()
            .collect()
    }
}

/// Extract symbol declaration lines, trimmed and deduplicated. The lines
/// themselves are kept so diagnostics stay readable.
fn scan_symbols(path: &Path, markers: &[String]) -> Vec<String> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let mut symbols: Vec<String> = Vec::new();
    for line in content.lines() {
        let trimmed = line.trim_start();
        if markers.iter().any(|m| trimmed.starts_with(m.as_str()))
            && !symbols.iter().any(|s| s == trimmed)
        {
            symbols.push(trimmed.to_string());
        }
    }
    symbols
}

/// Outcome of one external command run.
struct CommandOutput {
    exit_code: i32,
    stdout: String,
    stderr: String,
    timed_out: bool,
}

/// Why an external check could not run at all.
#[derive(Debug, Error)]
enum ToolExecutionError {
    #[error("failed to spawn: {0}")]
    Spawn(std::io::Error),
}

/// Validation engine over a working tree.
#[derive(Debug)]
pub struct ValidationEngine {
    config: ValidationConfig,
    workspace_root: PathBuf,
}

impl ValidationEngine {
    pub fn new(config: ValidationConfig, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            config,
            workspace_root: workspace_root.into(),
        }
    }

    pub fn from_engine_config(config: &EngineConfig, workspace_root: impl Into<PathBuf>) -> Self {
        Self::new(ValidationConfig::from_config(config), workspace_root)
    }

    /// Capture the pre-batch symbol inventory for the files about to change.
    pub fn snapshot(&self, changed_files: &[String]) -> SymbolSnapshot {
        let structural: Vec<String> = changed_files
            .iter()
            .filter(|f| {
                self.config
                    .component_patterns
                    .iter()
                    .chain(self.config.service_patterns.iter())
                    .any(|p| f.contains(p.as_str()))
            })
            .cloned()
            .collect();
        SymbolSnapshot::capture(&self.workspace_root, &structural, &self.config.symbol_markers)
    }

    /// Run all configured checks and fold them into one result.
    pub async fn validate(
        &self,
        changed_files: &[String],
        batch_id: &Id,
        snapshot: &SymbolSnapshot,
    ) -> ComprehensiveValidationResult {
        info!(
            batch_id = %batch_id,
            files = changed_files.len(),
            checks = self.config.checks.len(),
            "starting validation"
        );

        let mut outcomes: Vec<(ValidationResult, u8)> = Vec::new();

        for spec in &self.config.checks {
            let result = match spec.kind {
                CheckKind::TestSuite => self.run_test_check(spec, changed_files).await,
                _ => self.run_check(spec, &spec.cmd).await,
            };
            let penalty = self.flat_penalty(spec.kind, &result);
            outcomes.push((result, penalty));
        }

        // Structural integrity for touched component and service files.
        let component = self.integrity_check(
            CheckKind::Component,
            &self.config.component_patterns,
            self.config.weights.component,
            snapshot,
        );
        outcomes.push(component);
        let service = self.integrity_check(
            CheckKind::Service,
            &self.config.service_patterns,
            self.config.weights.service,
            snapshot,
        );
        outcomes.push(service);

        let quality_score = outcomes
            .iter()
            .fold(100i32, |acc, (_, penalty)| acc - i32::from(*penalty))
            .clamp(0, 100) as u8;

        let results: Vec<ValidationResult> = outcomes.into_iter().map(|(r, _)| r).collect();
        let passed = results.iter().all(|r| r.passed);
        let requires_rollback = results
            .iter()
            .any(|r| !r.passed && self.config.critical.contains(&r.kind));

        info!(
            batch_id = %batch_id,
            passed,
            quality_score,
            requires_rollback,
            "validation complete"
        );

        ComprehensiveValidationResult {
            passed,
            results,
            quality_score,
            requires_rollback,
        }
    }

    /// Full-weight penalty for command checks that failed outright.
    fn flat_penalty(&self, kind: CheckKind, result: &ValidationResult) -> u8 {
        if result.passed {
            return 0;
        }
        match kind {
            CheckKind::Compilation => self.config.weights.compilation,
            CheckKind::TestSuite => self.config.weights.test_suite,
            CheckKind::Build => self.config.weights.build,
            CheckKind::Component => self.config.weights.component,
            CheckKind::Service => self.config.weights.service,
        }
    }

    /// Test check with related-test discovery.
    ///
    /// If the command carries a `{files}` placeholder, it runs against the
    /// tests related to the changed files. Absence of related tests is a
    /// skip with a warning, never a hard failure.
    async fn run_test_check(&self, spec: &CheckSpec, changed_files: &[String]) -> ValidationResult {
        if spec.cmd.contains("{files}") {
            let related = related_tests(&self.workspace_root, changed_files);
            if related.is_empty() {
                debug!("no related tests for changed files, skipping test check");
                return ValidationResult {
                    kind: CheckKind::TestSuite,
                    passed: true,
                    skipped: true,
                    errors: Vec::new(),
                    warnings: vec!["no related tests exist for the changed files".to_string()],
                    recommendations: vec![
                        "add test coverage for the files touched by this batch".to_string(),
                    ],
                    duration_ms: 0,
                    retries: 0,
                };
            }
            let cmd = spec.cmd.replace("{files}", &related.join(" "));
            return self.run_check(spec, &cmd).await;
        }
        self.run_check(spec, &spec.cmd).await
    }

    /// Run one external check with spawn-failure retries.
    async fn run_check(&self, spec: &CheckSpec, cmd: &str) -> ValidationResult {
        let start = std::time::Instant::now();
        let mut retries = 0u32;

        let output = loop {
            match self.execute_command(cmd, spec.timeout_sec).await {
                Ok(output) => break Some(output),
                Err(e) => {
                    // ToolExecutionError: the check could not run at all.
                    // Retry with backoff, then surface as a failure.
                    if retries >= self.config.max_retries {
                        warn!(check = spec.kind.as_str(), error = %e, "check failed to run, retries exhausted");
                        break None;
                    }
                    retries += 1;
                    warn!(
                        check = spec.kind.as_str(),
                        retry = retries,
                        error = %e,
                        "check failed to run, retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(u64::from(
                        self.config.retry_backoff_sec,
                    )))
                    .await;
                }
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;

        let Some(output) = output else {
            return ValidationResult {
                kind: spec.kind,
                passed: false,
                skipped: false,
                errors: vec![format!("tool could not be executed: {cmd}")],
                warnings: Vec::new(),
                recommendations: vec!["verify the tool is installed and on PATH".to_string()],
                duration_ms,
                retries,
            };
        };

        if output.timed_out {
            return ValidationResult {
                kind: spec.kind,
                passed: false,
                skipped: false,
                errors: vec![format!("timed out after {} seconds", spec.timeout_sec)],
                warnings: Vec::new(),
                recommendations: Vec::new(),
                duration_ms,
                retries,
            };
        }

        let (mut errors, warnings) = parse_diagnostics(&output.stdout, &output.stderr);
        let passed = output.exit_code == 0;
        if !passed && errors.is_empty() {
            // Non-zero exit with unparseable output is a failure with a
            // generic error, never success-by-default.
            errors.push(format!(
                "check exited with code {} (no parseable diagnostics)",
                output.exit_code
            ));
        }

        if passed {
            debug!(check = spec.kind.as_str(), duration_ms, "check passed");
        } else {
            warn!(
                check = spec.kind.as_str(),
                exit_code = output.exit_code,
                errors = errors.len(),
                duration_ms,
                "check failed"
            );
        }

        ValidationResult {
            kind: spec.kind,
            passed,
            skipped: false,
            errors,
            warnings,
            recommendations: Vec::new(),
            duration_ms,
            retries,
        }
    }

    /// Execute a shell command with an optional timeout.
    async fn execute_command(
        &self,
        cmd: &str,
        timeout_sec: u32,
    ) -> std::result::Result<CommandOutput, ToolExecutionError> {
        let mut process = Command::new("sh");
        process
            .arg("-c")
            .arg(cmd)
            .current_dir(&self.workspace_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = process.spawn().map_err(ToolExecutionError::Spawn)?;

        // Drain the pipes concurrently; a chatty tool would otherwise fill
        // the pipe buffer and block before wait() returns.
        let mut stdout_handle = child.stdout.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(ref mut handle) = stdout_handle {
                let _ = handle.read_to_end(&mut buf).await;
            }
            buf
        });
        let mut stderr_handle = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(ref mut handle) = stderr_handle {
                let _ = handle.read_to_end(&mut buf).await;
            }
            buf
        });

        let (exit_code, timed_out) = if timeout_sec > 0 {
            let timeout_duration = Duration::from_secs(u64::from(timeout_sec));
            tokio::select! {
                result = child.wait() => {
                    match result {
                        Ok(status) => (status.code().unwrap_or(-1), false),
                        Err(_) => (-1, false),
                    }
                }
                () = tokio::time::sleep(timeout_duration) => {
                    // Kill and reap to prevent zombies.
                    if let Err(e) = child.kill().await {
                        warn!(cmd, error = %e, "failed to kill timed-out process");
                    }
                    let _ = child.wait().await;
                    (-1, true)
                }
            }
        } else {
            match child.wait().await {
                Ok(status) => (status.code().unwrap_or(-1), false),
                Err(_) => (-1, false),
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        Ok(CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
            timed_out,
        })
    }

    /// Symbol diff against the pre-batch snapshot for one file class.
    ///
    /// Penalty scales with the fraction of failing files, capped at the
    /// class weight.
    fn integrity_check(
        &self,
        kind: CheckKind,
        patterns: &[String],
        weight: u8,
        snapshot: &SymbolSnapshot,
    ) -> (ValidationResult, u8) {
        let files = snapshot.files_matching(patterns);
        let total = files.len();

        let mut errors = Vec::new();
        for file in &files {
            let missing =
                snapshot.missing_symbols(&self.workspace_root, file, &self.config.symbol_markers);
            if !missing.is_empty() {
                errors.push(format!(
                    "{file}: {} previously exported symbol(s) missing: {}",
                    missing.len(),
                    missing.join("; ")
                ));
            }
        }

        let failing = errors.len();
        let passed = failing == 0;
        let penalty = if total == 0 || passed {
            0
        } else {
            let scaled = (f64::from(weight) * failing as f64 / total as f64).ceil() as u8;
            scaled.min(weight)
        };

        let result = ValidationResult {
            kind,
            passed,
            skipped: false,
            errors,
            warnings: Vec::new(),
            recommendations: if passed {
                Vec::new()
            } else {
                vec!["restore the missing exports or exclude these files from auto-fix".to_string()]
            },
            duration_ms: 0,
            retries: 0,
        };
        (result, penalty)
    }
}

/// Count error/warning diagnostics in line-oriented tool output.
fn parse_diagnostics(stdout: &str, stderr: &str) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    for line in stdout.lines().chain(stderr.lines()) {
        let lower = line.to_lowercase();
        if lower.contains("error") {
            if errors.len() < MAX_DIAGNOSTIC_LINES {
                errors.push(line.trim().to_string());
            }
        } else if lower.contains("warning") && warnings.len() < MAX_DIAGNOSTIC_LINES {
            warnings.push(line.trim().to_string());
        }
    }
    (errors, warnings)
}

/// Discover tests related to a set of changed files by convention:
/// `<stem>.test.<ext>`, `<stem>.spec.<ext>`, or `__tests__/<name>` siblings.
fn related_tests(root: &Path, changed_files: &[String]) -> Vec<String> {
    let mut found = Vec::new();
    for file in changed_files {
        let path = Path::new(file);
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let dir = path.parent().unwrap_or_else(|| Path::new(""));

        let candidates = [
            dir.join(format!("{stem}.test.{ext}")),
            dir.join(format!("{stem}.spec.{ext}")),
            dir.join("__tests__")
                .join(path.file_name().unwrap_or_default()),
        ];
        for candidate in candidates {
            let rel = candidate.to_string_lossy().to_string();
            if root.join(&candidate).exists() && !found.contains(&rel) {
                found.push(rel);
            }
        }
    }
    found
}
