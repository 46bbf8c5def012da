//! Configuration parsing for the campaign engine.
//!
//! Key=value format (comments with `#`, optional quoting), merged over
//! defaults. Precedence: CLI flags > `--config` file > `.sweep/config` >
//! defaults. Score weights, the critical-check set, and the ROI constant are
//! policy parameters here rather than hard-coded constants.

use crate::types::{CheckKind, RiskLevel};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("invalid config line: {0}")]
    InvalidLine(String),
    #[error("invalid boolean value for {key}: {value}")]
    InvalidBool { key: String, value: String },
    #[error("invalid integer value for {key}: {value}")]
    InvalidInt { key: String, value: String },
    #[error("invalid float value for {key}: {value}")]
    InvalidFloat { key: String, value: String },
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Score penalty weights applied by the validation engine.
///
/// The defaults mirror the original campaign policy (40/25/20/15/10) but are
/// deliberately configurable: they are heuristics, not load-bearing facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreWeights {
    pub compilation: u8,
    pub test_suite: u8,
    pub component: u8,
    pub service: u8,
    pub build: u8,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            compilation: 40,
            test_suite: 25,
            component: 20,
            service: 15,
            build: 10,
        }
    }
}

/// Gate thresholds for the deployment-readiness verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct GateThresholds {
    pub max_errors: u32,
    pub max_warnings: u32,
    pub max_duration_ms: u64,
    /// Minimum validation success rate in [0, 1].
    pub min_success_rate: f64,
    /// Rule ids whose presence blocks deployment outright.
    pub blocked_rules: Vec<String>,
}

impl Default for GateThresholds {
    fn default() -> Self {
        Self {
            max_errors: 0,
            max_warnings: 100,
            max_duration_ms: 600_000,
            min_success_rate: 0.9,
            blocked_rules: Vec::new(),
        }
    }
}

/// Engine and host configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    // Batch processing
    /// Issues per sub-batch. The primary dial between throughput (larger
    /// batches amortize expensive validation runs) and safety (smaller
    /// batches bound the blast radius of a rollback).
    pub batch_size: usize,
    pub confidence_min: f64,
    pub max_risk: RiskLevel,
    pub max_failures_before_stop: u32,
    pub validate_after_each_batch: bool,
    pub enable_rollback: bool,
    pub continue_on_error: bool,
    pub dry_run: bool,

    // External checks
    pub compile_cmd: Option<String>,
    pub test_cmd: Option<String>,
    pub build_cmd: Option<String>,
    pub compile_timeout_sec: u32,
    pub test_timeout_sec: u32,
    pub build_timeout_sec: u32,
    pub max_retries: u32,
    pub retry_backoff_sec: u32,
    pub critical_checks: Vec<CheckKind>,
    pub weights: ScoreWeights,

    // Structural integrity
    /// Line prefixes treated as exported-symbol declarations.
    pub symbol_markers: Vec<String>,
    /// Path substrings identifying UI-component files.
    pub component_patterns: Vec<String>,
    /// Path substrings identifying service files.
    pub service_patterns: Vec<String>,

    // Fixer
    /// Shell command template; `{files}` expands to the sub-batch's files.
    pub fix_cmd: Option<String>,
    pub fix_timeout_sec: u32,

    // Progress / ROI
    /// Estimated maintenance minutes saved per eliminated item. An estimate
    /// used for reporting only.
    pub roi_minutes_per_item: f64,
    /// Confidence penalty per missing baseline sub-measurement.
    pub baseline_penalty: u8,

    // Gate
    pub gate: GateThresholds,

    // State and monitoring
    pub state_dir: PathBuf,
    pub history_capacity: usize,
    pub monitor_interval_sec: u32,

    // Host-side risk policy (consumed by the host to build the injected
    // predicate; the engine itself never reads these patterns).
    pub risk_patterns: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            confidence_min: 0.8,
            max_risk: RiskLevel::Medium,
            max_failures_before_stop: 3,
            validate_after_each_batch: true,
            enable_rollback: true,
            continue_on_error: false,
            dry_run: false,
            compile_cmd: None,
            test_cmd: None,
            build_cmd: None,
            compile_timeout_sec: 300,
            test_timeout_sec: 600,
            build_timeout_sec: 600,
            max_retries: 2,
            retry_backoff_sec: 2,
            critical_checks: vec![
                CheckKind::Compilation,
                CheckKind::TestSuite,
                CheckKind::Component,
            ],
            weights: ScoreWeights::default(),
            symbol_markers: vec![
                "export ".to_string(),
                "export default ".to_string(),
                "pub fn ".to_string(),
                "pub struct ".to_string(),
            ],
            component_patterns: vec!["components/".to_string()],
            service_patterns: vec!["services/".to_string()],
            fix_cmd: None,
            fix_timeout_sec: 300,
            roi_minutes_per_item: 2.0,
            baseline_penalty: 25,
            gate: GateThresholds::default(),
            state_dir: PathBuf::from(".sweep"),
            history_capacity: 100,
            monitor_interval_sec: 30,
            risk_patterns: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load config from a file, merging with defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.load_file(path)?;
        Ok(config)
    }

    /// Load and merge values from a config file.
    pub fn load_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path)?;
        self.parse_content(&content)
    }

    /// Parse config content (key=value format).
    fn parse_content(&mut self, content: &str) -> Result<(), ConfigError> {
        for line in content.lines() {
            let trimmed = line.trim();

            // Skip empty lines and comments
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(ConfigError::InvalidLine(line.to_string()));
            };

            let key = key.trim();
            let value = Self::unquote(value.trim());

            self.apply_value(key, &value)?;
        }
        Ok(())
    }

    /// Remove surrounding quotes from a value.
    fn unquote(value: &str) -> String {
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            return value[1..value.len() - 1].to_string();
        }
        value.to_string()
    }

    /// Apply a single config value.
    fn apply_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "batch_size" => self.batch_size = Self::parse_int(key, value)? as usize,
            "confidence_min" => self.confidence_min = Self::parse_float(key, value)?,
            "max_risk" => {
                self.max_risk =
                    RiskLevel::parse(value).ok_or_else(|| ConfigError::InvalidValue {
                        key: key.to_string(),
                        value: value.to_string(),
                    })?;
            }
            "max_failures_before_stop" => {
                self.max_failures_before_stop = Self::parse_int(key, value)?;
            }
            "validate_after_each_batch" => {
                self.validate_after_each_batch = Self::parse_bool(key, value)?;
            }
            "enable_rollback" => self.enable_rollback = Self::parse_bool(key, value)?,
            "continue_on_error" => self.continue_on_error = Self::parse_bool(key, value)?,
            "dry_run" => self.dry_run = Self::parse_bool(key, value)?,
            "compile_cmd" => self.compile_cmd = Self::non_empty(value),
            "test_cmd" => self.test_cmd = Self::non_empty(value),
            "build_cmd" => self.build_cmd = Self::non_empty(value),
            "compile_timeout_sec" => self.compile_timeout_sec = Self::parse_int(key, value)?,
            "test_timeout_sec" => self.test_timeout_sec = Self::parse_int(key, value)?,
            "build_timeout_sec" => self.build_timeout_sec = Self::parse_int(key, value)?,
            "max_retries" => self.max_retries = Self::parse_int(key, value)?,
            "retry_backoff_sec" => self.retry_backoff_sec = Self::parse_int(key, value)?,
            "critical_checks" => {
                let mut checks = Vec::new();
                for name in value.split_whitespace() {
                    checks.push(CheckKind::parse(name).ok_or_else(|| {
                        ConfigError::InvalidValue {
                            key: key.to_string(),
                            value: name.to_string(),
                        }
                    })?);
                }
                self.critical_checks = checks;
            }
            "weight_compilation" => self.weights.compilation = Self::parse_int(key, value)? as u8,
            "weight_test_suite" => self.weights.test_suite = Self::parse_int(key, value)? as u8,
            "weight_component" => self.weights.component = Self::parse_int(key, value)? as u8,
            "weight_service" => self.weights.service = Self::parse_int(key, value)? as u8,
            "weight_build" => self.weights.build = Self::parse_int(key, value)? as u8,
            "symbol_markers" => {
                // Pipe-separated since markers contain spaces
                self.symbol_markers = value
                    .split('|')
                    .map(str::to_string)
                    .filter(|s| !s.is_empty())
                    .collect();
            }
            "component_patterns" => {
                self.component_patterns =
                    value.split_whitespace().map(str::to_string).collect();
            }
            "service_patterns" => {
                self.service_patterns = value.split_whitespace().map(str::to_string).collect();
            }
            "fix_cmd" => self.fix_cmd = Self::non_empty(value),
            "fix_timeout_sec" => self.fix_timeout_sec = Self::parse_int(key, value)?,
            "roi_minutes_per_item" => {
                self.roi_minutes_per_item = Self::parse_float(key, value)?;
            }
            "baseline_penalty" => self.baseline_penalty = Self::parse_int(key, value)? as u8,
            "gate_max_errors" => self.gate.max_errors = Self::parse_int(key, value)?,
            "gate_max_warnings" => self.gate.max_warnings = Self::parse_int(key, value)?,
            "gate_max_duration_ms" => {
                self.gate.max_duration_ms = u64::from(Self::parse_int(key, value)?);
            }
            "gate_min_success_rate" => {
                self.gate.min_success_rate = Self::parse_float(key, value)?;
            }
            "gate_blocked_rules" => {
                self.gate.blocked_rules =
                    value.split_whitespace().map(str::to_string).collect();
            }
            "state_dir" => self.state_dir = PathBuf::from(value),
            "history_capacity" => {
                self.history_capacity = Self::parse_int(key, value)? as usize;
            }
            "monitor_interval_sec" => self.monitor_interval_sec = Self::parse_int(key, value)?,
            "risk_patterns" => {
                self.risk_patterns = value.split_whitespace().map(str::to_string).collect();
            }
            _ => {
                // Warn but don't fail for unknown keys; configs travel
                // between campaign versions.
                eprintln!("Warning: unknown config key: {key}");
            }
        }
        Ok(())
    }

    fn non_empty(value: &str) -> Option<String> {
        if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        }
    }

    fn parse_int(key: &str, value: &str) -> Result<u32, ConfigError> {
        value.parse().map_err(|_| ConfigError::InvalidInt {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    fn parse_float(key: &str, value: &str) -> Result<f64, ConfigError> {
        value.parse().map_err(|_| ConfigError::InvalidFloat {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    /// Parse a boolean value.
    fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
        match value.to_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "on" => Ok(true),
            "false" | "0" | "no" | "n" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidBool {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }

    /// Validate cross-field constraints. Fails fast before any mutation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "batch_size".to_string(),
                value: "0".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.confidence_min) {
            return Err(ConfigError::InvalidValue {
                key: "confidence_min".to_string(),
                value: self.confidence_min.to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.gate.min_success_rate) {
            return Err(ConfigError::InvalidValue {
                key: "gate_min_success_rate".to_string(),
                value: self.gate.min_success_rate.to_string(),
            });
        }
        if self.roi_minutes_per_item < 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "roi_minutes_per_item".to_string(),
                value: self.roi_minutes_per_item.to_string(),
            });
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "history_capacity".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// Resolve relative paths against a workspace root.
    pub fn resolve_paths(&mut self, workspace_root: &Path) {
        if self.state_dir.is_relative() {
            self.state_dir = workspace_root.join(&self.state_dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = EngineConfig::default();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.max_failures_before_stop, 3);
        assert!(config.enable_rollback);
        assert!(config.validate_after_each_batch);
        assert!(!config.dry_run);
        assert_eq!(config.weights.compilation, 40);
        assert_eq!(config.weights.test_suite, 25);
        assert_eq!(
            config.critical_checks,
            vec![CheckKind::Compilation, CheckKind::TestSuite, CheckKind::Component]
        );
    }

    #[test]
    fn parse_simple_config() {
        let mut config = EngineConfig::default();
        let content = r#"
batch_size=15
confidence_min=0.9
max_risk=low
enable_rollback=false
compile_cmd="cargo check"
"#;
        config.parse_content(content).unwrap();
        assert_eq!(config.batch_size, 15);
        assert!((config.confidence_min - 0.9).abs() < f64::EPSILON);
        assert_eq!(config.max_risk, RiskLevel::Low);
        assert!(!config.enable_rollback);
        assert_eq!(config.compile_cmd.as_deref(), Some("cargo check"));
    }

    #[test]
    fn parse_critical_checks_list() {
        let mut config = EngineConfig::default();
        config
            .parse_content("critical_checks=compilation build")
            .unwrap();
        assert_eq!(
            config.critical_checks,
            vec![CheckKind::Compilation, CheckKind::Build]
        );
    }

    #[test]
    fn parse_critical_checks_rejects_unknown() {
        let mut config = EngineConfig::default();
        let result = config.parse_content("critical_checks=compilation vibes");
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn parse_symbol_markers_pipe_separated() {
        let mut config = EngineConfig::default();
        config
            .parse_content(r#"symbol_markers="export |export default ""#)
            .unwrap();
        assert_eq!(config.symbol_markers, vec!["export ", "export default "]);
    }

    #[test]
    fn parse_weights() {
        let mut config = EngineConfig::default();
        config
            .parse_content("weight_compilation=50\nweight_build=5")
            .unwrap();
        assert_eq!(config.weights.compilation, 50);
        assert_eq!(config.weights.build, 5);
        assert_eq!(config.weights.test_suite, 25);
    }

    #[test]
    fn unquote_removes_quotes() {
        assert_eq!(EngineConfig::unquote("\"hello\""), "hello");
        assert_eq!(EngineConfig::unquote("'world'"), "world");
        assert_eq!(EngineConfig::unquote("noquotes"), "noquotes");
    }

    #[test]
    fn parse_bool_accepts_variants() {
        assert!(EngineConfig::parse_bool("test", "true").unwrap());
        assert!(EngineConfig::parse_bool("test", "1").unwrap());
        assert!(!EngineConfig::parse_bool("test", "off").unwrap());
        assert!(EngineConfig::parse_bool("test", "maybe").is_err());
    }

    #[test]
    fn validate_rejects_zero_batch_size() {
        let mut config = EngineConfig::default();
        config.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_confidence() {
        let mut config = EngineConfig::default();
        config.confidence_min = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn resolve_paths_joins_relative_state_dir() {
        let mut config = EngineConfig::default();
        config.resolve_paths(Path::new("/workspace/app"));
        assert_eq!(config.state_dir, PathBuf::from("/workspace/app/.sweep"));
    }
}
