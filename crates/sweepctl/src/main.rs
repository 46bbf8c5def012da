//! sweepctl - run and inspect code-quality campaigns.

mod render;

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use clap::{Parser, Subcommand};
use eyre::{eyre, WrapErr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sweep_core::config::EngineConfig;
use sweep_core::events::{Event, EventPayload};
use sweep_core::ingest;
use sweep_core::types::{CampaignRun, CheckKind, Issue};
use sweep_engine::batch::CommandFixer;
use sweep_engine::controller::{CampaignController, CampaignPlan};
use sweep_engine::gate::{self, GateInput};
use sweep_engine::monitor::Monitor;
use sweep_engine::progress::BaselineSignals;
use sweep_engine::store::Store;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::{fmt, EnvFilter};

/// Campaign engine for automated code-quality sweeps.
#[derive(Parser)]
#[command(name = "sweepctl")]
#[command(about = "Batch code-quality campaign engine")]
#[command(version)]
struct Cli {
    /// Workspace root (must be a git work tree for run/resume)
    #[arg(long, global = true, default_value = ".")]
    workspace: PathBuf,

    /// Config file (overrides <state_dir>/config)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a campaign over an analyzer issue report
    Run {
        /// Path to the normalized issues JSON file
        issues: PathBuf,

        /// Campaign plan YAML (name, phases, targets)
        #[arg(long)]
        plan: Option<PathBuf>,

        /// Campaign name (overrides the plan)
        #[arg(long)]
        name: Option<String>,

        /// Report selected issues without applying fixes
        #[arg(long)]
        dry_run: bool,
    },

    /// Resume a persisted campaign over a fresh issue report
    Resume {
        /// Campaign ID
        campaign_id: String,

        /// Path to the normalized issues JSON file
        issues: PathBuf,
    },

    /// List campaigns
    List {
        /// Show only campaigns for the current workspace
        #[arg(long)]
        workspace_only: bool,
    },

    /// Show detailed information about a campaign
    Inspect {
        /// Campaign ID
        campaign_id: String,
    },

    /// Evaluate the deployment-readiness gate for a campaign
    Gate {
        /// Campaign ID
        campaign_id: String,
    },
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let workspace = cli
        .workspace
        .canonicalize()
        .wrap_err_with(|| format!("workspace not found: {}", cli.workspace.display()))?;
    let config = load_config(&workspace, cli.config.as_deref())?;

    match cli.command {
        Command::Run {
            issues,
            plan,
            name,
            dry_run,
        } => {
            let mut config = config;
            if dry_run {
                config.dry_run = true;
            }
            let plan = load_plan(plan.as_deref(), name)?;
            let issues = load_issues(&issues)?;
            run_campaign(config, &workspace, plan, issues, None).await
        }
        Command::Resume {
            campaign_id,
            issues,
        } => {
            let issues = load_issues(&issues)?;
            run_campaign(
                config,
                &workspace,
                CampaignPlan::new(""),
                issues,
                Some(campaign_id),
            )
            .await
        }
        Command::List { workspace_only } => {
            let store = open_store(&config).await?;
            let filter = workspace_only.then(|| workspace.display().to_string());
            let campaigns = store.list_campaigns(filter.as_deref()).await?;
            render::print_campaign_list(&campaigns);
            Ok(())
        }
        Command::Inspect { campaign_id } => {
            let store = open_store(&config).await?;
            let id = sweep_core::types::Id::from_string(campaign_id);
            let run = store.get_campaign(&id).await?;
            let batches = store.list_batches(&id).await?;
            render::print_campaign_details(&run, &batches);
            Ok(())
        }
        Command::Gate { campaign_id } => {
            let store = open_store(&config).await?;
            let id = sweep_core::types::Id::from_string(campaign_id);
            let run = store.get_campaign(&id).await?;
            let metrics = store
                .list_metrics(&id)
                .await?
                .pop()
                .ok_or_else(|| eyre!("no metrics recorded for campaign {id}"))?;

            let events = store.list_events(&id).await?;
            let input = gate_input_from_records(&run, &events);
            let result = gate::evaluate(&metrics, &input, &config.gate);
            render::print_gate(&run, &metrics, &result);
            if !result.passed {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

/// Run or resume a campaign with monitor and ctrl-c handling.
async fn run_campaign(
    config: EngineConfig,
    workspace: &Path,
    plan: CampaignPlan,
    issues: Vec<Issue>,
    resume_id: Option<String>,
) -> eyre::Result<()> {
    config.validate()?;
    let fix_cmd = config
        .fix_cmd
        .clone()
        .ok_or_else(|| eyre!("fix_cmd is not configured"))?;
    let fixer = CommandFixer::new(fix_cmd, config.fix_timeout_sec);

    let risk_patterns = config.risk_patterns.clone();
    let risk_predicate: Arc<dyn Fn(&str) -> bool + Send + Sync> =
        Arc::new(move |file: &str| risk_patterns.iter().any(|p| file.contains(p.as_str())));

    let store = open_store(&config).await?;
    let cancel = CancellationToken::new();
    let monitor_interval = config.monitor_interval_sec;

    let (mut controller, metrics_rx) = CampaignController::new(
        config,
        store,
        fixer,
        workspace,
        risk_predicate,
        cancel.clone(),
    );

    let monitor = tokio::spawn(Monitor::new(monitor_interval, metrics_rx, cancel.clone()).run());

    // Ctrl-c requests a clean stop between batches.
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current batch");
            signal_cancel.cancel();
        }
    });

    let result = match resume_id {
        Some(id) => {
            controller
                .resume(&sweep_core::types::Id::from_string(id), issues)
                .await
        }
        None => {
            controller
                .run(plan, issues, BaselineSignals::default())
                .await
        }
    };

    cancel.cancel();
    let _ = monitor.await;

    let summary = result?;
    render::print_summary(&summary);
    Ok(())
}

/// Load config: defaults, then `<state_dir>/config` if present, then the
/// explicit --config file.
fn load_config(workspace: &Path, explicit: Option<&Path>) -> eyre::Result<EngineConfig> {
    let mut config = EngineConfig::default();

    let default_path = workspace.join(&config.state_dir).join("config");
    if default_path.exists() {
        config
            .load_file(&default_path)
            .wrap_err_with(|| format!("bad config: {}", default_path.display()))?;
    }
    if let Some(path) = explicit {
        config
            .load_file(path)
            .wrap_err_with(|| format!("bad config: {}", path.display()))?;
    }
    config.resolve_paths(workspace);
    Ok(config)
}

fn load_plan(path: Option<&Path>, name: Option<String>) -> eyre::Result<CampaignPlan> {
    let mut plan = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .wrap_err_with(|| format!("cannot read plan: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .wrap_err_with(|| format!("bad plan file: {}", path.display()))?
        }
        None => CampaignPlan::new("sweep"),
    };
    if let Some(name) = name {
        plan.name = name;
    }
    Ok(plan)
}

fn load_issues(path: &Path) -> eyre::Result<Vec<Issue>> {
    let content = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("cannot read issues: {}", path.display()))?;
    let issues = ingest::parse_issues(&content)?;
    if issues.is_empty() {
        return Err(eyre!("issue report is empty"));
    }
    Ok(issues)
}

async fn open_store(config: &EngineConfig) -> eyre::Result<Store> {
    let db_path = config.state_dir.join("sweep.db");
    Ok(Store::open(&db_path).await?)
}

/// Fold the persisted campaign state and validation events into gate
/// evidence, so the gate command re-evaluates what the campaign observed.
fn gate_input_from_records(run: &CampaignRun, events: &[Event]) -> GateInput {
    let mut input = GateInput {
        success_rate: 1.0,
        remaining_rules: run.remaining_rules.clone(),
        ..GateInput::default()
    };

    let mut total = 0u32;
    let mut passed = 0u32;
    for event in events {
        let Ok(EventPayload::ValidationFinished(p)) =
            serde_json::from_str::<EventPayload>(&event.payload_json)
        else {
            continue;
        };
        total += 1;
        if p.passed {
            passed += 1;
        }
        input.total_errors += p.total_errors;
        input.total_warnings += p.total_warnings;
        input.slowest_check_ms = input.slowest_check_ms.max(p.slowest_check_ms);
        if p.failed_checks.contains(&CheckKind::Compilation) {
            input.compiler_errors += 1;
        }
    }
    if total > 0 {
        input.success_rate = f64::from(passed) / f64::from(total);
    }
    input
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn plan_yaml_parses_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plan.yaml");
        std::fs::write(&path, "name: lint-q3\n").unwrap();
        let plan = load_plan(Some(&path), None).unwrap();
        assert_eq!(plan.name, "lint-q3");
        assert_eq!(plan.phases.len(), 4);
    }

    #[test]
    fn plan_name_flag_overrides_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plan.yaml");
        std::fs::write(
            &path,
            "name: from-file\nphases:\n  - auto_fix\ntargets:\n  reduction_pct: 50.0\n",
        )
        .unwrap();
        let plan = load_plan(Some(&path), Some("from-flag".to_string())).unwrap();
        assert_eq!(plan.name, "from-flag");
        assert_eq!(plan.phases.len(), 1);
        assert!((plan.targets.reduction_pct - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_issue_report_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("issues.json");
        std::fs::write(&path, "[]").unwrap();
        assert!(load_issues(&path).is_err());
    }

    #[test]
    fn gate_input_folds_persisted_evidence() {
        use sweep_core::events::ValidationPayload;
        use sweep_core::types::Id;

        let mut run = CampaignRun::default();
        run.remaining_rules = vec!["no-eval".to_string()];

        let make_event = |payload: EventPayload| Event {
            id: Id::new(),
            campaign_id: run.id.clone(),
            batch_id: None,
            event_type: payload.event_type().as_str().to_string(),
            timestamp: chrono::Utc::now(),
            payload_json: payload.to_json().unwrap(),
        };
        let events = vec![
            make_event(EventPayload::ValidationFinished(ValidationPayload {
                batch_id: Id::from_string("b1"),
                passed: true,
                quality_score: 100,
                requires_rollback: false,
                failed_checks: vec![],
                total_errors: 0,
                total_warnings: 3,
                slowest_check_ms: 800,
            })),
            make_event(EventPayload::ValidationFinished(ValidationPayload {
                batch_id: Id::from_string("b2"),
                passed: false,
                quality_score: 60,
                requires_rollback: true,
                failed_checks: vec![CheckKind::Compilation],
                total_errors: 2,
                total_warnings: 0,
                slowest_check_ms: 4000,
            })),
        ];

        let input = gate_input_from_records(&run, &events);
        assert_eq!(input.remaining_rules, vec!["no-eval".to_string()]);
        assert_eq!(input.total_errors, 2);
        assert_eq!(input.total_warnings, 3);
        assert_eq!(input.compiler_errors, 1);
        assert_eq!(input.slowest_check_ms, 4000);
        assert!((input.success_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn config_layers_merge_in_order() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".sweep")).unwrap();
        std::fs::write(dir.path().join(".sweep/config"), "batch_size=5\n").unwrap();
        let explicit = dir.path().join("override.conf");
        std::fs::write(&explicit, "batch_size=20\n").unwrap();

        let base = load_config(dir.path(), None).unwrap();
        assert_eq!(base.batch_size, 5);
        let merged = load_config(dir.path(), Some(&explicit)).unwrap();
        assert_eq!(merged.batch_size, 20);
    }
}
