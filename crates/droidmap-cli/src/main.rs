//! droidmap CLI entry point.

mod args;
mod assist;
mod config;
mod device;
mod explore;
mod monitor;
mod output;
mod paths;
#[cfg(test)]
mod test_support;

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use droidmap_core::catalogue::Catalogue;
use droidmap_core::elements::analyze::{group_by_kind, interactive_elements};
use droidmap_core::elements::parse::{extract_activity_name, extract_title, parse_hierarchy};
use droidmap_core::report::CoverageReport;
use droidmap_core::recognize::detect_assistance;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::args::{AssistArg, Cli, Commands, ExploreArgs, MonitorArgs, ParseArgs, ParseFormat};
use crate::assist::{AssistanceCoordinator, Operator};
use crate::config::{parse_category, AssistConfig, AssistMode, ExploreConfig, MonitorConfig};
use crate::device::adb::AdbDevice;
use crate::device::{Device, DeviceClaims, DeviceMode};
use crate::explore::Explorer;
use crate::monitor::{Monitor, MonitorEnd};

/// How long background tasks get to finish once a command is done.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

fn main() {
    // Logs go to stderr; stdout carries the command's JSON result.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run_command(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Explore(args) => block_on(run_explore(args)),
        Commands::Monitor(args) => block_on(run_monitor(args)),
        Commands::Parse(args) => run_parse(&args),
        Commands::Examples => {
            println!("{}", crate::args::EXAMPLES_TEXT);
            Ok(())
        }
    }
}

fn block_on(fut: impl Future<Output = anyhow::Result<()>>) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(fut);
    // An operator prompt may still be blocked reading stdin; it never returns.
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}

fn explore_config(args: &ExploreArgs, artifacts_dir: Option<PathBuf>) -> anyhow::Result<ExploreConfig> {
    let mut config = ExploreConfig::new(&args.package);
    config.max_depth = args.max_depth;
    config.settle = Duration::from_millis(args.settle);
    config.launch_wait = Duration::from_millis(args.launch_wait);
    config.input_text = args.input_text.clone();
    config.artifacts_dir = artifacts_dir;
    config.categories = args
        .categories
        .iter()
        .map(|spec| parse_category(spec))
        .collect::<Result<_, _>>()?;

    let mode = match args.assist {
        AssistArg::Interactive => AssistMode::Interactive,
        AssistArg::Headless => AssistMode::Headless,
    };
    if args.assume_resolved && mode == AssistMode::Interactive {
        warn!("--assume-resolved only applies to --assist headless, ignoring it");
    }
    config.assist = AssistConfig {
        mode,
        timeout: Duration::from_secs(args.assist_timeout),
        assume_resolved: args.assume_resolved,
        ..AssistConfig::default()
    };

    config.validate()?;
    Ok(config)
}

fn output_root(output: Option<&PathBuf>) -> PathBuf {
    output.cloned().unwrap_or_else(paths::get_output_root)
}

async fn run_explore(args: ExploreArgs) -> anyhow::Result<()> {
    let run_dir = paths::run_dir(&output_root(args.output.as_ref()), &args.package, Utc::now());
    let artifacts_dir = (!args.no_artifacts).then(|| paths::pages_dir(&run_dir));
    let config = explore_config(&args, artifacts_dir)?;

    let device: Arc<dyn Device> = Arc::new(AdbDevice::new(
        args.device.clone().or_else(paths::default_serial),
    ));
    let claims = DeviceClaims::new(paths::get_runtime_dir());
    let claim = claims.claim(device.serial(), DeviceMode::Explore)?;
    info!(serial = claim.serial(), mode = %claim.mode(), "Device claimed");

    let cancel = CancellationToken::new();
    cancel_on_signal(cancel.clone());

    let coordinator = Arc::new(AssistanceCoordinator::new(config.assist.scan_interval));
    let operator: Arc<dyn Operator> = Arc::from(config.assist.operator());
    let explorer = Explorer::new(device, coordinator.clone(), operator, config, cancel);

    let outcome = explorer.explore().await;
    for pending in coordinator.pending_requests().await {
        warn!(
            id = %pending.id,
            reason = %pending.reason,
            elapsed_secs = pending.elapsed_secs,
            "Assistance request still open at exit"
        );
    }
    let written = output::write_artifacts(&run_dir, &outcome.catalogue, &outcome.report).await?;

    let summary = serde_json::json!({
        "app": outcome.report.app_name,
        "cancelled": outcome.report.cancelled,
        "pages": outcome.report.total_pages,
        "transitions": outcome.report.total_transitions,
        "operations": outcome.report.total_operations,
        "coverage": outcome.report.path_coverage.coverage,
        "errors": outcome.report.annotations.errors.len(),
        "skipped_branches": outcome.report.annotations.skipped_branches.len(),
        "assistance_sessions": coordinator.archived().await,
        "output": written,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn run_monitor(args: MonitorArgs) -> anyhow::Result<()> {
    let run_dir = paths::run_dir(&output_root(args.output.as_ref()), &args.package, Utc::now());
    let mut config = MonitorConfig::new(&args.package);
    config.interval = Duration::from_millis(args.interval);
    config.max_duration = Duration::from_secs(args.duration);
    config.validate()?;

    let device: Arc<dyn Device> = Arc::new(AdbDevice::new(
        args.device.clone().or_else(paths::default_serial),
    ));
    let claims = DeviceClaims::new(paths::get_runtime_dir());
    let claim = claims.claim(device.serial(), DeviceMode::Monitor)?;
    info!(serial = claim.serial(), mode = %claim.mode(), "Device claimed");

    let cancel = CancellationToken::new();
    cancel_on_signal(cancel.clone());

    let mut catalogue = Catalogue::new(&args.package);
    let end = Monitor::new(device, config, cancel).run(&mut catalogue).await;
    let report = CoverageReport::generate(&catalogue, end == MonitorEnd::Cancelled);
    let written = output::write_artifacts(&run_dir, &catalogue, &report).await?;

    let stopped_by = match end {
        MonitorEnd::Cancelled => "signal",
        MonitorEnd::TimeLimit => "time_limit",
    };
    let summary = serde_json::json!({
        "app": report.app_name,
        "stopped_by": stopped_by,
        "pages": report.total_pages,
        "operations": report.total_operations,
        "output": written,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn run_parse(args: &ParseArgs) -> anyhow::Result<()> {
    let dump = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let elements = parse_hierarchy(&dump);
    let shown = if args.all {
        elements.clone()
    } else {
        interactive_elements(&elements)
    };
    let title = extract_title(&elements);

    match args.format {
        ParseFormat::Text => {
            println!("# {} ({} of {} elements)", title, shown.len(), elements.len());
            for element in &shown {
                let bounds = element
                    .bounds
                    .map(|b| b.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("{:>5.1}  {:<24}  {}", element.importance, bounds, element.descriptor());
            }
        }
        ParseFormat::Json => {
            let groups: BTreeMap<_, usize> = group_by_kind(&elements)
                .into_iter()
                .map(|(group, members)| (group, members.len()))
                .collect();
            let result = serde_json::json!({
                "title": title,
                "activity": extract_activity_name(&dump),
                "needs_assistance": detect_assistance(&title, &dump),
                "groups": groups,
                "elements": shown,
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }
    Ok(())
}

/// Cancel `token` on SIGINT or SIGTERM so the run can write its report.
fn cancel_on_signal(token: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, finishing up");
            }
            _ = sigterm() => {
                info!("Received SIGTERM, finishing up");
            }
        }
        token.cancel();
    });
}

/// Wait for SIGTERM signal (Unix only).
///
/// If signal registration fails, logs a warning and waits indefinitely.
#[cfg(unix)]
async fn sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!(
                "Failed to register SIGTERM handler: {}, only SIGINT will stop the run",
                e
            );
            std::future::pending::<()>().await;
        }
    }
}

/// SIGTERM is not available on non-Unix platforms; use a never-completing future.
#[cfg(not(unix))]
async fn sigterm() {
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn explore_args(extra: &[&str]) -> ExploreArgs {
        let mut argv = vec!["droidmap", "explore", "com.example.mail"];
        argv.extend_from_slice(extra);
        match Cli::parse_from(argv).command {
            Commands::Explore(args) => args,
            _ => panic!("Expected explore command"),
        }
    }

    #[test]
    fn explore_args_map_onto_config() {
        let args = explore_args(&[
            "--max-depth",
            "4",
            "--settle",
            "500",
            "--assist",
            "headless",
            "--assume-resolved",
            "--category",
            "checkout:cart,pay",
        ]);
        let config = explore_config(&args, None).unwrap();

        assert_eq!(config.max_depth, 4);
        assert_eq!(config.settle, Duration::from_millis(500));
        assert_eq!(config.assist.mode, AssistMode::Headless);
        assert!(config.assist.assume_resolved);
        assert_eq!(config.categories.len(), 1);
        assert_eq!(config.categories[0].id, "checkout");
    }

    #[test]
    fn bad_explore_args_are_rejected() {
        assert!(explore_config(&explore_args(&["--max-depth", "0"]), None).is_err());
        assert!(explore_config(&explore_args(&["--category", "nocolon"]), None).is_err());
    }
}
