use std::ffi::OsString;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result};
use lantern_core::{default_config_path, ExternalToolRunner, UpdaterConfig};
use lantern_snapshot::{SnapshotLayout, SnapshotStore};
use lantern_updater::{
    HttpLivenessProbe, LivenessProbe, ProcessToolRunner, RollbackController, UpdateOrchestrator,
    UpdateRequest, VersionMarker,
};

use crate::render::{
    current_output_style, format_snapshot_lines, format_update_report, render_status_line,
    OutputStyle, PipelineSpinner,
};
use crate::{signals, Cli, Commands};

const CONFIG_ENV: &str = "LANTERN_CONFIG";
const EXIT_OK: i32 = 0;
const EXIT_FAILURE: i32 = 1;
const EXIT_USAGE: i32 = 2;

pub(crate) fn run_cli(cli: Cli) -> Result<i32> {
    let output_style = current_output_style();
    let config = match load_config(cli.config, std::env::var_os(CONFIG_ENV)) {
        Ok(config) => config,
        Err(err) => {
            eprintln!(
                "{}",
                render_status_line(output_style, "fail", &format!("{err:#}"))
            );
            return Ok(EXIT_USAGE);
        }
    };

    match cli.command {
        Commands::Update {
            target,
            force,
            update_models,
        } => {
            let request = UpdateRequest {
                target,
                force,
                update_models,
            };
            run_update_command(&config, &request, output_style)
        }
        Commands::Rollback { snapshot } => {
            run_rollback_command(&config, snapshot.as_deref(), output_style)
        }
        Commands::Snapshots => {
            let store = snapshot_store(&config);
            let last = store.most_recent_id()?;
            for line in format_snapshot_lines(&store.list()?, last.as_deref(), output_style) {
                println!("{line}");
            }
            Ok(EXIT_OK)
        }
        Commands::Status => {
            for line in status_lines(&config, output_style)? {
                println!("{line}");
            }
            Ok(EXIT_OK)
        }
    }
}

/// `--config` wins, then `$LANTERN_CONFIG`; both must exist. The default location
/// may be missing, in which case built-in defaults apply.
pub(crate) fn resolve_config_path(
    explicit: Option<PathBuf>,
    env_value: Option<OsString>,
) -> Result<(PathBuf, bool)> {
    if let Some(path) = explicit {
        return Ok((path, true));
    }
    if let Some(path) = env_value.filter(|value| !value.is_empty()) {
        return Ok((PathBuf::from(path), true));
    }
    Ok((default_config_path()?, false))
}

fn load_config(explicit: Option<PathBuf>, env_value: Option<OsString>) -> Result<UpdaterConfig> {
    let (path, explicit) = resolve_config_path(explicit, env_value)?;
    let config = UpdaterConfig::load(&path, explicit)?;
    Ok(match std::env::var_os("HOME") {
        Some(home) => config.resolve_paths(&PathBuf::from(home)),
        None => config,
    })
}

fn snapshot_store(config: &UpdaterConfig) -> SnapshotStore {
    SnapshotStore::new(SnapshotLayout::new(config.state_dir.clone()))
}

fn run_update_command(
    config: &UpdaterConfig,
    request: &UpdateRequest,
    style: OutputStyle,
) -> Result<i32> {
    let cancel = signals::install_interrupt_handler()?;
    let runner: Rc<dyn ExternalToolRunner> = Rc::new(ProcessToolRunner::new(cancel.clone()));
    let probe: Rc<dyn LivenessProbe> = Rc::new(HttpLivenessProbe);
    let orchestrator = UpdateOrchestrator::from_config(config, runner, probe, cancel);

    let spinner = PipelineSpinner::start(style, "update");
    let report = orchestrator.run(request);
    spinner.finish();

    for line in format_update_report(&report, style) {
        println!("{line}");
    }
    Ok(report.exit_code())
}

fn run_rollback_command(
    config: &UpdaterConfig,
    snapshot: Option<&str>,
    style: OutputStyle,
) -> Result<i32> {
    let store = snapshot_store(config);
    let outcome = match snapshot {
        Some(id) => store.restore(id).map(|restored| restored.id),
        None => RollbackController::new(store).rollback(),
    };

    match outcome {
        Ok(id) => {
            println!(
                "{}",
                render_status_line(style, "ok", &format!("restored snapshot {id}"))
            );
            Ok(EXIT_OK)
        }
        Err(err) => {
            println!("{}", render_status_line(style, "fail", &err.to_string()));
            Ok(EXIT_FAILURE)
        }
    }
}

fn status_lines(config: &UpdaterConfig, style: OutputStyle) -> Result<Vec<String>> {
    let store = snapshot_store(config);
    let marker = VersionMarker::new(config.version_marker_path());

    let installed = match marker.read() {
        Ok(version) => render_status_line(style, "ok", &format!("installed: {version}")),
        Err(err) => render_status_line(style, "warn", &format!("installed: unknown ({err:#})")),
    };
    let last = store
        .most_recent_id()
        .context("failed to read rollback target")?;
    let snapshots = store.list()?;

    Ok(vec![
        installed,
        render_status_line(
            style,
            "step",
            &format!("rollback target: {}", last.as_deref().unwrap_or("none")),
        ),
        render_status_line(style, "step", &format!("snapshots: {}", snapshots.len())),
        render_status_line(
            style,
            "step",
            &format!("state dir: {}", config.state_dir.display()),
        ),
    ])
}
