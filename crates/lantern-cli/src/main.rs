use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod dispatch;
mod logging;
mod render;
mod signals;

use render::{current_output_style, render_status_line};

const EXIT_FAILURE: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "lantern")]
#[command(about = "Transactional updater for the Lantern local assistant", long_about = None)]
struct Cli {
    /// Updater config file (defaults to $LANTERN_CONFIG, then ~/.config/lantern/updater.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log pipeline details to stderr
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Update the installation, rolling back automatically on failure
    Update {
        /// Version to install instead of the latest available one
        #[arg(long)]
        target: Option<String>,
        /// Run the pipeline even if the target is already installed
        #[arg(long)]
        force: bool,
        /// Also refresh the configured models
        #[arg(long)]
        update_models: bool,
    },
    /// Restore the newest snapshot, or the one given
    Rollback {
        #[arg(long)]
        snapshot: Option<String>,
    },
    /// List snapshots, newest first
    Snapshots,
    /// Show installed version and rollback state
    Status,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let code = match dispatch::run_cli(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!(
                "{}",
                render_status_line(current_output_style(), "fail", &format!("{err:#}"))
            );
            EXIT_FAILURE
        }
    };
    std::process::exit(code);
}
