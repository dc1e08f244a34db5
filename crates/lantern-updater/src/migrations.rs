use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use lantern_core::{ExternalToolRunner, ToolCommand, UpdateError, UpdaterConfig};
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSummary {
    pub applied: Vec<String>,
    /// Pending entries that were already recorded as applied and only cleaned up.
    pub skipped: Vec<String>,
}

impl MigrationSummary {
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty() && self.skipped.is_empty()
    }
}

/// Applies migrations queued under `<data_dir>/migrations/pending`, moving each
/// to `applied/` once it succeeds so a re-run never repeats one.
pub struct MigrationRunner {
    runner: Rc<dyn ExternalToolRunner>,
    migrations_dir: PathBuf,
    command: Vec<String>,
    timeout: Duration,
}

impl MigrationRunner {
    pub fn from_config(config: &UpdaterConfig, runner: Rc<dyn ExternalToolRunner>) -> Self {
        Self {
            runner,
            migrations_dir: config.data_dir.join("migrations"),
            command: config.migrate.command.clone(),
            timeout: config.pipeline_timeout(),
        }
    }

    pub fn pending_dir(&self) -> PathBuf {
        self.migrations_dir.join("pending")
    }

    pub fn applied_dir(&self) -> PathBuf {
        self.migrations_dir.join("applied")
    }

    pub fn pending(&self) -> Result<Vec<String>> {
        let dir = self.pending_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read pending migrations: {}", dir.display())
                });
            }
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry
                .with_context(|| format!("failed to iterate pending migrations: {}", dir.display()))?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(ToOwned::to_owned) else {
                continue;
            };
            if !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn run(&self) -> Result<MigrationSummary, UpdateError> {
        let pending = self.pending().map_err(UpdateError::migration)?;
        let mut summary = MigrationSummary::default();
        if pending.is_empty() {
            debug!("no pending migrations");
            return Ok(summary);
        }

        for name in pending {
            let pending_path = self.pending_dir().join(&name);
            let applied_path = self.applied_dir().join(&name);
            if applied_path.exists() {
                debug!(migration = %name, "migration already applied; dropping pending copy");
                fs::remove_file(&pending_path)
                    .with_context(|| format!("failed to drop already applied migration {name}"))
                    .map_err(UpdateError::migration)?;
                summary.skipped.push(name);
                continue;
            }

            self.apply_one(&name, &pending_path, &applied_path)
                .with_context(|| format!("migration {name} failed"))
                .map_err(UpdateError::migration)?;
            summary.applied.push(name);
        }

        info!(applied = summary.applied.len(), "migrations complete");
        Ok(summary)
    }

    fn apply_one(&self, name: &str, pending_path: &Path, applied_path: &Path) -> Result<()> {
        let path = pending_path.display().to_string();
        let command = ToolCommand::from_template(
            &self.command,
            &[("migration", name), ("path", path.as_str())],
        )
        .context("invalid migrate.command")?;
        info!(migration = %name, "applying migration");

        let output = self.runner.run(&command, self.timeout)?;
        if !output.success() {
            return Err(anyhow!(output.failure_summary(&command, self.timeout)));
        }

        if let Some(parent) = applied_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::rename(pending_path, applied_path).with_context(|| {
            format!(
                "failed to record migration as applied: {}",
                applied_path.display()
            )
        })
    }
}
