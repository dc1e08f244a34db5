use std::rc::Rc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use lantern_core::{ExternalToolRunner, ToolCommand, UpdateError, UpdaterConfig};
use tracing::{info, warn};

use crate::VersionMarker;

/// Runs the external package-update tool and, optionally, refreshes the models
/// the application depends on.
pub struct UpdateApplier {
    runner: Rc<dyn ExternalToolRunner>,
    marker: VersionMarker,
    command: Vec<String>,
    update_models: bool,
    models: Vec<String>,
    model_command: Vec<String>,
    timeout: Duration,
}

impl UpdateApplier {
    pub fn from_config(config: &UpdaterConfig, runner: Rc<dyn ExternalToolRunner>) -> Self {
        Self {
            runner,
            marker: VersionMarker::new(config.version_marker_path()),
            command: config.apply.command.clone(),
            update_models: config.apply.update_models,
            models: config.apply.models.clone(),
            model_command: config.apply.model_command.clone(),
            timeout: config.pipeline_timeout(),
        }
    }

    /// Installs `target` and records it in the version marker. Model refresh runs
    /// when configured or when `update_models` is requested; its failures are
    /// logged and never fail the stage, except an interrupt.
    pub fn apply(&self, target: &str, update_models: bool) -> Result<(), UpdateError> {
        self.apply_primary(target).map_err(UpdateError::apply)?;

        if self.update_models || update_models {
            self.refresh_models().map_err(UpdateError::apply)?;
        }
        Ok(())
    }

    fn apply_primary(&self, target: &str) -> Result<()> {
        let command = ToolCommand::from_template(&self.command, &[("target", target)])
            .context("invalid apply.command")?;
        info!(command = %command.display(), "applying update");

        let output = self.runner.run(&command, self.timeout)?;
        if !output.success() {
            return Err(anyhow!(output.failure_summary(&command, self.timeout)));
        }

        self.marker.write(target)
    }

    fn refresh_models(&self) -> Result<()> {
        for model in &self.models {
            let command = ToolCommand::from_template(&self.model_command, &[("model", model)])
                .context("invalid apply.model_command")?;
            info!(model = %model, "refreshing model");

            match self.runner.run(&command, self.timeout) {
                Ok(output) if output.success() => {}
                Ok(output) if output.was_cancelled() => {
                    return Err(anyhow!(output.failure_summary(&command, self.timeout)));
                }
                Ok(output) => warn!(
                    model = %model,
                    "model refresh failed; continuing: {}",
                    output.failure_summary(&command, self.timeout)
                ),
                Err(err) => warn!(model = %model, "model refresh failed; continuing: {err:#}"),
            }
        }
        Ok(())
    }
}
