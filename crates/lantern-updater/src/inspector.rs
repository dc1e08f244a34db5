use std::rc::Rc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use lantern_core::{ExternalToolRunner, ToolCommand, UpdateError, UpdaterConfig, VersionInfo};
use tracing::{debug, info};

use crate::VersionMarker;

/// Reads the installed version and resolves the version to update to. Never
/// mutates anything.
pub struct VersionInspector {
    marker: VersionMarker,
    runner: Rc<dyn ExternalToolRunner>,
    latest_version_command: Vec<String>,
    source_name: String,
    timeout: Duration,
}

impl VersionInspector {
    pub fn from_config(config: &UpdaterConfig, runner: Rc<dyn ExternalToolRunner>) -> Self {
        Self {
            marker: VersionMarker::new(config.version_marker_path()),
            runner,
            latest_version_command: config.source.latest_version_command.clone(),
            source_name: config.source.name.clone(),
            timeout: config.pipeline_timeout(),
        }
    }

    pub fn installed_version(&self) -> Result<String> {
        self.marker.read()
    }

    /// `requested` wins over the configured source. Downgrades are refused.
    pub fn inspect(&self, requested: Option<&str>) -> Result<VersionInfo, UpdateError> {
        self.inspect_inner(requested)
            .map_err(UpdateError::precondition)
    }

    fn inspect_inner(&self, requested: Option<&str>) -> Result<VersionInfo> {
        let current = self.marker.read()?;
        let target = match requested {
            Some(target) => target.trim().to_string(),
            None => self.latest_available()?,
        };

        let info = VersionInfo::new(&current, &target)?;
        if info.target_version() < info.current_version() {
            return Err(anyhow!(
                "target version {} is older than installed version {}; downgrades are not supported",
                info.target,
                info.current
            ));
        }

        info!(current = %info.current, target = %info.target, "versions resolved");
        Ok(info)
    }

    fn latest_available(&self) -> Result<String> {
        let command = ToolCommand::from_template(
            &self.latest_version_command,
            &[("source", self.source_name.as_str())],
        )
        .context("invalid source.latest_version_command")?;

        let output = self.runner.run(&command, self.timeout).with_context(|| {
            format!("failed to query latest version of {}", self.source_name)
        })?;
        if !output.success() {
            return Err(anyhow!(
                "failed to query latest version of {}: {}",
                self.source_name,
                output.failure_summary(&command, self.timeout)
            ));
        }

        debug!(stdout = %output.stdout.trim(), "latest version query output");
        VersionInfo::first_version_token(&output.stdout).ok_or_else(|| {
            anyhow!(
                "`{}` did not report a version for {}",
                command.display(),
                self.source_name
            )
        })
    }
}
