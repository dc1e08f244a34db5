use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use lantern_core::{ExternalToolRunner, ToolCommand, UpdateError, UpdaterConfig};
use tracing::{debug, info};

/// Bounded reachability check of the model-serving daemon.
pub trait LivenessProbe {
    fn probe(&self, url: &str, timeout: Duration) -> Result<()>;
}

/// Plain HTTP GET; any 2xx answer counts as alive.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpLivenessProbe;

impl LivenessProbe for HttpLivenessProbe {
    fn probe(&self, url: &str, timeout: Duration) -> Result<()> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        let response = client.get(url).send().with_context(|| {
            format!(
                "daemon at {url} did not answer within {}s",
                timeout.as_secs()
            )
        })?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "daemon at {url} answered with status {}",
                response.status()
            ));
        }
        Ok(())
    }
}

/// Post-update health checks, run in order and short-circuiting: executable,
/// liveness, smoke.
pub struct Verifier {
    runner: Rc<dyn ExternalToolRunner>,
    probe: Rc<dyn LivenessProbe>,
    executable: String,
    search_path: Option<String>,
    smoke_args: Vec<String>,
    liveness_url: String,
    liveness_timeout: Duration,
    smoke_timeout: Duration,
}

impl Verifier {
    pub fn from_config(
        config: &UpdaterConfig,
        runner: Rc<dyn ExternalToolRunner>,
        probe: Rc<dyn LivenessProbe>,
    ) -> Self {
        Self {
            runner,
            probe,
            executable: config.verify.executable.clone(),
            search_path: config.verify.search_path.clone(),
            smoke_args: config.verify.smoke_args.clone(),
            liveness_url: config.daemon.liveness_url.clone(),
            liveness_timeout: config.liveness_timeout(),
            smoke_timeout: config.pipeline_timeout(),
        }
    }

    pub fn check(&self) -> Result<(), UpdateError> {
        let executable = self
            .resolve_executable()
            .context("executable check failed")
            .map_err(UpdateError::verification)?;
        debug!(executable = %executable.display(), "executable resolved");

        self.probe
            .probe(&self.liveness_url, self.liveness_timeout)
            .context("liveness check failed")
            .map_err(UpdateError::verification)?;
        debug!(url = %self.liveness_url, "daemon is alive");

        self.smoke(&executable)
            .context("smoke check failed")
            .map_err(UpdateError::verification)?;

        info!("post-update verification passed");
        Ok(())
    }

    fn resolve_executable(&self) -> Result<PathBuf> {
        let candidate = Path::new(&self.executable);
        if candidate.components().count() > 1 || candidate.is_absolute() {
            if is_executable(candidate) {
                return Ok(candidate.to_path_buf());
            }
            return Err(anyhow!("{} is not an executable file", candidate.display()));
        }

        let search_path = match &self.search_path {
            Some(path) => OsString::from(path),
            None => env::var_os("PATH").unwrap_or_default(),
        };
        env::split_paths(&search_path)
            .map(|dir| dir.join(&self.executable))
            .find(|path| is_executable(path))
            .ok_or_else(|| anyhow!("`{}` was not found on the search path", self.executable))
    }

    fn smoke(&self, executable: &Path) -> Result<()> {
        let command =
            ToolCommand::new(executable.display().to_string()).args(self.smoke_args.iter().cloned());
        let output = self.runner.run(&command, self.smoke_timeout)?;
        if !output.success() {
            return Err(anyhow!(output.failure_summary(&command, self.smoke_timeout)));
        }
        Ok(())
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    fs::metadata(path)
        .map(|metadata| metadata.is_file() && metadata.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|metadata| metadata.is_file())
        .unwrap_or(false)
}
