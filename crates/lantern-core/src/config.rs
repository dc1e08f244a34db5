use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

/// Updater configuration, read from `updater.toml`. Every field has a default so
/// a partial file (or no file) is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpdaterConfig {
    pub install_root: PathBuf,
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub state_dir: PathBuf,
    pub source: SourceConfig,
    pub apply: ApplyConfig,
    pub migrate: MigrateConfig,
    pub verify: VerifyConfig,
    pub daemon: DaemonConfig,
    pub pipeline: PipelineConfig,
    pub snapshot: SnapshotConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    pub name: String,
    pub latest_version_command: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApplyConfig {
    pub command: Vec<String>,
    pub update_models: bool,
    pub models: Vec<String>,
    pub model_command: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MigrateConfig {
    pub command: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VerifyConfig {
    pub executable: String,
    pub smoke_args: Vec<String>,
    pub search_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub liveness_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SnapshotConfig {
    pub include_cache: bool,
    pub extra_paths: Vec<PathBuf>,
    pub keep: usize,
}

const APP_NAME: &str = "lantern-app";

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            install_root: PathBuf::from("~/.local/share/lantern/app"),
            config_dir: PathBuf::from("~/.config/lantern"),
            data_dir: PathBuf::from("~/.local/share/lantern/data"),
            cache_dir: PathBuf::from("~/.cache/lantern"),
            state_dir: PathBuf::from("~/.local/state/lantern"),
            source: SourceConfig::default(),
            apply: ApplyConfig::default(),
            migrate: MigrateConfig::default(),
            verify: VerifyConfig::default(),
            daemon: DaemonConfig::default(),
            pipeline: PipelineConfig::default(),
            snapshot: SnapshotConfig::default(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            name: APP_NAME.to_string(),
            latest_version_command: argv(&["pip", "index", "versions", APP_NAME]),
        }
    }
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            command: argv(&["pip", "install", "--upgrade", "lantern-app=={target}"]),
            update_models: false,
            models: Vec::new(),
            model_command: argv(&["ollama", "pull", "{model}"]),
        }
    }
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            command: argv(&[APP_NAME, "migrate", "{migration}"]),
        }
    }
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            executable: APP_NAME.to_string(),
            smoke_args: argv(&["--version"]),
            search_path: None,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            liveness_url: "http://127.0.0.1:11434/api/version".to_string(),
            timeout_secs: 5,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { timeout_secs: 600 }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            include_cache: false,
            extra_paths: Vec::new(),
            keep: 5,
        }
    }
}

impl UpdaterConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).context("failed to parse updater config")?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path`, or falls back to defaults when `path` is the implicit default
    /// location and does not exist. An explicitly requested file must exist.
    pub fn load(path: &Path, explicit: bool) -> Result<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound && !explicit => {
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read updater config: {}", path.display()));
            }
        };

        Self::from_toml_str(&raw)
            .with_context(|| format!("invalid updater config: {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        for (field, command) in [
            ("source.latest_version_command", &self.source.latest_version_command),
            ("apply.command", &self.apply.command),
            ("apply.model_command", &self.apply.model_command),
            ("migrate.command", &self.migrate.command),
        ] {
            if command.first().map_or(true, |program| program.trim().is_empty()) {
                return Err(anyhow!("{field} must name a program"));
            }
        }
        if self.verify.executable.trim().is_empty() {
            return Err(anyhow!("verify.executable must not be empty"));
        }
        if self.daemon.timeout_secs == 0 {
            return Err(anyhow!("daemon.timeout_secs must be greater than zero"));
        }
        if self.pipeline.timeout_secs == 0 {
            return Err(anyhow!("pipeline.timeout_secs must be greater than zero"));
        }
        if self.snapshot.keep == 0 {
            return Err(anyhow!("snapshot.keep must be at least 1"));
        }
        if !(self.daemon.liveness_url.starts_with("http://")
            || self.daemon.liveness_url.starts_with("https://"))
        {
            return Err(anyhow!(
                "daemon.liveness_url must be an http(s) URL: {}",
                self.daemon.liveness_url
            ));
        }
        Ok(())
    }

    /// Returns a copy with every `~/` path expanded against `home`.
    pub fn resolve_paths(mut self, home: &Path) -> Self {
        for path in [
            &mut self.install_root,
            &mut self.config_dir,
            &mut self.data_dir,
            &mut self.cache_dir,
            &mut self.state_dir,
        ] {
            *path = expand_home(path.as_path(), home);
        }
        self.snapshot.extra_paths = self
            .snapshot
            .extra_paths
            .iter()
            .map(|path| expand_home(path, home))
            .collect();
        self
    }

    pub fn version_marker_path(&self) -> PathBuf {
        self.install_root.join("VERSION")
    }

    pub fn pipeline_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline.timeout_secs)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.daemon.timeout_secs)
    }
}

pub fn expand_home(path: &Path, home: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home.join(rest),
        Err(_) => path.to_path_buf(),
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.trim().is_empty() {
            return Ok(PathBuf::from(xdg).join("lantern").join("updater.toml"));
        }
    }

    let home = std::env::var("HOME").context("HOME is not set; cannot resolve config path")?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join("lantern")
        .join("updater.toml"))
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}
