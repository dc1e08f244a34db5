use std::path::{Path, PathBuf};

use lantern_core::UpdaterConfig;

/// Ordered set of paths a snapshot captures. Cache is left out unless the
/// configuration opts in; it can be regenerated after a rollback.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SnapshotScope {
    paths: Vec<PathBuf>,
}

impl SnapshotScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &UpdaterConfig) -> Self {
        let mut scope = Self::new()
            .with_path(config.version_marker_path())
            .with_path(config.config_dir.clone())
            .with_path(config.data_dir.clone());
        if config.snapshot.include_cache {
            scope = scope.with_path(config.cache_dir.clone());
        }
        for extra in &config.snapshot.extra_paths {
            scope = scope.with_path(extra.clone());
        }
        scope
    }

    /// Appends `path` unless it is already in scope.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if !self.paths.contains(&path) {
            self.paths.push(path);
        }
        self
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.iter().any(|candidate| candidate == path)
    }
}
