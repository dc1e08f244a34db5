use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use lantern_snapshot::write_file_atomic;

/// The `VERSION` file under the install root naming the installed release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMarker {
    path: PathBuf,
}

impl VersionMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<String> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(anyhow!(
                    "installed version marker not found: {}",
                    self.path.display()
                ));
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!(
                        "failed to read installed version marker: {}",
                        self.path.display()
                    )
                });
            }
        };

        let version = raw.trim();
        if version.is_empty() {
            return Err(anyhow!(
                "installed version marker is empty: {}",
                self.path.display()
            ));
        }
        Ok(version.to_string())
    }

    pub fn write(&self, version: &str) -> Result<()> {
        write_file_atomic(&self.path, format!("{version}\n").as_bytes()).with_context(|| {
            format!(
                "failed to record installed version {version} in {}",
                self.path.display()
            )
        })
    }
}
