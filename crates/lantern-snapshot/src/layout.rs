use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub(crate) const SNAPSHOT_ID_PREFIX: &str = "snap-";

/// On-disk layout of the snapshot archive under `<state_dir>/snapshots`.
///
/// ```text
/// snapshots/
/// ├── LAST                        # id of the newest verified snapshot
/// ├── .staging/<id>/              # capture in progress, never listed
/// └── <id>/
///     ├── snapshot.json
///     └── entries/<nn>-<name>     # one faithful copy per captured path
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotLayout {
    state_dir: PathBuf,
}

impl SnapshotLayout {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.state_dir.join("snapshots")
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.snapshots_dir().join(".staging")
    }

    pub fn pointer_path(&self) -> PathBuf {
        self.snapshots_dir().join("LAST")
    }

    pub fn snapshot_dir(&self, id: &str) -> PathBuf {
        self.snapshots_dir().join(id)
    }

    pub fn staging_path(&self, id: &str) -> PathBuf {
        self.staging_dir().join(id)
    }

    pub fn manifest_path(&self, id: &str) -> PathBuf {
        self.snapshot_dir(id).join(MANIFEST_FILE)
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [self.snapshots_dir(), self.staging_dir()] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

pub(crate) const MANIFEST_FILE: &str = "snapshot.json";
pub(crate) const ENTRIES_DIR: &str = "entries";

pub(crate) fn format_snapshot_id(nanos: u128) -> String {
    format!("{SNAPSHOT_ID_PREFIX}{nanos:020}")
}

pub(crate) fn parse_snapshot_id(id: &str) -> Option<u128> {
    let digits = id.strip_prefix(SNAPSHOT_ID_PREFIX)?;
    if digits.len() != 20 || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

pub(crate) fn is_valid_snapshot_id(id: &str) -> bool {
    parse_snapshot_id(id).is_some()
}
