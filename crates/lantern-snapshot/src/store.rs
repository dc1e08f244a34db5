use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use lantern_core::{CapturedPath, Snapshot, UpdateError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::fs_ops::{copy_tree, remove_path_if_exists, sibling_path, tree_digest, write_file_atomic};
use crate::layout::{
    format_snapshot_id, is_valid_snapshot_id, parse_snapshot_id, ENTRIES_DIR, MANIFEST_FILE,
};
use crate::pointer::{read_last_snapshot_id, write_last_snapshot_id};
use crate::SnapshotLayout;

const MANIFEST_FORMAT_VERSION: u32 = 1;
const MAX_ID_ATTEMPTS: u32 = 64;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotManifestFile {
    version: u32,
    id: String,
    created_at_unix: u64,
    entries: Vec<CapturedPath>,
}

/// Copier used for both capture and restore; swapped out in tests to inject
/// failures part way through.
pub(crate) type Copier<'a> = dyn FnMut(&Path, &Path) -> Result<()> + 'a;

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    layout: SnapshotLayout,
}

impl SnapshotStore {
    pub fn new(layout: SnapshotLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &SnapshotLayout {
        &self.layout
    }

    /// Captures `paths` in order into a new snapshot. Either every path is copied
    /// and verified and the snapshot becomes the rollback target, or nothing from
    /// this attempt remains on disk and the previous target is untouched.
    pub fn create(&self, paths: &[PathBuf]) -> Result<Snapshot, UpdateError> {
        self.create_with_copier(paths, &mut |src: &Path, dst: &Path| copy_tree(src, dst))
    }

    pub(crate) fn create_with_copier(
        &self,
        paths: &[PathBuf],
        copier: &mut Copier<'_>,
    ) -> Result<Snapshot, UpdateError> {
        self.layout.ensure_base_dirs().map_err(UpdateError::backup)?;
        self.discard_stale_staging();

        let (id, staging_root) = self.claim_staging_dir().map_err(UpdateError::backup)?;
        info!(snapshot = %id, paths = paths.len(), "capturing snapshot");

        let staged = match self.stage_snapshot(&id, &staging_root, paths, copier) {
            Ok(staged) => staged,
            Err(err) => {
                self.discard_attempt(&staging_root);
                return Err(UpdateError::backup(err));
            }
        };

        let final_root = self.layout.snapshot_dir(&id);
        if let Err(err) = fs::rename(&staging_root, &final_root) {
            self.discard_attempt(&staging_root);
            return Err(UpdateError::backup(anyhow!(err).context(format!(
                "failed to publish snapshot {} to {}",
                id,
                final_root.display()
            ))));
        }

        if let Err(err) = write_last_snapshot_id(&self.layout, &id) {
            self.discard_attempt(&final_root);
            return Err(UpdateError::backup(err));
        }

        info!(snapshot = %id, "snapshot recorded as rollback target");
        Ok(staged)
    }

    /// Restores every captured path of snapshot `id`, in capture order. Archive
    /// integrity is checked before anything is touched. A failure part way through
    /// is reported as is; already restored paths stay restored and the rest keep
    /// whatever state the failed update left.
    pub fn restore(&self, id: &str) -> Result<Snapshot, UpdateError> {
        self.restore_with_copier(id, &mut |src: &Path, dst: &Path| copy_tree(src, dst))
    }

    pub(crate) fn restore_with_copier(
        &self,
        id: &str,
        copier: &mut Copier<'_>,
    ) -> Result<Snapshot, UpdateError> {
        let snapshot = self.load(id).map_err(UpdateError::rollback)?;
        let snapshot_root = self.layout.snapshot_dir(id);

        self.verify_integrity(&snapshot)
            .map_err(UpdateError::rollback)?;

        info!(snapshot = %id, paths = snapshot.captured_paths.len(), "restoring snapshot");
        for captured in &snapshot.captured_paths {
            restore_entry(&snapshot_root, captured, copier)
                .with_context(|| {
                    format!(
                        "failed restoring {} from snapshot {id}",
                        captured.source.display()
                    )
                })
                .map_err(UpdateError::rollback)?;
        }

        info!(snapshot = %id, "snapshot restored");
        Ok(snapshot)
    }

    /// The snapshot named by the durable pointer, if any update ever captured one.
    pub fn most_recent(&self) -> Result<Option<Snapshot>> {
        let Some(id) = read_last_snapshot_id(&self.layout)? else {
            return Ok(None);
        };
        let snapshot = self
            .load(&id)
            .with_context(|| format!("last snapshot pointer names unreadable snapshot {id}"))?;
        Ok(Some(snapshot))
    }

    pub fn most_recent_id(&self) -> Result<Option<String>> {
        read_last_snapshot_id(&self.layout)
    }

    pub fn load(&self, id: &str) -> Result<Snapshot> {
        if !is_valid_snapshot_id(id) {
            return Err(anyhow!("invalid snapshot id: {id}"));
        }

        let path = self.layout.manifest_path(id);
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read snapshot manifest: {}", path.display()))?;
        let manifest: SnapshotManifestFile = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse snapshot manifest: {}", path.display()))?;

        if manifest.version != MANIFEST_FORMAT_VERSION {
            return Err(anyhow!(
                "unsupported snapshot manifest version {} in {}",
                manifest.version,
                path.display()
            ));
        }
        if manifest.id != id {
            return Err(anyhow!(
                "snapshot manifest {} records id {} instead of {id}",
                path.display(),
                manifest.id
            ));
        }

        Ok(Snapshot {
            id: manifest.id,
            captured_paths: manifest.entries,
            created_at_unix: manifest.created_at_unix,
        })
    }

    /// All published snapshots, newest first. Unreadable snapshot directories are
    /// skipped with a warning.
    pub fn list(&self) -> Result<Vec<Snapshot>> {
        let mut snapshots = Vec::new();
        for id in self.published_ids()? {
            match self.load(&id) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(err) => warn!(snapshot = %id, "skipping unreadable snapshot: {err:#}"),
            }
        }
        snapshots.sort_by(|left, right| right.id.cmp(&left.id));
        Ok(snapshots)
    }

    /// Deletes the oldest snapshots so at most `keep` remain. The snapshot named
    /// by the pointer is always kept. Returns the removed ids, oldest last.
    pub fn prune(&self, keep: usize) -> Result<Vec<String>> {
        let pinned = read_last_snapshot_id(&self.layout)?;
        let mut ids = self.published_ids()?;
        ids.sort_by(|left, right| right.cmp(left));

        let mut removed = Vec::new();
        for id in ids.into_iter().skip(keep) {
            if pinned.as_deref() == Some(id.as_str()) {
                continue;
            }
            let dir = self.layout.snapshot_dir(&id);
            remove_path_if_exists(&dir)
                .with_context(|| format!("failed to prune snapshot {id}"))?;
            debug!(snapshot = %id, "pruned snapshot");
            removed.push(id);
        }
        Ok(removed)
    }

    fn stage_snapshot(
        &self,
        id: &str,
        staging_root: &Path,
        paths: &[PathBuf],
        copier: &mut Copier<'_>,
    ) -> Result<Snapshot> {
        let entries_root = staging_root.join(ENTRIES_DIR);
        fs::create_dir_all(&entries_root)
            .with_context(|| format!("failed to create {}", entries_root.display()))?;

        let mut captured_paths = Vec::with_capacity(paths.len());
        for (index, source) in paths.iter().enumerate() {
            let archived = PathBuf::from(ENTRIES_DIR).join(entry_name(index, source));
            if fs::symlink_metadata(source).is_err() {
                debug!(path = %source.display(), "path absent at capture time");
                captured_paths.push(CapturedPath {
                    source: source.clone(),
                    archived,
                    present: false,
                    digest: None,
                });
                continue;
            }

            let destination = staging_root.join(&archived);
            copier(source, &destination)
                .with_context(|| format!("failed to capture {}", source.display()))?;

            let archived_digest = tree_digest(&destination)?
                .ok_or_else(|| anyhow!("archived copy missing: {}", destination.display()))?;
            let source_digest = tree_digest(source)?;
            if source_digest.as_deref() != Some(archived_digest.as_str()) {
                return Err(anyhow!(
                    "archived copy of {} does not match its source",
                    source.display()
                ));
            }

            debug!(path = %source.display(), digest = %archived_digest, "captured path");
            captured_paths.push(CapturedPath {
                source: source.clone(),
                archived,
                present: true,
                digest: Some(archived_digest),
            });
        }

        let manifest = SnapshotManifestFile {
            version: MANIFEST_FORMAT_VERSION,
            id: id.to_string(),
            created_at_unix: current_unix_timestamp(),
            entries: captured_paths,
        };
        let content = serde_json::to_string_pretty(&manifest)
            .context("failed to serialize snapshot manifest")?;
        write_file_atomic(&staging_root.join(MANIFEST_FILE), content.as_bytes())?;

        Ok(Snapshot {
            id: manifest.id,
            captured_paths: manifest.entries,
            created_at_unix: manifest.created_at_unix,
        })
    }

    fn verify_integrity(&self, snapshot: &Snapshot) -> Result<()> {
        let snapshot_root = self.layout.snapshot_dir(&snapshot.id);
        for captured in snapshot.present_paths() {
            let archived = snapshot_root.join(&captured.archived);
            let expected = captured.digest.as_deref().ok_or_else(|| {
                anyhow!(
                    "snapshot {} has no digest for {}",
                    snapshot.id,
                    captured.source.display()
                )
            })?;
            let actual = tree_digest(&archived)?;
            if actual.as_deref() != Some(expected) {
                return Err(anyhow!(
                    "snapshot {} is corrupted: archived copy of {} failed integrity check",
                    snapshot.id,
                    captured.source.display()
                ));
            }
        }
        Ok(())
    }

    /// Reserves a fresh id strictly newer than every published snapshot and
    /// creates its staging directory with create-new semantics.
    fn claim_staging_dir(&self) -> Result<(String, PathBuf)> {
        let floor = self
            .published_ids()?
            .iter()
            .filter_map(|id| parse_snapshot_id(id))
            .max()
            .map_or(0, |newest| newest + 1);
        let mut candidate = unix_nanos().max(floor);

        for _ in 0..MAX_ID_ATTEMPTS {
            let id = format_snapshot_id(candidate);
            if self.layout.snapshot_dir(&id).exists() {
                candidate += 1;
                continue;
            }

            let staging = self.layout.staging_path(&id);
            match fs::create_dir(&staging) {
                Ok(()) => return Ok((id, staging)),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => candidate += 1,
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!("failed to create staging dir: {}", staging.display())
                    });
                }
            }
        }

        Err(anyhow!(
            "failed to allocate a unique snapshot id after {MAX_ID_ATTEMPTS} attempts"
        ))
    }

    fn published_ids(&self) -> Result<Vec<String>> {
        let dir = self.layout.snapshots_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read snapshots dir: {}", dir.display()));
            }
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry =
                entry.with_context(|| format!("failed to iterate snapshots dir: {}", dir.display()))?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(ToOwned::to_owned) else {
                continue;
            };
            if is_valid_snapshot_id(&name) {
                ids.push(name);
            }
        }
        Ok(ids)
    }

    /// Leftovers of a capture interrupted by a crash are never valid snapshots.
    fn discard_stale_staging(&self) {
        let Ok(entries) = fs::read_dir(self.layout.staging_dir()) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            match remove_path_if_exists(&path) {
                Ok(_) => debug!(path = %path.display(), "discarded stale snapshot staging dir"),
                Err(err) => warn!(path = %path.display(), "failed to discard stale staging: {err:#}"),
            }
        }
    }

    fn discard_attempt(&self, root: &Path) {
        if let Err(err) = remove_path_if_exists(root) {
            warn!(path = %root.display(), "failed to remove partial snapshot: {err:#}");
        }
    }
}

fn restore_entry(snapshot_root: &Path, captured: &CapturedPath, copier: &mut Copier<'_>) -> Result<()> {
    let destination = &captured.source;
    if !captured.present {
        if remove_path_if_exists(destination)? {
            debug!(path = %destination.display(), "removed path absent at capture time");
        }
        return Ok(());
    }

    let archived = snapshot_root.join(&captured.archived);
    let staged = sibling_path(destination, "restore");
    remove_path_if_exists(&staged)?;
    if let Err(err) = copier(&archived, &staged) {
        let _ = remove_path_if_exists(&staged);
        return Err(err);
    }

    // The current contents move aside until the restored copy is in place, so a
    // failed swap leaves the path as it was.
    let aside = sibling_path(destination, "aside");
    remove_path_if_exists(&aside)?;
    let had_current = match fs::symlink_metadata(destination) {
        Ok(_) => true,
        Err(err) if err.kind() == io::ErrorKind::NotFound => false,
        Err(err) => {
            let _ = remove_path_if_exists(&staged);
            return Err(err)
                .with_context(|| format!("failed to stat path: {}", destination.display()));
        }
    };
    if had_current {
        if let Err(err) = fs::rename(destination, &aside) {
            let _ = remove_path_if_exists(&staged);
            return Err(err).with_context(|| {
                format!("failed to move {} aside", destination.display())
            });
        }
    }

    if let Err(err) = fs::rename(&staged, destination) {
        let _ = remove_path_if_exists(&staged);
        if had_current {
            if let Err(undo) = fs::rename(&aside, destination) {
                warn!(
                    path = %destination.display(),
                    aside = %aside.display(),
                    "failed to put current contents back: {undo}"
                );
            }
        }
        return Err(err).with_context(|| {
            format!(
                "failed to move restored copy {} into place at {}",
                staged.display(),
                destination.display()
            )
        });
    }

    if had_current {
        if let Err(err) = remove_path_if_exists(&aside) {
            warn!(path = %aside.display(), "failed to remove replaced contents: {err:#}");
        }
    }
    debug!(path = %destination.display(), "restored path");
    Ok(())
}

fn entry_name(index: usize, source: &Path) -> String {
    let name = source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".to_string());
    format!("{index:02}-{name}")
}

fn unix_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}

fn current_unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
