use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use lantern_security::{sha256_file_hex, sha256_hex, Sha256Accumulator};

/// Copies a file, symlink or directory tree from `src` to `dst`. Parent
/// directories of `dst` are created as needed; existing files are overwritten.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    let metadata = fs::symlink_metadata(src)
        .with_context(|| format!("failed to stat source path: {}", src.display()))?;

    if metadata.is_dir() {
        fs::create_dir_all(dst)
            .with_context(|| format!("failed to create directory: {}", dst.display()))?;
        for entry in fs::read_dir(src)
            .with_context(|| format!("failed to read directory: {}", src.display()))?
        {
            let entry =
                entry.with_context(|| format!("failed to iterate directory: {}", src.display()))?;
            copy_tree(&entry.path(), &dst.join(entry.file_name()))?;
        }
        return Ok(());
    }

    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }

    #[cfg(unix)]
    if metadata.file_type().is_symlink() {
        let target = fs::read_link(src)
            .with_context(|| format!("failed to read symlink: {}", src.display()))?;
        remove_path_if_exists(dst)?;
        std::os::unix::fs::symlink(&target, dst).with_context(|| {
            format!(
                "failed to copy symlink {} -> {}",
                dst.display(),
                target.display()
            )
        })?;
        return Ok(());
    }

    fs::copy(src, dst)
        .with_context(|| format!("failed to copy {} to {}", src.display(), dst.display()))?;
    Ok(())
}

/// Removes a file, symlink or directory tree. Returns whether anything was removed.
pub fn remove_path_if_exists(path: &Path) -> Result<bool> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to stat path: {}", path.display()));
        }
    };

    if metadata.is_dir() {
        fs::remove_dir_all(path)
            .with_context(|| format!("failed to remove directory: {}", path.display()))?;
    } else {
        fs::remove_file(path)
            .with_context(|| format!("failed to remove file: {}", path.display()))?;
    }
    Ok(true)
}

/// Content digest of a file or directory tree: every entry's relative path plus
/// the SHA-256 of regular files, the link target of symlinks, and a marker for
/// directories so empty ones count. `None` when `root` does not exist.
pub fn tree_digest(root: &Path) -> Result<Option<String>> {
    let metadata = match fs::symlink_metadata(root) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to stat path: {}", root.display()));
        }
    };

    let mut accumulator = Sha256Accumulator::new();
    if !metadata.is_dir() {
        accumulator.push("", &leaf_digest(root, &metadata)?);
        return Ok(Some(accumulator.finish()));
    }

    let mut entries = Vec::new();
    let mut queue: VecDeque<PathBuf> = VecDeque::new();
    queue.push_back(root.to_path_buf());
    while let Some(dir) = queue.pop_front() {
        for entry in fs::read_dir(&dir)
            .with_context(|| format!("failed to read directory: {}", dir.display()))?
        {
            let entry =
                entry.with_context(|| format!("failed to iterate directory: {}", dir.display()))?;
            let path = entry.path();
            let metadata = fs::symlink_metadata(&path)
                .with_context(|| format!("failed to stat path: {}", path.display()))?;
            let relative = normalize_relative(root, &path)?;
            if metadata.is_dir() {
                entries.push((format!("{relative}/"), "dir".to_string()));
                queue.push_back(path);
            } else {
                entries.push((relative, leaf_digest(&path, &metadata)?));
            }
        }
    }

    entries.sort();
    for (relative, digest) in &entries {
        accumulator.push(relative, digest);
    }
    Ok(Some(accumulator.finish()))
}

fn leaf_digest(path: &Path, metadata: &fs::Metadata) -> Result<String> {
    if metadata.file_type().is_symlink() {
        let target = fs::read_link(path)
            .with_context(|| format!("failed to read symlink: {}", path.display()))?;
        return Ok(sha256_hex(
            format!("symlink:{}", target.display()).as_bytes(),
        ));
    }
    sha256_file_hex(path)
}

fn normalize_relative(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root).with_context(|| {
        format!(
            "failed deriving relative path {} from {}",
            path.display(),
            root.display()
        )
    })?;
    Ok(relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}

/// Atomically replaces `path` with `contents` via a sibling temporary file.
pub fn write_file_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let tmp = sibling_path(path, "tmp");
    fs::write(&tmp, contents)
        .with_context(|| format!("failed to write temporary file: {}", tmp.display()))?;
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(err).with_context(|| {
            format!(
                "failed to move {} into place at {}",
                tmp.display(),
                path.display()
            )
        });
    }
    Ok(())
}

/// `<parent>/.<name>.lantern-<suffix>`, a hidden neighbour on the same filesystem.
pub(crate) fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".to_string());
    let sibling = format!(".{name}.lantern-{suffix}");
    match path.parent() {
        Some(parent) => parent.join(sibling),
        None => PathBuf::from(sibling),
    }
}
