use std::fs;
use std::io;

use anyhow::{anyhow, Context, Result};

use crate::fs_ops::write_file_atomic;
use crate::layout::is_valid_snapshot_id;
use crate::SnapshotLayout;

/// Durably records `id` as the newest verified snapshot. The write goes through
/// a temporary file and rename, so readers see either the old id or the new one.
pub fn write_last_snapshot_id(layout: &SnapshotLayout, id: &str) -> Result<()> {
    if !is_valid_snapshot_id(id) {
        return Err(anyhow!("refusing to record invalid snapshot id: {id}"));
    }

    let path = layout.pointer_path();
    write_file_atomic(&path, format!("{id}\n").as_bytes()).with_context(|| {
        format!(
            "failed to write last snapshot pointer: {}",
            path.display()
        )
    })
}

pub fn read_last_snapshot_id(layout: &SnapshotLayout) -> Result<Option<String>> {
    let path = layout.pointer_path();
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| {
                format!("failed to read last snapshot pointer: {}", path.display())
            });
        }
    };

    let id = raw.trim();
    if id.is_empty() {
        return Ok(None);
    }
    if !is_valid_snapshot_id(id) {
        return Err(anyhow!(
            "last snapshot pointer {} holds an invalid id: {id}",
            path.display()
        ));
    }

    Ok(Some(id.to_string()))
}
