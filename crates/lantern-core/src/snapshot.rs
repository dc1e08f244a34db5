use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One captured source path. `archived` is relative to the snapshot root;
/// `present == false` records that the source did not exist at capture time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedPath {
    pub source: PathBuf,
    pub archived: PathBuf,
    pub present: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub captured_paths: Vec<CapturedPath>,
    pub created_at_unix: u64,
}

impl Snapshot {
    pub fn present_paths(&self) -> impl Iterator<Item = &CapturedPath> {
        self.captured_paths.iter().filter(|captured| captured.present)
    }
}
