use anyhow::anyhow;
use lantern_core::UpdateError;
use lantern_snapshot::SnapshotStore;
use tracing::{error, info};

/// Restores the newest verified snapshot. Runs to completion once started; the
/// interrupt flag is not consulted.
#[derive(Debug, Clone)]
pub struct RollbackController {
    store: SnapshotStore,
}

impl RollbackController {
    pub fn new(store: SnapshotStore) -> Self {
        Self { store }
    }

    /// Returns the id of the restored snapshot.
    pub fn rollback(&self) -> Result<String, UpdateError> {
        let snapshot = self
            .store
            .most_recent()
            .map_err(UpdateError::rollback)?
            .ok_or_else(|| UpdateError::rollback(anyhow!("no snapshot available")))?;

        info!(snapshot = %snapshot.id, "rolling back");
        match self.store.restore(&snapshot.id) {
            Ok(restored) => {
                info!(snapshot = %restored.id, "rollback complete");
                Ok(restored.id)
            }
            Err(err) => {
                error!(snapshot = %snapshot.id, "rollback failed: {err}");
                Err(err)
            }
        }
    }
}
