use std::rc::Rc;

use lantern_core::{ExternalToolRunner, Stage, UpdateError, UpdateSession, UpdaterConfig};
use lantern_snapshot::{SnapshotLayout, SnapshotScope, SnapshotStore};
use tracing::{error, info, warn};

use crate::{
    CancelFlag, LivenessProbe, MigrationRunner, RollbackController, UpdateApplier,
    VersionInspector, Verifier,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateRequest {
    /// Explicit target version; the configured source is queried when absent.
    pub target: Option<String>,
    /// Re-run the pipeline even when the target is already installed.
    pub force: bool,
    pub update_models: bool,
}

/// Outcome of one pipeline run. `failure` is the error that stopped the forward
/// path; `rollback_failure` is set only when restoring afterwards failed too.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    pub session: UpdateSession,
    pub failure: Option<UpdateError>,
    pub rollback_failure: Option<UpdateError>,
    pub pruned: Vec<String>,
}

impl UpdateReport {
    pub fn exit_code(&self) -> i32 {
        self.session.exit_code()
    }

    /// Snapshot to restore by hand after a failed rollback.
    pub fn last_known_good(&self) -> Option<&str> {
        self.rollback_failure
            .as_ref()
            .and(self.session.snapshot_id.as_deref())
    }
}

pub struct UpdateOrchestrator {
    inspector: VersionInspector,
    store: SnapshotStore,
    scope: SnapshotScope,
    applier: UpdateApplier,
    migrations: MigrationRunner,
    verifier: Verifier,
    rollback: RollbackController,
    cancel: CancelFlag,
    keep: usize,
}

impl UpdateOrchestrator {
    pub fn from_config(
        config: &UpdaterConfig,
        runner: Rc<dyn ExternalToolRunner>,
        probe: Rc<dyn LivenessProbe>,
        cancel: CancelFlag,
    ) -> Self {
        let store = SnapshotStore::new(SnapshotLayout::new(config.state_dir.clone()));
        Self {
            inspector: VersionInspector::from_config(config, Rc::clone(&runner)),
            scope: SnapshotScope::from_config(config),
            applier: UpdateApplier::from_config(config, Rc::clone(&runner)),
            migrations: MigrationRunner::from_config(config, Rc::clone(&runner)),
            verifier: Verifier::from_config(config, runner, probe),
            rollback: RollbackController::new(store.clone()),
            store,
            cancel,
            keep: config.snapshot.keep,
        }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Runs Precheck, Backup, Apply, Migrate and Verify in order. Any failure
    /// after Backup restores the snapshot taken by this run.
    pub fn run(&self, request: &UpdateRequest) -> UpdateReport {
        let mut session = UpdateSession::new(UpdateSession::generate_id());
        info!(session = %session.session_id, "starting update");

        let info = match self.inspector.inspect(request.target.as_deref()) {
            Ok(info) => info,
            Err(err) => return self.stop(session, err),
        };
        session.version_info = Some(info.clone());

        if info.is_current() && !request.force {
            info!(version = %info.current, "already up to date");
            self.enter(&mut session, Stage::Done);
            return report(session);
        }

        self.enter(&mut session, Stage::Backup);
        if let Err(err) = self.ensure_not_cancelled(UpdateError::BackupFailed) {
            return self.stop(session, err);
        }
        match self.store.create(self.scope.paths()) {
            Ok(snapshot) => session.snapshot_id = Some(snapshot.id),
            Err(err) => return self.stop(session, err),
        }

        self.enter(&mut session, Stage::Apply);
        if let Err(err) = self
            .ensure_not_cancelled(UpdateError::ApplyFailed)
            .and_then(|()| self.applier.apply(&info.target, request.update_models))
        {
            return self.stop(session, err);
        }

        self.enter(&mut session, Stage::Migrate);
        if let Err(err) = self
            .ensure_not_cancelled(UpdateError::MigrationFailed)
            .and_then(|()| self.migrations.run().map(|_| ()))
        {
            return self.stop(session, err);
        }

        self.enter(&mut session, Stage::Verify);
        if let Err(err) = self
            .ensure_not_cancelled(UpdateError::VerificationFailed)
            .and_then(|()| self.verifier.check())
        {
            return self.stop(session, err);
        }

        self.enter(&mut session, Stage::Done);
        let pruned = match self.store.prune(self.keep) {
            Ok(pruned) => pruned,
            Err(err) => {
                warn!("failed to prune old snapshots: {err:#}");
                Vec::new()
            }
        };
        info!(version = %info.target, "update complete");

        UpdateReport {
            pruned,
            ..report(session)
        }
    }

    fn enter(&self, session: &mut UpdateSession, next: Stage) {
        let from = session.stage;
        if session.advance(next) {
            info!(from = from.as_str(), to = next.as_str(), "stage transition");
        }
    }

    fn ensure_not_cancelled(&self, failure: fn(String) -> UpdateError) -> Result<(), UpdateError> {
        if self.cancel.is_cancelled() {
            return Err(failure("cancelled by interrupt".to_string()));
        }
        Ok(())
    }

    /// Failures before anything was mutated end the run; later ones roll back.
    fn stop(&self, session: UpdateSession, err: UpdateError) -> UpdateReport {
        if err.kind().triggers_rollback() {
            self.roll_back(session, err)
        } else {
            self.fail(session, err)
        }
    }

    fn fail(&self, mut session: UpdateSession, err: UpdateError) -> UpdateReport {
        error!(stage = session.stage.as_str(), "update failed: {err}");
        session.error = Some(err.clone().into_record(session.stage));
        self.enter(&mut session, Stage::Failed);
        UpdateReport {
            failure: Some(err),
            ..report(session)
        }
    }

    fn roll_back(&self, mut session: UpdateSession, err: UpdateError) -> UpdateReport {
        error!(stage = session.stage.as_str(), "update failed, rolling back: {err}");
        session.error = Some(err.clone().into_record(session.stage));
        self.enter(&mut session, Stage::RollingBack);

        match self.rollback.rollback() {
            Ok(restored) => {
                info!(snapshot = %restored, "installation restored");
                self.enter(&mut session, Stage::RolledBack);
                UpdateReport {
                    failure: Some(err),
                    ..report(session)
                }
            }
            Err(rollback_err) => {
                self.enter(&mut session, Stage::Failed);
                UpdateReport {
                    failure: Some(err),
                    rollback_failure: Some(rollback_err),
                    ..report(session)
                }
            }
        }
    }
}

fn report(session: UpdateSession) -> UpdateReport {
    UpdateReport {
        session,
        failure: None,
        rollback_failure: None,
        pruned: Vec::new(),
    }
}
