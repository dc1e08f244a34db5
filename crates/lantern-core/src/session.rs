use std::time::{SystemTime, UNIX_EPOCH};

use crate::{ErrorRecord, VersionInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Precheck,
    Backup,
    Apply,
    Migrate,
    Verify,
    RollingBack,
    Done,
    RolledBack,
    Failed,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Precheck => "precheck",
            Self::Backup => "backup",
            Self::Apply => "apply",
            Self::Migrate => "migrate",
            Self::Verify => "verify",
            Self::RollingBack => "rolling_back",
            Self::Done => "done",
            Self::RolledBack => "rolled_back",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::RolledBack | Self::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Precheck => 0,
            Self::Backup => 1,
            Self::Apply => 2,
            Self::Migrate => 3,
            Self::Verify => 4,
            Self::RollingBack => 5,
            Self::Done | Self::RolledBack | Self::Failed => 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageTransition {
    pub from: Stage,
    pub to: Stage,
    pub at_unix_millis: u128,
}

/// In-memory record of one pipeline run. Only the orchestrator mutates it and
/// nothing about it is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSession {
    pub session_id: String,
    pub stage: Stage,
    pub version_info: Option<VersionInfo>,
    pub snapshot_id: Option<String>,
    pub error: Option<ErrorRecord>,
    pub transitions: Vec<StageTransition>,
}

impl UpdateSession {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            stage: Stage::Precheck,
            version_info: None,
            snapshot_id: None,
            error: None,
            transitions: Vec::new(),
        }
    }

    pub fn generate_id() -> String {
        let started_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        format!("upd-{started_at}-{}", std::process::id())
    }

    /// Moves forward to `next`. Stages only ever advance; a request to move
    /// backwards or to leave a terminal stage is ignored and reported as `false`.
    pub fn advance(&mut self, next: Stage) -> bool {
        if self.stage.is_terminal() || next.rank() <= self.stage.rank() {
            return false;
        }

        let at_unix_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        self.transitions.push(StageTransition {
            from: self.stage,
            to: next,
            at_unix_millis,
        });
        self.stage = next;
        true
    }

    pub fn visited(&self, stage: Stage) -> bool {
        self.stage == stage || self.transitions.iter().any(|t| t.from == stage)
    }

    pub fn stage_path(&self) -> Vec<Stage> {
        let mut path = Vec::with_capacity(self.transitions.len() + 1);
        path.push(
            self.transitions
                .first()
                .map(|transition| transition.from)
                .unwrap_or(self.stage),
        );
        path.extend(self.transitions.iter().map(|transition| transition.to));
        path
    }

    pub fn is_success(&self) -> bool {
        self.stage == Stage::Done
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}
