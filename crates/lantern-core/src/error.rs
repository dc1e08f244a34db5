use thiserror::Error;

use crate::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    PreconditionFailed,
    BackupFailed,
    ApplyFailed,
    MigrationFailed,
    VerificationFailed,
    RollbackFailed,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreconditionFailed => "precondition_failed",
            Self::BackupFailed => "backup_failed",
            Self::ApplyFailed => "apply_failed",
            Self::MigrationFailed => "migration_failed",
            Self::VerificationFailed => "verification_failed",
            Self::RollbackFailed => "rollback_failed",
        }
    }

    /// Failures after the installation was mutated; these are the ones that roll back.
    pub fn triggers_rollback(self) -> bool {
        matches!(
            self,
            Self::ApplyFailed | Self::MigrationFailed | Self::VerificationFailed
        )
    }
}

/// Boundary error of every pipeline component. Internals carry `anyhow` context
/// chains and flatten them into the message when crossing into this type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpdateError {
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("backup failed: {0}")]
    BackupFailed(String),

    #[error("apply failed: {0}")]
    ApplyFailed(String),

    #[error("migration failed: {0}")]
    MigrationFailed(String),

    #[error("verification failed: {0}")]
    VerificationFailed(String),

    #[error("rollback failed: {0}")]
    RollbackFailed(String),
}

impl UpdateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
            Self::BackupFailed(_) => ErrorKind::BackupFailed,
            Self::ApplyFailed(_) => ErrorKind::ApplyFailed,
            Self::MigrationFailed(_) => ErrorKind::MigrationFailed,
            Self::VerificationFailed(_) => ErrorKind::VerificationFailed,
            Self::RollbackFailed(_) => ErrorKind::RollbackFailed,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::PreconditionFailed(message)
            | Self::BackupFailed(message)
            | Self::ApplyFailed(message)
            | Self::MigrationFailed(message)
            | Self::VerificationFailed(message)
            | Self::RollbackFailed(message) => message,
        }
    }

    pub fn precondition(err: anyhow::Error) -> Self {
        Self::PreconditionFailed(format!("{err:#}"))
    }

    pub fn backup(err: anyhow::Error) -> Self {
        Self::BackupFailed(format!("{err:#}"))
    }

    pub fn apply(err: anyhow::Error) -> Self {
        Self::ApplyFailed(format!("{err:#}"))
    }

    pub fn migration(err: anyhow::Error) -> Self {
        Self::MigrationFailed(format!("{err:#}"))
    }

    pub fn verification(err: anyhow::Error) -> Self {
        Self::VerificationFailed(format!("{err:#}"))
    }

    pub fn rollback(err: anyhow::Error) -> Self {
        Self::RollbackFailed(format!("{err:#}"))
    }

    pub fn into_record(self, stage: Stage) -> ErrorRecord {
        ErrorRecord {
            kind: self.kind(),
            message: match self {
                Self::PreconditionFailed(message)
                | Self::BackupFailed(message)
                | Self::ApplyFailed(message)
                | Self::MigrationFailed(message)
                | Self::VerificationFailed(message)
                | Self::RollbackFailed(message) => message,
            },
            stage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    pub stage: Stage,
}

impl std::fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at stage {}: {}",
            self.kind.as_str(),
            self.stage.as_str(),
            self.message
        )
    }
}
