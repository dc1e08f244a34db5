mod config;
mod error;
mod session;
mod snapshot;
mod tool;
mod version;

pub use config::{
    default_config_path, expand_home, ApplyConfig, DaemonConfig, MigrateConfig, PipelineConfig,
    SnapshotConfig, SourceConfig, UpdaterConfig, VerifyConfig,
};
pub use error::{ErrorKind, ErrorRecord, UpdateError};
pub use session::{Stage, StageTransition, UpdateSession};
pub use snapshot::{CapturedPath, Snapshot};
pub use tool::{ExternalToolRunner, ToolCommand, ToolExit, ToolOutput};
pub use version::VersionInfo;
