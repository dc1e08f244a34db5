mod applier;
mod cancel;
mod inspector;
mod marker;
mod migrations;
mod orchestrator;
mod rollback;
mod runner;
mod verifier;

pub use applier::UpdateApplier;
pub use cancel::CancelFlag;
pub use inspector::VersionInspector;
pub use marker::VersionMarker;
pub use migrations::{MigrationRunner, MigrationSummary};
pub use orchestrator::{UpdateOrchestrator, UpdateReport, UpdateRequest};
pub use rollback::RollbackController;
pub use runner::ProcessToolRunner;
pub use verifier::{HttpLivenessProbe, LivenessProbe, Verifier};
