use anyhow::{Context, Result};
use lantern_updater::CancelFlag;
use signal_hook::consts::{SIGINT, SIGTERM};

/// Routes SIGINT and SIGTERM into the returned flag. The running tool is
/// stopped by the runner and the pipeline unwinds through rollback.
pub(crate) fn install_interrupt_handler() -> Result<CancelFlag> {
    let flag = CancelFlag::new();
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, flag.shared())
            .with_context(|| format!("failed to register handler for signal {signal}"))?;
    }
    Ok(flag)
}
