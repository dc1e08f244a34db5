use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "LANTERN_LOG";

/// Installs the global subscriber. Logs always go to stderr so they never mix
/// with status lines on stdout.
pub(crate) fn init(verbose: bool) {
    let filter = EnvFilter::new(filter_directive(
        verbose,
        std::env::var(LOG_ENV).ok().as_deref(),
    ));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

/// `--verbose` wins over the environment; an empty variable counts as unset.
pub(crate) fn filter_directive(verbose: bool, env_value: Option<&str>) -> String {
    if verbose {
        return "debug".to_string();
    }
    match env_value.map(str::trim) {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => "warn".to_string(),
    }
}
