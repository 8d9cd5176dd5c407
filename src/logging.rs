use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "LOTW_LOG";

/// Install the stderr subscriber. Stdout is reserved for command reports.
pub fn init() {
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .with_env_var(LOG_ENV)
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
