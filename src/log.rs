use tracing_subscriber::EnvFilter;

use crate::config::Log;

/// Install the process-wide subscriber from the `[log]` config section. An
/// environment filter, when set, wins over the configured level. Safe to
/// call more than once; later calls keep the first subscriber.
pub fn init(log: &Log) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log.level.clone()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .try_init();
}
