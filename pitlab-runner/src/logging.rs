//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Variable holding the log filter, e.g. `PITLAB_LOG=pitlab_core::olm=debug`.
pub const LOG_ENV: &str = "PITLAB_LOG";

/// Install a fmt subscriber. `PITLAB_LOG` wins over `default_filter`; with
/// neither set the level is `info`. Returns `false` when a global subscriber
/// was already installed, which makes repeated calls harmless.
pub fn init(default_filter: Option<&str>) -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(default_filter.unwrap_or("info")))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
