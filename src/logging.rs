//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Filter directives are taken from, in order:
//! 1. `CRAFTVISOR_LOG` (e.g. `info`, `craftvisor=debug`)
//! 2. `RUST_LOG`
//! 3. `info`

use tracing_subscriber::{EnvFilter, fmt};

pub const LOG_ENV: &str = "CRAFTVISOR_LOG";

/// Installs the global fmt subscriber. Later calls are ignored.
pub fn init_tracing() {
    let _ = fmt()
        .with_env_filter(env_filter())
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init();
}

fn env_filter() -> EnvFilter {
    filter_from(std::env::var(LOG_ENV).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn filter_from(directives: Option<String>) -> Option<EnvFilter> {
    directives
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
}
