//! Logging setup.
//!
//! A trimmed version of the teacher's tracing-based setup: console output
//! only (this tool has no persistent datastore to roll log files into, per
//! spec.md's Non-goals), but the same env-filter-plus-fmt-layer shape.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global tracing subscriber. Idempotent enough for tests
/// that call it more than once (`try_init` swallows the "already set"
/// error rather than panicking).
pub fn init_logging(level: &str, verbose: bool) {
    let effective_level = if verbose { "debug" } else { level };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("censorprobe={effective_level}")));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).with_thread_ids(false))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_does_not_panic_when_called_twice() {
        init_logging("info", false);
        init_logging("debug", true);
    }
}
