//! Tracing subscriber setup for the command-line binary.

use tracing_subscriber::{fmt, EnvFilter};

/// Default filter directive for a run.
///
/// `RUST_LOG` wins when set and not verbose; otherwise warnings only, or
/// debug output from this crate with `--verbose`.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "warn,pcard_cluster=debug"
    } else {
        "warn"
    }
}

/// Install a stderr fmt subscriber so stdout stays free for the run summary.
pub fn configure_logging(verbose: bool) -> anyhow::Result<()> {
    let filter = if verbose {
        EnvFilter::new(default_directive(true))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(false)))
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}"))
}
