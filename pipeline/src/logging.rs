//! Diagnostic tracing for the pipeline, separate from its product output.
//!
//! Tracing goes to stderr and is filtered by `RUST_LOG`. Gate reports
//! (`io/report_store`) and attempt logs (`io/attempt_log`) are written
//! regardless of the filter, and progress lines go to stdout.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Level used when `RUST_LOG` is unset or unparsable.
const DEFAULT_FILTER: &str = "warn";

/// Install the global subscriber. Call once, before parsing arguments.
///
/// ```bash
/// RUST_LOG=contract_pipeline=debug pipeline --contract tasks/S1-001.md
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .init();
}
