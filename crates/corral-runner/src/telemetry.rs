//! Console logging for the runner.
//!
//! Events from the runner and from the pool (built with its `tracing`
//! feature) go through a single `tracing_subscriber` registry. Verbosity is
//! controlled with `RUST_LOG` and defaults to `info`; use
//! `RUST_LOG=corral=trace` to follow individual workers.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_telemetry() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(true)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339()),
        )
        .try_init()?;

    Ok(())
}
