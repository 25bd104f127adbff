//! Structured logging for the simulation.
//!
//! Every requester reply, the balancer's lifecycle and the final load report
//! are emitted as `tracing` events and rendered by one global subscriber:
//!
//! - Verbosity comes from `RUST_LOG`, falling back to `info`. Use `debug` to
//!   see each reply and worker start/stop, and `trace` to see the load vector
//!   after every dispatch and completion.
//! - Output is the multi-line pretty format. Each event names the Tokio worker
//!   thread it ran on, which shows how the pool spreads over the runtime.
//! - Each event carries its source file and line, and a local RFC 3339
//!   timestamp for lining up a requester's submit with its reply.
//!
//! The library's own events flow through the same subscriber because this
//! binary enables its `tracing` feature.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global subscriber.
///
/// # Errors
///
/// Fails if a global subscriber was already set.
pub fn init_telemetry() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .pretty(),
        )
        .try_init()?;
    Ok(())
}
