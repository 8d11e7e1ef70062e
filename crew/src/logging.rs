//! Diagnostics for debugging agents and stores.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: dev diagnostics via `RUST_LOG`, output to stderr.
//!   Not persisted, not part of the team's shared state.
//!
//! - **Event log (`io/events`) and mailboxes (`io/mailbox`)**: durable records
//!   under `.crew/`. Always written, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; defaults to `warn` if unset. Output: stderr, compact
/// format. Agent threads share the subscriber, so each agent's spans carry its
/// name.
///
/// # Example
/// ```bash
/// RUST_LOG=crew=debug crew agent run --name alice --role coder
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_thread_names(true)
                .compact(),
        )
        .init();
}
