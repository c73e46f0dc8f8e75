//! Diagnostic logging setup.
//!
//! Tracing output is for operators debugging warden itself and goes to
//! stderr. The artifacts of record are the files under
//! `.warden/sessions/`, which are written unconditionally and never
//! depend on the log filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the global subscriber.
///
/// Honors `RUST_LOG`; defaults to `warn` so governed runs stay quiet
/// unless asked.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
