//! Logging initialization and configuration.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when neither configuration nor `RUST_LOG` say otherwise.
pub const DEFAULT_FILTER: &str = "sandbox_tunnel=info";

fn filter_for(directive: &str) -> EnvFilter {
    // A bare level ("debug") is scoped to this crate so dependencies stay quiet.
    let directive = match directive {
        "error" | "warn" | "info" | "debug" | "trace" => format!("sandbox_tunnel={}", directive),
        other => other.to_string(),
    };
    EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize the logging system.
///
/// Uses the `RUST_LOG` environment variable for filtering. If not set,
/// defaults to `sandbox_tunnel=info`.
///
/// # Panics
///
/// Panics if called more than once, or if another tracing subscriber
/// has already been set.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .init();
}

/// Initialize the logging system with an explicit filter directive.
///
/// Accepts either a bare level (`debug`) or a full `EnvFilter` directive
/// (`sandbox_tunnel=debug,tower_http=info`). Invalid directives fall back to
/// the default filter.
pub fn init_with_filter(directive: &str) {
    tracing_subscriber::registry()
        .with(filter_for(directive))
        .with(tracing_subscriber::fmt::layer().compact())
        .init();
}

/// Try to initialize the logging system.
///
/// Returns `Ok(())` if successful, or `Err` if logging has already been
/// initialized.
pub fn try_init() -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .try_init()
}
