pub mod bcma; // Barcode-verified administration protocol
pub mod board; // Urgency-ranked medication board
pub mod config;
pub mod db;
pub mod models;
pub mod schedule; // Next-due and dose status classification

use tracing_subscriber::EnvFilter;

pub use bcma::{BcmaError, SessionRegistry, VerificationSession};
pub use schedule::{ScheduleCalculator, ScheduleError};

/// Install the global tracing subscriber. `RUST_LOG` wins over the default filter.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    init_tracing_with(config::default_log_filter());
}

/// Same as `init_tracing`, with the fallback filter taken from config.
pub fn init_tracing_with(fallback_filter: &str) {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback_filter)),
        )
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);
    }
}
