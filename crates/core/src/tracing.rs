//! Logging setup for binaries and tests.
//!
//! Library code only emits `tracing` events; installing a subscriber is left
//! to whoever owns the process.

use ::tracing::level_filters::LevelFilter;

/// Install the global subscriber once. Later calls are no-ops.
///
/// `RUST_LOG` directives take precedence over `level`; without either the
/// filter is DEBUG in debug builds and INFO in release builds.
pub fn set_logger(level: Option<LevelFilter>) {
    #[cfg(feature = "trace")]
    {
        use std::sync::atomic::{AtomicBool, Ordering};

        static LOGGER_SET: AtomicBool = AtomicBool::new(false);
        if LOGGER_SET
            .compare_exchange(false, true, Ordering::Release, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        if let Err(err) = tracer::init_tracer(level) {
            eprintln!("failed to initialize logging: {err}");
        }
    }
    #[cfg(not(feature = "trace"))]
    {
        let _ = level;
    }
}

#[cfg(feature = "trace")]
pub(crate) mod tracer {
    use ::tracing::level_filters::LevelFilter;
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError};

    pub fn init_tracer(level: Option<LevelFilter>) -> Result<(), TryInitError> {
        let default_filter = if cfg!(any(test, debug_assertions)) {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        };
        let filter_layer = tracing_subscriber::EnvFilter::builder()
            .with_default_directive(level.unwrap_or(default_filter).into())
            .from_env_lossy();

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_level(true)
            .with_target(false)
            .with_file(cfg!(any(test, debug_assertions)))
            .with_line_number(cfg!(any(test, debug_assertions)))
            .with_writer(std::io::stderr);

        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .try_init()
    }
}
