//! Configuration, error and logging foundation for chunkscribe

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{
    BlobBackend, BlobConfig, ChunkingConfig, Config, DispatchConfig, HandoffConfig,
    LoggingConfig, ProviderBackend, ProviderConfig, ServerConfig, StorageConfig,
};
pub use error::{Error, Result};

/// Initialize the logging system
///
/// `RUST_LOG` takes precedence over the configured level.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging(logging: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if logging.format.eq_ignore_ascii_case("json") {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()
    };

    installed.map_err(|e| Error::Logging(e.to_string()))?;
    tracing::debug!(
        "Logging initialized (level {}, format {})",
        logging.level,
        logging.format
    );
    Ok(())
}
