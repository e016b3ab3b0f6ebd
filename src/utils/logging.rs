//! Structured logging setup.
//!
//! Builds a `tracing-subscriber` registry from [`LoggingConfig`]:
//! - a console layer (plain or JSON) filtered by `RUST_LOG`, falling back to
//!   the configured level
//! - an optional append-only file layer, by default carrying only ERROR
//!   events, which serves as the server's error log

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let mut layers: Vec<BoxedLayer> = Vec::new();

    if config.log_to_console {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_lowercase()));
        let layer = if config.json_format {
            fmt::layer().json().with_filter(filter).boxed()
        } else {
            fmt::layer().with_target(true).with_filter(filter).boxed()
        };
        layers.push(layer);
    }

    if config.log_to_file {
        let path = config.log_file_path.as_deref().ok_or_else(|| {
            ProtocolError::ConfigError("log_file_path must be set when log_to_file is true".into())
        })?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let layer = fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .with_filter(LevelFilter::from_level(config.file_log_level))
            .boxed();
        layers.push(layer);
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| ProtocolError::ConfigError(format!("Failed to install logger: {e}")))?;

    info!(app = %config.app_name, level = %config.log_level, "Logging initialized");
    Ok(())
}
