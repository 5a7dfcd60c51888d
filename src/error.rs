//! Error handler for pizza-metrics.
//!
//! Only startup can fail. Telemetry failures never leave the exporter.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::Error),

    #[error("cannot build collector client: {0}")]
    Client(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
