//! Host startup errors.

use thiserror::Error;

/// Errors that stop the host before it starts serving.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Failed to connect to database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to register contract: {0}")]
    Scheme(#[from] bus::SchemeError),

    #[error("Saga component failed to boot: {0}")]
    Boot(#[from] saga::BootError),

    #[error("Failed to install Prometheus recorder: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StartupError>;
