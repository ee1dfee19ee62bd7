//! Server error types.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using the server error type.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Errors that can occur while constructing or starting a server.
///
/// Per-request failures (unknown model, inference errors) are reported as
/// HTTP responses and never surface here; shutdown never fails.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Invalid serving configuration, detected before any I/O.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Model resolution, download, or load failed during construction.
    #[error(transparent)]
    Model(#[from] mimic_models::Error),

    /// Failed to bind to the specified address.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to spawn the background worker.
    #[error("failed to spawn {what}: {source}")]
    Spawn {
        what: String,
        #[source]
        source: std::io::Error,
    },

    /// The worker exited before signaling readiness.
    #[error("server worker died before becoming ready: {0}")]
    WorkerDied(String),

    /// The worker did not become ready within the allowed time.
    #[error("server did not become ready within {waited:?}")]
    StartupTimeout { waited: Duration },
}
