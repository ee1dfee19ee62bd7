//! Error types for model resolution, download, and inference.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during model operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Identifier is neither a catalog short name nor an `owner/repo` reference.
    #[error("model '{name}' not supported (known models: {known})")]
    UnsupportedModel { name: String, known: String },

    /// Listing the remote repository failed.
    #[error("could not list files for repo '{repo}': {source}")]
    Resolution {
        repo: String,
        #[source]
        source: hf_hub::api::sync::ApiError,
    },

    /// The repository exists but contains no usable artifact.
    #[error("no .gguf file found in repo '{repo}'")]
    NoArtifact { repo: String },

    /// Fetching the artifact from the hub failed.
    #[error("failed to download '{filename}' from '{repo}': {source}")]
    Download {
        repo: String,
        filename: String,
        #[source]
        source: hf_hub::api::sync::ApiError,
    },

    /// Hub client construction failed.
    #[error("hub client error: {0}")]
    Hub(#[from] hf_hub::api::sync::ApiError),

    /// Loading the model into the inference engine failed.
    #[error("failed to load model: {0}")]
    Load(String),

    /// The inference call itself failed.
    #[error("inference failed: {0}")]
    Inference(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
