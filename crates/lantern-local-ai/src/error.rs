//! Error types for local AI operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during local AI operations.
#[derive(Debug, Error)]
pub enum LocalAIError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// llama-server answered with an error status.
    #[error("llama-server error: {0}")]
    Api(String),

    /// The requested model id is not in the registry.
    #[error("Unknown model '{0}'. Run `lantern model list` to see available models")]
    UnknownModel(String),

    /// The weights for a registered model are not on disk.
    #[error("Model '{id}' not found at {}. Download it with: lantern model pull {id}", .path.display())]
    ModelFileMissing { id: String, path: PathBuf },

    /// Model download failed.
    #[error("Failed to download model: {0}")]
    DownloadFailed(String),

    /// Checksum verification failed.
    #[error("Model checksum mismatch. Expected: {expected}, got: {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// llama-server binary not found.
    #[error("llama-server binary not found (looked in {0} and on PATH)")]
    ServerBinaryNotFound(String),

    /// Server failed to start.
    #[error("Failed to start llama-server: {0}")]
    ServerStartFailed(String),

    /// Server process exited before it became ready.
    #[error("llama-server exited during startup: {0}")]
    ServerDied(String),

    /// Timeout waiting for server to start.
    #[error("Timeout waiting for llama-server to become ready")]
    ServerStartTimeout,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
