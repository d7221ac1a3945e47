//! Error types for the AI core.

use std::path::PathBuf;

use lantern_local_ai::LocalAIError;
use thiserror::Error;

use crate::provider::Provider;

/// Errors reading or writing a settings file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not a valid settings file: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("selfhost base URL must not be empty")]
    EmptyBaseUrl,
}

/// Errors surfaced to callers of the provider router.
#[derive(Debug, Error)]
pub enum AIError {
    #[error(transparent)]
    Local(#[from] LocalAIError),

    #[error("{provider} provider selected but no {field} is configured. Set it with: lantern provider set {provider} <KEY>")]
    MissingCredential {
        provider: Provider,
        field: &'static str,
    },

    #[error("{provider} request failed{}: {message}", http_status(.status))]
    RemoteProvider {
        provider: Provider,
        status: Option<u16>,
        message: String,
    },

    #[error("unexpected {provider} response format: {detail}")]
    MalformedResponse { provider: Provider, detail: String },

    #[error("{0} provider is selected, but no HTTP integration is configured for it")]
    NotConfigured(Provider),

    #[error("unsupported AI provider '{0}' (expected one of: local, selfhost, gpt, gemini, copilot)")]
    UnsupportedProvider(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("background task failed: {0}")]
    Worker(String),

    #[error("an AI request for {0} is already running")]
    Busy(String),
}

fn http_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_mentions_status() {
        let err = AIError::RemoteProvider {
            provider: Provider::Gpt,
            status: Some(401),
            message: "Incorrect API key provided".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "gpt request failed (HTTP 401): Incorrect API key provided"
        );

        let err = AIError::RemoteProvider {
            provider: Provider::Gemini,
            status: None,
            message: "connection refused".to_string(),
        };
        assert_eq!(err.to_string(), "gemini request failed: connection refused");
    }
}
