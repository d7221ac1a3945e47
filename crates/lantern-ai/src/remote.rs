//! Shared plumbing for remote provider adapters.

use std::time::Duration;

use async_trait::async_trait;
use lantern_local_ai::Prompt;
use serde_json::Value;
use tracing::debug;

use crate::error::AIError;
use crate::provider::Provider;

/// Upper bound on a single remote call.
pub const REMOTE_TIMEOUT: Duration = Duration::from_secs(90);

/// Longest error body quoted back to the user.
const MAX_ERROR_CHARS: usize = 500;

/// A handler answering rendered prompts for one provider.
#[async_trait]
pub trait Backend: Send + Sync {
    fn provider(&self) -> Provider;

    async fn explain(&self, prompt: &Prompt) -> Result<String, AIError>;
}

/// Provider without an HTTP integration.
pub struct CopilotBackend;

#[async_trait]
impl Backend for CopilotBackend {
    fn provider(&self) -> Provider {
        Provider::Copilot
    }

    async fn explain(&self, _prompt: &Prompt) -> Result<String, AIError> {
        Err(AIError::NotConfigured(Provider::Copilot))
    }
}

/// The stored credential, or `MissingCredential` naming its field.
pub(crate) fn require<'a>(
    provider: Provider,
    field: &'static str,
    value: Option<&'a str>,
) -> Result<&'a str, AIError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(AIError::MissingCredential { provider, field })
}

/// Send `request` and return the body of a successful response.
///
/// Transport failures and error statuses both become `RemoteProvider`.
pub(crate) async fn send(
    provider: Provider,
    request: reqwest::RequestBuilder,
) -> Result<String, AIError> {
    let response = request
        .timeout(REMOTE_TIMEOUT)
        .send()
        .await
        .map_err(|e| AIError::RemoteProvider {
            provider,
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        })?;

    let status = response.status();
    let body = response.text().await.map_err(|e| AIError::RemoteProvider {
        provider,
        status: Some(status.as_u16()),
        message: format!("failed to read response body: {}", e),
    })?;
    debug!("{} responded {} ({} bytes)", provider, status, body.len());

    if !status.is_success() {
        return Err(AIError::RemoteProvider {
            provider,
            status: Some(status.as_u16()),
            message: error_message(&body),
        });
    }
    Ok(body)
}

/// Parse a success body into `T`, mapping any mismatch to `MalformedResponse`.
pub(crate) fn parse<T: serde::de::DeserializeOwned>(
    provider: Provider,
    body: &str,
) -> Result<T, AIError> {
    serde_json::from_str(body).map_err(|e| AIError::MalformedResponse {
        provider,
        detail: e.to_string(),
    })
}

/// Most specific message found in an error body.
///
/// Understands `{"error": {"message": ..}}`, `{"error": ".."}`,
/// `{"message": ..}` and `{"detail": ..}`; anything else is quoted as text.
pub(crate) fn error_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        let candidates = [
            json.pointer("/error/message"),
            json.get("error"),
            json.get("message"),
            json.get("detail"),
        ];
        if let Some(msg) = candidates
            .into_iter()
            .flatten()
            .find_map(|v| v.as_str().filter(|s| !s.trim().is_empty()))
        {
            return msg.trim().to_string();
        }
    }

    let text = body.trim();
    if text.is_empty() {
        return "empty response body".to_string();
    }
    match text.char_indices().nth(MAX_ERROR_CHARS) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
