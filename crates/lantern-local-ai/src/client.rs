//! HTTP client for llama-server's native completion API.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LocalAIError;

/// Upper bound on one completion call against the local server.
pub const COMPLETION_TIMEOUT: Duration = Duration::from_secs(600);

/// Stop sequences shared by the supported chat templates.
pub const STOP_SEQUENCES: [&str; 3] = ["</s>", "<|end|>", "<|endoftext|>"];

/// Sampling settings for one completion.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub repeat_penalty: f32,
}

impl CompletionParams {
    pub fn new(max_tokens: u32, temperature: f32) -> Self {
        Self {
            max_tokens,
            temperature,
            top_k: 40,
            top_p: 0.9,
            repeat_penalty: 1.1,
        }
    }
}

/// Client for communicating with llama-server.
pub struct LlamaCppClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    n_predict: u32,
    temperature: f32,
    top_k: u32,
    top_p: f32,
    repeat_penalty: f32,
    stop: &'a [&'a str],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    content: String,
}

impl LlamaCppClient {
    /// Create a new client with a custom URL.
    pub fn with_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Create a new client with a custom port on localhost.
    pub fn with_port(port: u16) -> Self {
        Self::with_url(format!("http://127.0.0.1:{}", port))
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check if the server is running and has finished loading its model.
    pub async fn check_health(&self) -> Result<(), LocalAIError> {
        let url = format!("{}/health", self.base_url);

        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(LocalAIError::Api(format!("health check: {}", response.status())))
        }
    }

    /// Run a raw-prompt completion and return the trimmed generated text.
    pub async fn complete(
        &self,
        prompt: &str,
        params: &CompletionParams,
    ) -> Result<String, LocalAIError> {
        let request = CompletionRequest {
            prompt,
            n_predict: params.max_tokens,
            temperature: params.temperature,
            top_k: params.top_k,
            top_p: params.top_p,
            repeat_penalty: params.repeat_penalty,
            stop: &STOP_SEQUENCES,
            stream: false,
        };

        let url = format!("{}/completion", self.base_url);

        let response = self
            .client
            .post(&url)
            .timeout(COMPLETION_TIMEOUT)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LocalAIError::Api(format!("{}: {}", status, text)));
        }

        let completion: CompletionResponse = response.json().await?;
        Ok(completion.content.trim().to_string())
    }
}
