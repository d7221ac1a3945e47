//! Google Gemini `generateContent` adapter.

use async_trait::async_trait;
use lantern_local_ai::Prompt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{EffectiveSettings, GEMINI_BASE_URL, GEMINI_DEFAULT_MODEL};
use crate::error::AIError;
use crate::provider::Provider;
use crate::remote::{self, Backend};

pub struct GeminiBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GeminiBackend {
    pub fn new(client: reqwest::Client, settings: &EffectiveSettings) -> Self {
        Self {
            client,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
            api_key: settings.api_key.clone(),
            model: settings
                .model
                .clone()
                .unwrap_or_else(|| GEMINI_DEFAULT_MODEL.to_string()),
        }
    }
}

#[async_trait]
impl Backend for GeminiBackend {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    async fn explain(&self, prompt: &Prompt) -> Result<String, AIError> {
        let provider = Provider::Gemini;
        let api_key = remote::require(provider, "gemini_api_key", self.api_key.as_deref())?;

        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let request = GenerateRequest {
            contents: [Content {
                parts: [Part { text: &prompt.text }],
            }],
            generation_config: GenerationConfig {
                temperature: prompt.temperature,
                max_output_tokens: prompt.max_tokens,
            },
        };

        debug!("Calling gemini model {}", self.model);
        let body = remote::send(
            provider,
            self.client
                .post(&url)
                .query(&[("key", api_key)])
                .json(&request),
        )
        .await?;

        let response: GenerateResponse = remote::parse(provider, &body)?;
        response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .and_then(|p| p.text)
            .map(|text| text.trim().to_string())
            .ok_or_else(|| AIError::MalformedResponse {
                provider,
                detail: "no candidates[0].content.parts[0].text in response".to_string(),
            })
    }
}
