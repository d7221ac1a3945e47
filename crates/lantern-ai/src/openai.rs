//! OpenAI-style chat completions, used by `gpt` and `selfhost`.

use async_trait::async_trait;
use lantern_local_ai::prompt::SYSTEM_PROMPT;
use lantern_local_ai::Prompt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EffectiveSettings;
use crate::error::AIError;
use crate::provider::Provider;
use crate::remote::{self, Backend};

/// Chat-completions adapter for one provider's endpoint.
pub struct OpenAiBackend {
    provider: Provider,
    client: reqwest::Client,
    base_url: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenAiBackend {
    pub fn new(provider: Provider, client: reqwest::Client, settings: &EffectiveSettings) -> Self {
        Self {
            provider,
            client,
            base_url: settings.base_url.clone(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
        }
    }
}

#[async_trait]
impl Backend for OpenAiBackend {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn explain(&self, prompt: &Prompt) -> Result<String, AIError> {
        let provider = self.provider;
        let key_field = provider.key_field().unwrap_or("api_key");
        let api_key = remote::require(provider, key_field, self.api_key.as_deref())?;
        let base_url = remote::require(provider, "selfhost_base_url", self.base_url.as_deref())?;
        let model = remote::require(provider, "selfhost_model", self.model.as_deref())?;

        let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        let request = ChatRequest {
            model,
            messages: [
                Message {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Message {
                    role: "user",
                    content: &prompt.text,
                },
            ],
            temperature: prompt.temperature,
            max_tokens: prompt.max_tokens,
        };

        debug!("Calling {} model {} at {}", provider, model, url);
        let body = remote::send(
            provider,
            self.client.post(&url).bearer_auth(api_key).json(&request),
        )
        .await?;

        let response: ChatResponse = remote::parse(provider, &body)?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|text| text.trim().to_string())
            .ok_or_else(|| AIError::MalformedResponse {
                provider,
                detail: "no choices[0].message.content in response".to_string(),
            })
    }
}
