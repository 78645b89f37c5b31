//! OpenAI-compatible chat completions over reqwest.
//!
//! Serves both Azure OpenAI deployments (`api-key` header, deployment in the
//! path) and the public OpenAI API (bearer token, model in the body).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::llm::LlmBackend;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Default sampling temperature when a request does not set one.
const DEFAULT_TEMPERATURE: f32 = 0.2;

/// Chat completions client for Azure OpenAI or OpenAI.
pub struct OpenAiCompatProvider {
    backend: LlmBackend,
    client: reqwest::Client,
    url: String,
    api_key: SecretString,
    model: String,
}

impl OpenAiCompatProvider {
    /// Azure deployment endpoint.
    pub fn azure(
        endpoint: &str,
        deployment: &str,
        api_version: &str,
        api_key: SecretString,
    ) -> Result<Self, LlmError> {
        let url = format!(
            "{}/openai/deployments/{deployment}/chat/completions?api-version={api_version}",
            endpoint.trim_end_matches('/')
        );
        Self::build(LlmBackend::AzureOpenAi, url, api_key, deployment)
    }

    /// Public OpenAI API.
    pub fn openai(model: &str, api_key: SecretString) -> Result<Self, LlmError> {
        Self::build(LlmBackend::OpenAi, OPENAI_URL.to_string(), api_key, model)
    }

    fn build(
        backend: LlmBackend,
        url: String,
        api_key: SecretString,
        model: &str,
    ) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: backend.label().to_string(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            backend,
            client,
            url,
            api_key,
            model: model.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn provider(&self) -> String {
        self.backend.label().to_string()
    }
}

#[derive(Serialize)]
struct ChatBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    id: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        // gpt-4o-mini list price per token.
        (dec!(0.00000015), dec!(0.0000006))
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = ChatBody {
            model: match self.backend {
                LlmBackend::OpenAi => Some(self.model.as_str()),
                LlmBackend::AzureOpenAi => None,
            },
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        };

        let builder = self.client.post(&self.url).json(&body);
        let builder = match self.backend {
            LlmBackend::AzureOpenAi => builder.header("api-key", self.api_key.expose_secret()),
            LlmBackend::OpenAi => builder.bearer_auth(self.api_key.expose_secret()),
        };

        let resp = builder.send().await.map_err(|e| LlmError::RequestFailed {
            provider: self.provider(),
            reason: e.to_string(),
        })?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            let text = resp.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %text, "Chat completion returned an error");
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::AuthFailed {
                    provider: self.provider(),
                },
                StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited {
                    provider: self.provider(),
                    retry_after,
                },
                _ => LlmError::RequestFailed {
                    provider: self.provider(),
                    reason: format!("HTTP {status}: {text}"),
                },
            });
        }

        let parsed: ChatResponse = resp.json().await.map_err(|e| LlmError::InvalidResponse {
            provider: self.provider(),
            reason: e.to_string(),
        })?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: self.provider(),
                reason: "response contained no choices".into(),
            })?;
        let usage = parsed.usage.unwrap_or(Usage {
            prompt_tokens: 0,
            completion_tokens: 0,
        });

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            finish_reason: FinishReason::from_api(choice.finish_reason.as_deref()),
            response_id: parsed.id,
        })
    }
}
