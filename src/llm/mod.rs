//! Text-inference integration.
//!
//! Supports:
//! - **Azure OpenAI**: deployment endpoints with an `api-key` header
//! - **OpenAI**: the public chat completions API
//!
//! Every outbound call goes through [`InferenceClient`], which shares one
//! [`RateLimiter`] and one [`RetryPolicy`] across all callers.

pub mod inference;
pub mod openai;
pub mod provider;
pub mod rate_limit;
pub mod retry;
pub mod usage;

pub use inference::{InferenceClient, extract_json_array, extract_json_object};
pub use openai::OpenAiCompatProvider;
pub use provider::*;
pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;
pub use usage::UsageLog;

use std::sync::Arc;

use crate::config::LlmSettings;
use crate::error::LlmError;

/// Supported inference backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    AzureOpenAi,
    OpenAi,
}

impl LlmBackend {
    pub fn label(self) -> &'static str {
        match self {
            Self::AzureOpenAi => "azure",
            Self::OpenAi => "openai",
        }
    }
}

/// Create an inference provider from configuration.
pub fn create_provider(settings: &LlmSettings) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let provider = match settings.backend {
        LlmBackend::AzureOpenAi => {
            let endpoint =
                settings
                    .endpoint
                    .as_deref()
                    .ok_or_else(|| LlmError::RequestFailed {
                        provider: "azure".to_string(),
                        reason: "Azure backend requires an endpoint".to_string(),
                    })?;
            OpenAiCompatProvider::azure(
                endpoint,
                &settings.model,
                &settings.api_version,
                settings.api_key.clone(),
            )?
        }
        LlmBackend::OpenAi => OpenAiCompatProvider::openai(&settings.model, settings.api_key.clone())?,
    };
    tracing::info!(
        "Using {} (model: {})",
        settings.backend.label(),
        settings.model
    );
    Ok(Arc::new(provider))
}
