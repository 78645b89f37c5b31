//! High-level inference calls used by the analysis and thread stages.
//!
//! Every call is paced by the shared [`RateLimiter`] and wrapped in the
//! [`RetryPolicy`]; usage is appended to the optional [`UsageLog`].

use std::sync::Arc;

use serde_json::{Value, json};

use crate::error::LlmError;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::llm::rate_limit::RateLimiter;
use crate::llm::retry::RetryPolicy;
use crate::llm::usage::{UsageLog, UsageRecord};

const TEMPERATURE: f32 = 0.2;

const SUMMARY_TOKENS: u32 = 300;
const ENTITY_TOKENS: u32 = 400;
const ACTION_ITEM_TOKENS: u32 = 400;
const SENTIMENT_TOKENS: u32 = 50;
const STRUCTURED_TOKENS: u32 = 300;
const RISK_TOKENS: u32 = 200;
const REPLY_TOKENS: u32 = 400;

/// Rate-limited, retrying front end to an [`LlmProvider`].
pub struct InferenceClient {
    provider: Arc<dyn LlmProvider>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    usage: Option<UsageLog>,
}

impl InferenceClient {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
        usage: Option<UsageLog>,
    ) -> Self {
        Self {
            provider,
            limiter,
            policy,
            usage,
        }
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Send one user prompt and return the trimmed completion text.
    pub async fn complete_prompt(&self, prompt: &str, max_tokens: u32) -> Result<String, LlmError> {
        let request = CompletionRequest::new(vec![ChatMessage::user(prompt)])
            .with_max_tokens(max_tokens)
            .with_temperature(TEMPERATURE);

        let response = self
            .policy
            .run(|| {
                let request = request.clone();
                async move {
                    self.limiter.acquire().await;
                    self.provider.complete(request).await
                }
            })
            .await?;

        tracing::debug!(
            model = self.provider.model_name(),
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            finish_reason = ?response.finish_reason,
            "Inference call completed"
        );

        if let Some(log) = &self.usage {
            let record = UsageRecord::new(
                self.provider.model_name(),
                response.input_tokens,
                response.output_tokens,
                self.provider.cost_per_token(),
            );
            if let Err(e) = log.append(&record).await {
                tracing::warn!(path = %log.path().display(), error = %e, "Failed to write usage record");
            }
        }

        Ok(response.content.trim().to_string())
    }

    pub async fn generate_summary(&self, text: &str) -> Result<String, LlmError> {
        let prompt = format!("请用中文对以下内容生成简明摘要：\n{text}");
        self.complete_prompt(&prompt, SUMMARY_TOKENS).await
    }

    /// People, organisations, dates, events and places as a JSON object.
    /// A reply that is not a JSON object comes back as `{"raw": reply}`.
    pub async fn extract_entities(&self, text: &str) -> Result<Value, LlmError> {
        let prompt = format!("请从以下内容中提取人物、组织、日期、事件、地点等实体，返回JSON：\n{text}");
        let content = self.complete_prompt(&prompt, ENTITY_TOKENS).await?;
        Ok(extract_json_object(&content)
            .and_then(|s| serde_json::from_str::<Value>(s).ok())
            .filter(Value::is_object)
            .unwrap_or_else(|| json!({ "raw": content })))
    }

    /// Action items (owner, task, deadline, priority) as a JSON array.
    /// A reply that is not a JSON array comes back as `[{"raw": reply}]`.
    pub async fn extract_action_items(&self, text: &str) -> Result<Vec<Value>, LlmError> {
        let prompt = format!(
            "请识别以下内容中的行动项，列出负责人、任务、截止日期、优先级，返回JSON数组：\n{text}"
        );
        let content = self.complete_prompt(&prompt, ACTION_ITEM_TOKENS).await?;
        Ok(parse_array(&content).unwrap_or_else(|| vec![json!({ "raw": content })]))
    }

    pub async fn detect_sentiment(&self, text: &str) -> Result<String, LlmError> {
        let prompt = format!("请判断以下内容的情绪（积极、消极、中性）：\n{text}");
        self.complete_prompt(&prompt, SENTIMENT_TOKENS).await
    }

    /// Raw completion for a caller-built structured-extraction prompt.
    pub async fn infer_structured_fields(&self, prompt: &str) -> Result<String, LlmError> {
        self.complete_prompt(prompt, STRUCTURED_TOKENS).await
    }

    /// Risk points derived from an earlier analysis pass. Malformed replies
    /// yield an empty list.
    pub async fn detect_risks(
        &self,
        summary: &str,
        entities: &Value,
        action_items: &[Value],
    ) -> Result<Vec<Value>, LlmError> {
        let prompt = format!(
            "请根据以下内容识别潜在风险点，返回JSON数组：\n摘要：{summary}\n实体：{entities}\n行动项：{}",
            Value::Array(action_items.to_vec())
        );
        let content = self.complete_prompt(&prompt, RISK_TOKENS).await?;
        Ok(parse_array(&content).unwrap_or_default())
    }

    /// Draft a reply to a thread in the given tone (e.g. "正式").
    pub async fn draft_reply(&self, summary: &str, tone: &str) -> Result<String, LlmError> {
        let prompt =
            format!("请以{tone}的语气，根据以下邮件往来摘要，用中文起草一封简短的回复邮件：\n{summary}");
        self.complete_prompt(&prompt, REPLY_TOKENS).await
    }
}

fn parse_array(content: &str) -> Option<Vec<Value>> {
    match serde_json::from_str::<Value>(extract_json_array(content)?) {
        Ok(Value::Array(items)) => Some(items),
        _ => None,
    }
}

// ── Response parsing ────────────────────────────────────────────────

/// Extract the first balanced JSON object from model output, tolerating
/// markdown fences and surrounding prose.
pub fn extract_json_object(text: &str) -> Option<&str> {
    balanced_span(text, '{', '}')
}

/// Extract the first balanced JSON array from model output.
pub fn extract_json_array(text: &str) -> Option<&str> {
    balanced_span(text, '[', ']')
}

/// Slice from the first `open` to its matching `close`, skipping brackets
/// inside string literals.
fn balanced_span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}
