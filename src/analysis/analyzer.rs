//! Single-message analysis.

use std::sync::Arc;

use serde_json::Value;

use crate::analysis::synthesizer::ConversationSynthesizer;
use crate::analysis::types::{ConversationRecord, MailAnalysis};
use crate::llm::InferenceClient;
use crate::thread::ThreadEntry;

/// Summary, entities, action items, sentiment and risk points for a text,
/// plus thread-level synthesis.
#[derive(Clone)]
pub struct MailAnalyzer {
    inference: Arc<InferenceClient>,
    synthesizer: ConversationSynthesizer,
}

impl MailAnalyzer {
    pub fn new(inference: Arc<InferenceClient>, workers: usize) -> Self {
        Self {
            synthesizer: ConversationSynthesizer::new(inference.clone(), workers),
            inference,
        }
    }

    pub fn inference(&self) -> &Arc<InferenceClient> {
        &self.inference
    }

    /// Every part degrades on its own; one failed call never empties the
    /// others.
    pub async fn analyze_mail(&self, text: &str) -> MailAnalysis {
        let (summary, entities, action_items, sentiment) = tokio::join!(
            self.inference.generate_summary(text),
            self.inference.extract_entities(text),
            self.inference.extract_action_items(text),
            self.inference.detect_sentiment(text),
        );

        let summary = summary.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Summary failed");
            String::new()
        });
        let entities = entities.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Entity extraction failed");
            Value::Object(Default::default())
        });
        let action_items = action_items.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Action item extraction failed");
            Vec::new()
        });
        let sentiment = sentiment.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Sentiment detection failed");
            String::new()
        });

        let risk_points = self
            .inference
            .detect_risks(&summary, &entities, &action_items)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Risk detection failed");
                Vec::new()
            });

        MailAnalysis {
            summary,
            entities,
            action_items,
            sentiment,
            risk_points,
        }
    }

    pub async fn analyze_conversation(&self, thread: &[ThreadEntry]) -> ConversationRecord {
        self.synthesizer.synthesize(thread).await
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::*;
    use crate::error::LlmError;
    use crate::llm::{
        CompletionRequest, CompletionResponse, FinishReason, LlmProvider, RateLimiter, RetryPolicy,
    };

    /// Answers by prompt prefix; prefixes listed in `fail` error out.
    struct RoutedLlm {
        fail: Vec<&'static str>,
    }

    #[async_trait]
    impl LlmProvider for RoutedLlm {
        fn model_name(&self) -> &str {
            "routed"
        }

        fn cost_per_token(&self) -> (Decimal, Decimal) {
            (Decimal::ZERO, Decimal::ZERO)
        }

        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            let prompt = &request.messages[0].content;
            if self.fail.iter().any(|p| prompt.starts_with(p)) {
                return Err(LlmError::RequestFailed {
                    provider: "routed".into(),
                    reason: "scripted".into(),
                });
            }
            let content = if prompt.starts_with("请用中文") {
                "下周五前提交预算。"
            } else if prompt.starts_with("请从以下内容中提取") {
                r#"{"人物": ["张三"]}"#
            } else if prompt.starts_with("请识别") {
                r#"[{"负责人": "张三", "任务": "提交预算", "截止日期": "周五"}]"#
            } else if prompt.starts_with("请判断") {
                "中性"
            } else if prompt.starts_with("请根据") {
                r#"["截止时间紧张"]"#
            } else {
                ""
            };
            Ok(CompletionResponse {
                content: content.into(),
                input_tokens: 0,
                output_tokens: 0,
                finish_reason: FinishReason::Stop,
                response_id: None,
            })
        }
    }

    fn analyzer(fail: Vec<&'static str>) -> MailAnalyzer {
        let client = InferenceClient::new(
            Arc::new(RoutedLlm { fail }),
            Arc::new(RateLimiter::unlimited()),
            RetryPolicy::immediate(1),
            None,
        );
        MailAnalyzer::new(Arc::new(client), 2)
    }

    #[tokio::test]
    async fn full_analysis() {
        let analysis = analyzer(Vec::new()).analyze_mail("张三需要在周五前提交预算").await;
        assert_eq!(analysis.summary, "下周五前提交预算。");
        assert_eq!(analysis.entities, json!({"人物": ["张三"]}));
        assert_eq!(analysis.action_items[0]["负责人"], "张三");
        assert_eq!(analysis.sentiment, "中性");
        assert_eq!(analysis.risk_points, vec![json!("截止时间紧张")]);
    }

    #[tokio::test]
    async fn failures_degrade_independently() {
        let analysis = analyzer(vec!["请从以下内容中提取", "请根据"])
            .analyze_mail("text")
            .await;
        assert_eq!(analysis.summary, "下周五前提交预算。");
        assert_eq!(analysis.entities, json!({}));
        assert_eq!(analysis.action_items.len(), 1);
        assert!(analysis.risk_points.is_empty());
    }

    #[tokio::test]
    async fn everything_down_yields_defaults() {
        let analysis = analyzer(vec!["请"]).analyze_mail("text").await;
        assert_eq!(analysis, MailAnalysis::default());
    }
}
