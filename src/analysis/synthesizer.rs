//! Conversation synthesis over a reconstructed thread.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use futures::future::join_all;
use regex::Regex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::analysis::types::{ConversationRecord, ReplySuggestion, ReplyTone, TimelineItem};
use crate::llm::InferenceClient;
use crate::thread::{FieldValue, ThreadEntry};

/// `H:MM` not embedded in a longer digit run. `\b` is not used because CJK
/// characters count as word characters ("周二14:30").
static CLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\D)(\d{1,2})[:：](\d{2})(?:\D|$)").expect("valid regex")
});

static AFTERNOON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)下午|晚上|傍晚|(?:^|[^a-z])p\.?m(?:[^a-z]|$)").expect("valid regex")
});

/// Per-entry inference results.
#[derive(Debug, Clone, Default, PartialEq)]
struct EntryDigest {
    summary: String,
    sentiment: String,
}

/// Summarizes each entry on a bounded worker pool, then the whole thread.
#[derive(Clone)]
pub struct ConversationSynthesizer {
    inference: Arc<InferenceClient>,
    workers: usize,
}

impl ConversationSynthesizer {
    pub fn new(inference: Arc<InferenceClient>, workers: usize) -> Self {
        Self {
            inference,
            workers: workers.max(1),
        }
    }

    pub async fn synthesize(&self, thread: &[ThreadEntry]) -> ConversationRecord {
        let full_text = thread
            .iter()
            .map(|e| e.body.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let (digests, overall_summary) = tokio::join!(self.digest_entries(thread), async {
            self.inference
                .generate_summary(&full_text)
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "Overall summary failed");
                    String::new()
                })
        });

        let mut ordered: Vec<&ThreadEntry> = thread.iter().collect();
        ordered.sort_by_key(|e| e.index);

        let mut timeline = Vec::with_capacity(ordered.len());
        let mut dialogue = Vec::with_capacity(ordered.len());
        for entry in ordered {
            let digest = digests.get(&entry.index).cloned().unwrap_or_default();
            let sender = entry.from.display_name();
            dialogue.push(format!(
                "{sender}，在{}，邮件提到：{}",
                short_time(&entry.date),
                digest.summary
            ));
            timeline.push(TimelineItem {
                index: entry.index,
                date: entry.date.clone(),
                sender,
                subject: entry.subject.clone(),
                summary: digest.summary,
                sentiment: digest.sentiment,
            });
        }

        let reply_suggestions = self.suggest_replies(&overall_summary).await;

        ConversationRecord {
            timeline,
            dialogue,
            overall_summary,
            reply_suggestions,
        }
    }

    /// Summary + sentiment per entry, keyed by entry index. A failed or
    /// panicked worker leaves its entry out; siblings are unaffected.
    async fn digest_entries(&self, thread: &[ThreadEntry]) -> HashMap<usize, EntryDigest> {
        let permits = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();

        for entry in thread {
            let inference = self.inference.clone();
            let permits = permits.clone();
            let index = entry.index;
            let body = entry.body.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let (summary, sentiment) = tokio::join!(
                    inference.generate_summary(&body),
                    inference.detect_sentiment(&body)
                );
                let summary = summary.unwrap_or_else(|e| {
                    tracing::warn!(index, error = %e, "Entry summary failed");
                    String::new()
                });
                let sentiment = sentiment.unwrap_or_else(|e| {
                    tracing::warn!(index, error = %e, "Entry sentiment failed");
                    String::new()
                });
                (index, EntryDigest { summary, sentiment })
            });
        }

        let mut digests = HashMap::with_capacity(thread.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, digest)) => {
                    digests.insert(index, digest);
                }
                Err(e) => tracing::warn!(error = %e, "Entry worker did not complete"),
            }
        }
        digests
    }

    async fn suggest_replies(&self, summary: &str) -> Vec<ReplySuggestion> {
        join_all(ReplyTone::ALL.into_iter().map(|tone| async move {
            let text = self
                .inference
                .draft_reply(summary, tone.label())
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(tone = tone.label(), error = %e, "Reply suggestion failed");
                    String::new()
                });
            ReplySuggestion { tone, text }
        }))
        .await
    }
}

/// `HH:MM` from a parsed date, else from a clock pattern in the raw text.
/// A 下午/PM marker moves a 12-hour clock into the afternoon.
fn short_time(date: &FieldValue) -> String {
    match date {
        FieldValue::Date(ts) => ts.short_time(),
        FieldValue::Text(raw) => CLOCK
            .captures(raw)
            .and_then(|c| {
                let mut hour: u32 = c[1].parse().ok()?;
                let minute: u32 = c[2].parse().ok()?;
                if hour < 12 && AFTERNOON.is_match(raw) {
                    hour += 12;
                }
                (hour < 24 && minute < 60).then(|| format!("{hour:02}:{minute:02}"))
            })
            .unwrap_or_default(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use rand::Rng;
    use rust_decimal::Decimal;

    use super::*;
    use crate::error::LlmError;
    use crate::llm::{
        CompletionRequest, CompletionResponse, FinishReason, LlmProvider, RateLimiter, RetryPolicy,
    };
    use crate::mail::{Mailbox, parse_date};

    /// Echoes the last prompt line back after a random delay. Prompts whose
    /// content mentions `FAIL` error out.
    struct EchoLlm {
        max_latency_ms: u64,
    }

    #[async_trait]
    impl LlmProvider for EchoLlm {
        fn model_name(&self) -> &str {
            "echo"
        }

        fn cost_per_token(&self) -> (Decimal, Decimal) {
            (Decimal::ZERO, Decimal::ZERO)
        }

        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            let delay = rand::thread_rng().gen_range(0..=self.max_latency_ms);
            tokio::time::sleep(Duration::from_millis(delay)).await;

            let prompt = &request.messages[0].content;
            if prompt.contains("FAIL") {
                return Err(LlmError::RequestFailed {
                    provider: "echo".into(),
                    reason: "scripted failure".into(),
                });
            }
            let content = if prompt.starts_with("请判断") {
                "中性".to_string()
            } else if prompt.starts_with("请以") {
                prompt.chars().skip(2).take(2).collect()
            } else {
                format!("摘要:{}", prompt.lines().last().unwrap_or_default())
            };
            Ok(CompletionResponse {
                content,
                input_tokens: 1,
                output_tokens: 1,
                finish_reason: FinishReason::Stop,
                response_id: None,
            })
        }
    }

    fn synthesizer(max_latency_ms: u64, workers: usize) -> ConversationSynthesizer {
        let client = InferenceClient::new(
            Arc::new(EchoLlm { max_latency_ms }),
            Arc::new(RateLimiter::unlimited()),
            RetryPolicy::immediate(1),
            None,
        );
        ConversationSynthesizer::new(Arc::new(client), workers)
    }

    fn entry(index: usize, sender: &str, date: &str, body: &str) -> ThreadEntry {
        ThreadEntry {
            index,
            subject: FieldValue::Text("周会".into()),
            from: FieldValue::Mailboxes(vec![Mailbox::new(sender, "x@x.com")]),
            to: FieldValue::Unknown,
            cc: FieldValue::Unknown,
            date: parse_date(date)
                .map(FieldValue::Date)
                .unwrap_or_else(|| FieldValue::Text(date.into())),
            body: body.into(),
            attachments: Vec::new(),
        }
    }

    #[tokio::test]
    async fn dialogue_caption_format() {
        let thread = vec![entry(1, "张三", "2024-03-05 14:30", "预算已批准")];
        let record = synthesizer(0, 2).synthesize(&thread).await;
        assert_eq!(record.dialogue, vec!["张三，在14:30，邮件提到：摘要:预算已批准"]);
        assert_eq!(record.timeline[0].sentiment, "中性");
        assert_eq!(record.timeline[0].sender, "张三");
        assert_eq!(record.overall_summary, "摘要:预算已批准");
    }

    #[tokio::test]
    async fn ten_entries_stay_in_index_order() {
        // Entries handed over in scrambled order; output must follow index.
        let mut thread: Vec<ThreadEntry> = (1..=10)
            .map(|i| entry(i, &format!("S{i}"), "unparsable", &format!("body-{i}")))
            .collect();
        thread.reverse();
        thread.swap(2, 7);

        for _ in 0..5 {
            let record = synthesizer(15, 5).synthesize(&thread).await;
            assert_eq!(record.dialogue.len(), 10);
            for (i, line) in record.dialogue.iter().enumerate() {
                let n = i + 1;
                assert_eq!(line, &format!("S{n}，在，邮件提到：摘要:body-{n}"));
            }
            let indices: Vec<_> = record.timeline.iter().map(|t| t.index).collect();
            assert_eq!(indices, (1..=10).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn one_failing_entry_degrades_alone() {
        let thread = vec![
            entry(1, "A", "2024-01-01 09:00", "fine"),
            entry(2, "B", "2024-01-01 10:00", "FAIL here"),
            entry(3, "C", "2024-01-01 11:00", "also fine"),
        ];
        let record = synthesizer(5, 3).synthesize(&thread).await;
        assert_eq!(record.timeline[0].summary, "摘要:fine");
        assert_eq!(record.timeline[1].summary, "");
        assert_eq!(record.timeline[1].sentiment, "");
        assert_eq!(record.dialogue[1], "B，在10:00，邮件提到：");
        assert_eq!(record.timeline[2].summary, "摘要:also fine");
        // The joined text contains FAIL, so the overall summary degrades too.
        assert_eq!(record.overall_summary, "");
    }

    #[tokio::test]
    async fn three_reply_tones() {
        let thread = vec![entry(1, "A", "2024-01-01 09:00", "hello")];
        let record = synthesizer(0, 1).synthesize(&thread).await;
        let tones: Vec<_> = record.reply_suggestions.iter().map(|r| r.tone).collect();
        assert_eq!(tones, ReplyTone::ALL);
        assert_eq!(record.reply_suggestions[0].text, "正式");
        assert_eq!(record.reply_suggestions[2].text, "友好");
    }

    #[test]
    fn short_time_sources() {
        assert_eq!(short_time(&FieldValue::Text("2024年3月5日 下午 9:05".into())), "21:05");
        assert_eq!(
            short_time(&FieldValue::Text("2024年3月5日(星期二) 下午3:15".into())),
            "15:15"
        );
        assert_eq!(short_time(&FieldValue::Text("周二14:30".into())), "14:30");
        assert_eq!(short_time(&FieldValue::Text("上午9:05".into())), "09:05");
        assert_eq!(short_time(&FieldValue::Text("Tuesday 3:15 PM".into())), "15:15");
        assert_eq!(short_time(&FieldValue::Text("yesterday".into())), "");
        assert_eq!(short_time(&FieldValue::Text("ref 123:45".into())), "");
        assert_eq!(short_time(&FieldValue::Unknown), "");
        let parsed = parse_date("Tue, 2 Jan 2024 17:45:00 +0800").unwrap();
        assert_eq!(short_time(&FieldValue::Date(parsed)), "17:45");
    }
}
