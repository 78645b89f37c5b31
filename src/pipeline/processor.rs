//! Mail processor: one `.eml` file in, one [`MailReport`] out.
//!
//! Flow:
//! 1. Decode the file (malformed files are skipped by the batch driver)
//! 2. Extract and summarize attachments
//! 3. Analyze the body
//! 4. Optionally reconstruct the quoted thread and synthesize the conversation

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::analysis::MailAnalyzer;
use crate::config::AnalyzerConfig;
use crate::error::{AttachmentError, LlmError, PipelineError};
use crate::llm::{InferenceClient, RateLimiter, RetryPolicy, UsageLog, create_provider};
use crate::mail::attachments::extension;
use crate::mail::{
    Attachment, AttachmentExtractor, AttachmentKind, BuiltinExtractor, RawMessage, decode_file,
    scan_dir,
};
use crate::report::{AttachmentReport, MailBody, MailMetadata, MailReport};
use crate::thread::{InferenceFallback, QuoteSplitter, ThreadReconstructor};

/// Base delay of the inference retry backoff.
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Turns message files into reports.
pub struct MailProcessor {
    analyzer: MailAnalyzer,
    reconstructor: ThreadReconstructor,
    extractor: Arc<dyn AttachmentExtractor>,
    temp_dir: PathBuf,
}

impl MailProcessor {
    pub fn new(
        analyzer: MailAnalyzer,
        reconstructor: ThreadReconstructor,
        extractor: Arc<dyn AttachmentExtractor>,
        temp_dir: PathBuf,
    ) -> Self {
        Self {
            analyzer,
            reconstructor,
            extractor,
            temp_dir,
        }
    }

    /// Processor with the built-in extractors, sharing one inference client
    /// between analysis and the thread fallback.
    pub fn with_inference(inference: Arc<InferenceClient>, workers: usize, temp_dir: PathBuf) -> Self {
        Self::new(
            MailAnalyzer::new(inference.clone(), workers),
            ThreadReconstructor::new(
                QuoteSplitter::default(),
                Some(InferenceFallback::new(inference)),
            ),
            Arc::new(BuiltinExtractor),
            temp_dir,
        )
    }

    /// Wire provider, rate limiter, retry policy and usage log from config.
    pub fn from_config(config: &AnalyzerConfig) -> Result<Self, LlmError> {
        let provider = create_provider(&config.llm)?;
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.min_interval()));
        let policy = RetryPolicy::new(config.rate_limit.max_retries, RETRY_BASE_DELAY);
        let usage = config.rate_limit.usage_log.clone().map(UsageLog::new);
        let inference = Arc::new(InferenceClient::new(provider, limiter, policy, usage));
        Ok(Self::with_inference(
            inference,
            config.workers,
            config.temp_dir.clone(),
        ))
    }

    /// Decode and process one file.
    pub async fn process_file(
        &self,
        path: &Path,
        thread_aware: bool,
    ) -> Result<MailReport, PipelineError> {
        info!(path = %path.display(), thread_aware, "Processing mail");
        let message = decode_file(path).await?;
        Ok(self.process_message(&message, thread_aware).await)
    }

    /// Process an already-decoded message. Inference and extraction failures
    /// degrade individual fields and never fail the report.
    pub async fn process_message(&self, message: &RawMessage, thread_aware: bool) -> MailReport {
        let attachments = self.process_attachments(message).await;
        let analysis = self.analyzer.analyze_mail(&message.body).await;

        let conversation = if thread_aware {
            let thread = self.reconstructor.reconstruct(message).await;
            Some(self.analyzer.analyze_conversation(&thread).await)
        } else {
            None
        };

        MailReport {
            mail_path: message.path.clone(),
            metadata: MailMetadata::from(message),
            body: MailBody {
                raw_text: message.body.clone(),
                summary: analysis.summary.clone(),
            },
            attachments,
            analysis,
            conversation,
        }
    }

    /// Process every `.eml` under `dir` in path order. Files that cannot be
    /// decoded are logged and skipped.
    pub async fn process_dir(
        &self,
        dir: &Path,
        thread_aware: bool,
    ) -> Result<Vec<MailReport>, PipelineError> {
        let files = scan_dir(dir)?;
        let total = files.len();
        info!(dir = %dir.display(), total, "Processing mail directory");

        let mut reports = Vec::with_capacity(total);
        for path in files {
            match self.process_file(&path, thread_aware).await {
                Ok(report) => reports.push(report),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping mail"),
            }
        }

        info!(processed = reports.len(), total, "Mail directory complete");
        Ok(reports)
    }

    async fn process_attachments(&self, message: &RawMessage) -> Vec<AttachmentReport> {
        let mut reports = Vec::new();
        for attachment in &message.attachments {
            if attachment.filename.trim().is_empty() || attachment.payload.is_empty() {
                debug!(
                    path = %message.path.display(),
                    filename = %attachment.filename,
                    "Skipping attachment without name or payload"
                );
                continue;
            }

            let content = match self.extract_attachment(message, attachment).await {
                Ok(text) => text.trim().to_string(),
                Err(e) => {
                    warn!(
                        path = %message.path.display(),
                        filename = %attachment.filename,
                        error = %e,
                        "Attachment extraction failed"
                    );
                    String::new()
                }
            };

            let summary = if content.is_empty() {
                String::new()
            } else {
                self.analyzer
                    .inference()
                    .generate_summary(&content)
                    .await
                    .unwrap_or_else(|e| {
                        warn!(filename = %attachment.filename, error = %e, "Attachment summary failed");
                        String::new()
                    })
            };

            reports.push(AttachmentReport {
                filename: attachment.filename.clone(),
                kind: extension(&attachment.filename),
                content,
                summary,
            });
        }
        reports
    }

    /// Write the payload under the temp dir and run the blocking extractor.
    async fn extract_attachment(
        &self,
        message: &RawMessage,
        attachment: &Attachment,
    ) -> Result<String, AttachmentError> {
        let stem = message
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "message".to_string());
        // Only the final component of the declared name is used.
        let name = Path::new(&attachment.filename)
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());

        let dir = self.temp_dir.join(stem);
        tokio::fs::create_dir_all(&dir).await?;
        let file = dir.join(name);
        tokio::fs::write(&file, &attachment.payload).await?;

        let kind = AttachmentKind::from_filename(&attachment.filename);
        let extractor = self.extractor.clone();
        tokio::task::spawn_blocking(move || extractor.extract(&file, kind))
            .await
            .map_err(|e| AttachmentError::Join(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use rust_decimal::Decimal;

    use super::*;
    use crate::llm::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
    use crate::mail::Mailbox;

    /// Records prompts and answers every call with a fixed reply.
    struct RecordingLlm {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LlmProvider for RecordingLlm {
        fn model_name(&self) -> &str {
            "recording"
        }

        fn cost_per_token(&self) -> (Decimal, Decimal) {
            (Decimal::ZERO, Decimal::ZERO)
        }

        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            self.prompts
                .lock()
                .unwrap()
                .push(request.messages[0].content.clone());
            Ok(CompletionResponse {
                content: "ok".into(),
                input_tokens: 0,
                output_tokens: 0,
                finish_reason: FinishReason::Stop,
                response_id: None,
            })
        }
    }

    /// Extractor that fails for names containing "broken".
    struct StubExtractor;

    impl AttachmentExtractor for StubExtractor {
        fn extract(&self, path: &Path, _kind: AttachmentKind) -> Result<String, AttachmentError> {
            if path.to_string_lossy().contains("broken") {
                Err(AttachmentError::Pdf("bad xref".into()))
            } else {
                Ok(std::fs::read_to_string(path)?)
            }
        }
    }

    fn processor(temp_dir: PathBuf) -> (MailProcessor, Arc<RecordingLlm>) {
        let llm = Arc::new(RecordingLlm {
            prompts: Mutex::new(Vec::new()),
        });
        let inference = Arc::new(InferenceClient::new(
            llm.clone(),
            Arc::new(RateLimiter::unlimited()),
            RetryPolicy::immediate(1),
            None,
        ));
        let processor = MailProcessor::new(
            MailAnalyzer::new(inference, 2),
            ThreadReconstructor::patterns_only(),
            Arc::new(StubExtractor),
            temp_dir,
        );
        (processor, llm)
    }

    fn attachment(filename: &str, payload: &[u8]) -> Attachment {
        Attachment {
            filename: filename.into(),
            content_type: "application/octet-stream".into(),
            payload: payload.to_vec(),
        }
    }

    #[tokio::test]
    async fn attachments_are_extracted_and_summarized() {
        let dir = tempfile::tempdir().unwrap();
        let (processor, llm) = processor(dir.path().to_path_buf());
        let message = RawMessage {
            path: PathBuf::from("inbox/weekly.eml"),
            from: vec![Mailbox::new("Alice", "a@x.com")],
            body: "see attached".into(),
            attachments: vec![
                attachment("notes.txt", "预算表".as_bytes()),
                attachment("broken.pdf", b"%PDF"),
                attachment("", b"orphan"),
                attachment("empty.docx", b""),
            ],
            ..RawMessage::default()
        };

        let report = processor.process_message(&message, false).await;

        assert_eq!(report.attachments.len(), 2);
        assert_eq!(report.attachments[0].kind, "txt");
        assert_eq!(report.attachments[0].content, "预算表");
        assert_eq!(report.attachments[0].summary, "ok");
        assert_eq!(report.attachments[1].filename, "broken.pdf");
        assert!(report.attachments[1].content.is_empty());
        assert!(report.attachments[1].summary.is_empty());
        assert!(dir.path().join("weekly/notes.txt").exists());
        assert!(report.conversation.is_none());
        assert_eq!(report.body.summary, "ok");

        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts.iter().any(|p| p.ends_with("预算表")));
    }

    #[tokio::test]
    async fn attachment_name_cannot_escape_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        let (processor, _llm) = processor(dir.path().join("tmp"));
        let message = RawMessage {
            path: PathBuf::from("m.eml"),
            attachments: vec![attachment("../../evil.txt", b"x")],
            ..RawMessage::default()
        };
        processor.process_message(&message, false).await;
        assert!(dir.path().join("tmp/m/evil.txt").exists());
        assert!(!dir.path().join("evil.txt").exists());
    }

    #[tokio::test]
    async fn thread_aware_adds_conversation() {
        let dir = tempfile::tempdir().unwrap();
        let (processor, _llm) = processor(dir.path().to_path_buf());
        let message = RawMessage {
            path: PathBuf::from("t.eml"),
            body: "reply\nFrom: Bob <b@x.com>\nDate: 2024-01-01 10:00\nSubject: s\nold".into(),
            ..RawMessage::default()
        };
        let report = processor.process_message(&message, true).await;
        let conversation = report.conversation.unwrap();
        assert_eq!(conversation.timeline.len(), 1);
        assert_eq!(conversation.dialogue, vec!["Bob，在10:00，邮件提到：ok"]);
        assert_eq!(conversation.reply_suggestions.len(), 3);
    }

    #[tokio::test]
    async fn process_dir_skips_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("good.eml"),
            "From: a@x.com\r\nSubject: Hi\r\n\r\nHello\r\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("empty.eml"), "").unwrap();

        let (processor, _llm) = processor(dir.path().join("tmp"));
        let reports = processor.process_dir(dir.path(), false).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].metadata.subject, "Hi");
    }

    #[tokio::test]
    async fn missing_dir_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let (processor, _llm) = processor(dir.path().to_path_buf());
        let err = processor
            .process_dir(&dir.path().join("nope"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Mail(_)));
    }
}
