//! Persisted analysis report.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::analysis::{ConversationRecord, MailAnalysis};
use crate::error::PipelineError;
use crate::mail::{Mailbox, RawMessage, Timestamp};

/// Header metadata of the processed message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MailMetadata {
    pub subject: String,
    pub from: Vec<Mailbox>,
    pub to: Vec<Mailbox>,
    pub cc: Vec<Mailbox>,
    pub date: Option<Timestamp>,
}

impl From<&RawMessage> for MailMetadata {
    fn from(message: &RawMessage) -> Self {
        Self {
            subject: message.subject.clone().unwrap_or_default(),
            from: message.from.clone(),
            to: message.to.clone(),
            cc: message.cc.clone(),
            date: message.date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MailBody {
    pub raw_text: String,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttachmentReport {
    pub filename: String,
    /// Lowercased file extension.
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    pub summary: String,
}

/// Everything produced for one message file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MailReport {
    pub mail_path: PathBuf,
    pub metadata: MailMetadata,
    pub body: MailBody,
    pub attachments: Vec<AttachmentReport>,
    pub analysis: MailAnalysis,
    /// Timeline, dialogue, overall summary and reply suggestions; present
    /// only for thread-aware runs.
    #[serde(flatten)]
    pub conversation: Option<ConversationRecord>,
}

/// Write reports as a pretty-printed JSON array, creating parent
/// directories as needed.
pub async fn save_json(path: &Path, reports: &[MailReport]) -> Result<(), PipelineError> {
    let report_err = |reason: String| PipelineError::Report {
        path: path.to_path_buf(),
        reason,
    };

    let json = serde_json::to_string_pretty(reports).map_err(|e| report_err(e.to_string()))?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| report_err(e.to_string()))?;
    }
    tokio::fs::write(path, json)
        .await
        .map_err(|e| report_err(e.to_string()))?;

    tracing::info!(path = %path.display(), reports = reports.len(), "Wrote analysis report");
    Ok(())
}
