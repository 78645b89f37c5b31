//! Token usage accounting.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::LlmError;

/// One line of the usage log.
#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub estimated_cost_usd: Decimal,
}

impl UsageRecord {
    pub fn new(
        model: &str,
        prompt_tokens: u32,
        completion_tokens: u32,
        (input_cost, output_cost): (Decimal, Decimal),
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            model: model.to_string(),
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            estimated_cost_usd: input_cost * Decimal::from(prompt_tokens)
                + output_cost * Decimal::from(completion_tokens),
        }
    }
}

/// Append-only JSON-lines usage log.
#[derive(Debug)]
pub struct UsageLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl UsageLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, record: &UsageRecord) -> Result<(), LlmError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn record_totals_and_cost() {
        let record = UsageRecord::new("gpt-4o-mini", 1000, 200, (dec!(0.000001), dec!(0.000002)));
        assert_eq!(record.total_tokens, 1200);
        assert_eq!(record.estimated_cost_usd, dec!(0.0014));
    }

    #[tokio::test]
    async fn appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = UsageLog::new(dir.path().join("nested/usage.jsonl"));
        let record = UsageRecord::new("m", 10, 5, (Decimal::ZERO, Decimal::ZERO));
        log.append(&record).await.unwrap();
        log.append(&record).await.unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["total_tokens"], 15);
        assert!(parsed["timestamp"].is_string());
    }
}
