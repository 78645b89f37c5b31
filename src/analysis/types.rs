//! Analysis result types.

use serde::Serialize;
use serde_json::Value;

use crate::thread::FieldValue;

/// Single-message analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MailAnalysis {
    pub summary: String,
    pub entities: Value,
    pub action_items: Vec<Value>,
    pub sentiment: String,
    pub risk_points: Vec<Value>,
}

impl Default for MailAnalysis {
    fn default() -> Self {
        Self {
            summary: String::new(),
            entities: Value::Object(Default::default()),
            action_items: Vec::new(),
            sentiment: String::new(),
            risk_points: Vec::new(),
        }
    }
}

/// Reply styles offered for a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyTone {
    Formal,
    Neutral,
    Friendly,
}

impl ReplyTone {
    pub const ALL: [ReplyTone; 3] = [ReplyTone::Formal, ReplyTone::Neutral, ReplyTone::Friendly];

    /// Tone wording used in prompts.
    pub fn label(self) -> &'static str {
        match self {
            Self::Formal => "正式",
            Self::Neutral => "中性",
            Self::Friendly => "友好",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplySuggestion {
    pub tone: ReplyTone,
    pub text: String,
}

/// One timeline row per thread entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineItem {
    pub index: usize,
    pub date: FieldValue,
    pub sender: String,
    pub subject: FieldValue,
    pub summary: String,
    pub sentiment: String,
}

/// Thread-level synthesis, in ascending entry index order.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ConversationRecord {
    pub timeline: Vec<TimelineItem>,
    pub dialogue: Vec<String>,
    pub overall_summary: String,
    pub reply_suggestions: Vec<ReplySuggestion>,
}
