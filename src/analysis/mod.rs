//! Message and conversation analysis on top of the inference client.

pub mod analyzer;
pub mod synthesizer;
pub mod types;

pub use analyzer::MailAnalyzer;
pub use synthesizer::ConversationSynthesizer;
pub use types::{ConversationRecord, MailAnalysis, ReplySuggestion, ReplyTone, TimelineItem};
