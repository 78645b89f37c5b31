//! Mail processing pipeline.
//!
//! Every message file flows through:
//! 1. `mail::decode_file()` — MIME decoding
//! 2. Attachment extraction and summaries
//! 3. `MailAnalyzer::analyze_mail()` — body analysis
//! 4. `ThreadReconstructor` + `ConversationSynthesizer` — thread-aware runs only

pub mod processor;

pub use processor::MailProcessor;
