//! Mail analyzer — thread reconstruction and inference-backed mail analysis.

pub mod analysis;
pub mod config;
pub mod error;
pub mod llm;
pub mod mail;
pub mod pipeline;
pub mod report;
pub mod thread;
