//! Thread reconstruction.
//!
//! A raw message body is split into quoted blocks, each block's headers are
//! recovered (patterns first, inference for whatever is still missing),
//! and the results are deduplicated and put in chronological order:
//!
//! ```text
//! body ─► QuoteSplitter ─► blocks ─► MetadataExtractor ─┬─► finalize ─► Vec<ThreadEntry>
//!                                    InferenceFallback ─┘
//! ```

pub mod extractor;
pub mod fallback;
pub mod record;
pub mod sequencer;
pub mod splitter;

pub use extractor::MetadataExtractor;
pub use fallback::InferenceFallback;
pub use record::{Field, FieldValue, PartialRecord, ThreadEntry, UNKNOWN};
pub use sequencer::{finalize, finalize_entries};
pub use splitter::{QuoteConvention, QuoteSplitter};

use futures::future::join_all;

use crate::mail::RawMessage;

/// Rebuilds the ordered thread contained in one message.
#[derive(Clone, Default)]
pub struct ThreadReconstructor {
    splitter: QuoteSplitter,
    extractor: MetadataExtractor,
    fallback: Option<InferenceFallback>,
}

impl ThreadReconstructor {
    pub fn new(splitter: QuoteSplitter, fallback: Option<InferenceFallback>) -> Self {
        Self {
            splitter,
            extractor: MetadataExtractor,
            fallback,
        }
    }

    /// Pattern-only reconstruction; no inference calls are made.
    pub fn patterns_only() -> Self {
        Self::default()
    }

    /// Recover metadata for one block, consulting the fallback only when a
    /// required field is still missing.
    pub async fn extract_block(&self, block: &str) -> PartialRecord {
        let found = self.extractor.extract(block);
        let missing = found.missing_required();
        if missing.is_empty() {
            return found;
        }
        let Some(fallback) = &self.fallback else {
            return found;
        };
        tracing::debug!(
            missing = ?missing.iter().map(|f| f.name()).collect::<Vec<_>>(),
            "Header patterns incomplete, asking inference"
        );
        found.merge(fallback.infer(block).await)
    }

    /// Split, extract (blocks in parallel) and sequence. Always returns at
    /// least one entry.
    pub async fn reconstruct(&self, message: &RawMessage) -> Vec<ThreadEntry> {
        let blocks = self.splitter.split(&message.body);
        tracing::debug!(
            path = %message.path.display(),
            blocks = blocks.len(),
            "Split message into quoted blocks"
        );

        let records = join_all(blocks.iter().map(|block| self.extract_block(block))).await;
        let pairs = records
            .into_iter()
            .zip(blocks)
            .map(|(record, block)| (record, block.to_string()))
            .collect();

        let thread = finalize(pairs, message);
        tracing::info!(
            path = %message.path.display(),
            entries = thread.len(),
            "Reconstructed thread"
        );
        thread
    }
}
