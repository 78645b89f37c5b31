//! Mail decoding and attachment handling.

pub mod attachments;
pub mod decoder;
pub mod types;

pub use attachments::{AttachmentExtractor, AttachmentKind, BuiltinExtractor};
pub use decoder::{decode_bytes, decode_file, html_to_text, scan_dir};
pub use types::{Attachment, Mailbox, RawMessage, Timestamp, parse_date};
