//! Mail types — decoded messages, mailboxes, timestamps.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// A (display-name, address) pair. Either side may be empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mailbox {
    pub name: String,
    pub address: String,
}

impl Mailbox {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }

    /// Name if present, otherwise the address.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.address
        } else {
            &self.name
        }
    }
}

impl fmt::Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.name.is_empty(), self.address.is_empty()) {
            (false, false) => write!(f, "{} <{}>", self.name, self.address),
            (true, _) => f.write_str(&self.address),
            (false, true) => f.write_str(&self.name),
        }
    }
}

/// A recovered timestamp. Offsets are kept when the source had one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timestamp {
    Zoned(DateTime<FixedOffset>),
    /// The source carried no offset.
    Local(NaiveDateTime),
}

impl Timestamp {
    /// Key used for chronological ordering.
    pub fn sort_key(&self) -> NaiveDateTime {
        match self {
            Self::Zoned(dt) => dt.naive_utc(),
            Self::Local(dt) => *dt,
        }
    }

    /// `HH:MM` in the timestamp's own wall clock.
    pub fn short_time(&self) -> String {
        let (hour, minute) = match self {
            Self::Zoned(dt) => (dt.hour(), dt.minute()),
            Self::Local(dt) => (dt.hour(), dt.minute()),
        };
        format!("{hour:02}:{minute:02}")
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Zoned(dt) => f.write_str(&dt.to_rfc3339()),
            Self::Local(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S")),
        }
    }
}

impl Serialize for Timestamp {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Zone-less layouts seen in quoted headers, tried after RFC 2822 / RFC 3339.
const LOCAL_LAYOUTS: &[&str] = &[
    "%a, %d %b %Y %H:%M:%S",
    "%a, %d %b %Y %H:%M",
    "%d %b %Y %H:%M:%S",
    "%A, %B %d, %Y %I:%M %p",
    "%A, %B %d, %Y %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%Y年%m月%d日 %H:%M:%S",
    "%Y年%m月%d日 %H:%M",
];

/// Parse a date header value. Returns `None` rather than guessing.
pub fn parse_date(raw: &str) -> Option<Timestamp> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(Timestamp::Zoned(dt));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(Timestamp::Zoned(dt));
    }

    // Drop a trailing "(CST)"-style comment and Outlook's "周一" weekday noise.
    let cleaned = raw
        .split(" (")
        .next()
        .unwrap_or(raw)
        .trim_start_matches(|c: char| !c.is_ascii_alphanumeric())
        .trim();

    if let Ok(dt) = DateTime::parse_from_rfc2822(cleaned) {
        return Some(Timestamp::Zoned(dt));
    }

    LOCAL_LAYOUTS
        .iter()
        .find_map(|layout| NaiveDateTime::parse_from_str(cleaned, layout).ok())
        .map(Timestamp::Local)
}

/// A decoded attachment. The payload is never serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    #[serde(skip)]
    pub payload: Vec<u8>,
}

/// The root parsed email, as produced by the decoder.
#[derive(Debug, Clone, Default)]
pub struct RawMessage {
    pub path: PathBuf,
    pub subject: Option<String>,
    pub from: Vec<Mailbox>,
    pub to: Vec<Mailbox>,
    pub cc: Vec<Mailbox>,
    pub date: Option<Timestamp>,
    pub body: String,
    pub attachments: Vec<Attachment>,
}
