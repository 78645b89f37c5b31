//! Partial and final thread records.

use std::collections::BTreeMap;

use serde::ser::{SerializeSeq, Serializer};
use serde::Serialize;

use crate::mail::{Attachment, Mailbox, Timestamp};

/// Sentinel for a field no strategy could recover.
pub const UNKNOWN: &str = "unknown";

/// One of the five recoverable header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Date,
    From,
    To,
    Cc,
    Subject,
}

impl Field {
    pub const ALL: [Field; 5] = [Field::Date, Field::From, Field::To, Field::Cc, Field::Subject];

    /// Fields whose absence triggers the inference fallback. Cc is optional.
    pub const REQUIRED: [Field; 4] = [Field::Date, Field::From, Field::To, Field::Subject];

    pub fn name(self) -> &'static str {
        match self {
            Self::Date => "date",
            Self::From => "from",
            Self::To => "to",
            Self::Cc => "cc",
            Self::Subject => "subject",
        }
    }

    /// Resolve a Chinese or English header label to its canonical field.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim().trim_end_matches([':', '：']).trim();
        match label {
            "时间" | "日期" | "发送时间" => return Some(Self::Date),
            "发件人" => return Some(Self::From),
            "收件人" => return Some(Self::To),
            "抄送" => return Some(Self::Cc),
            "主题" => return Some(Self::Subject),
            _ => {}
        }
        match label.to_ascii_lowercase().as_str() {
            "date" | "sent" => Some(Self::Date),
            "from" => Some(Self::From),
            "to" => Some(Self::To),
            "cc" => Some(Self::Cc),
            "subject" => Some(Self::Subject),
            _ => None,
        }
    }
}

/// A recovered field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// One or more (display-name, address) pairs.
    Mailboxes(Vec<Mailbox>),
    /// A parsed timestamp.
    Date(Timestamp),
    /// Cleaned raw text that could not be structured further.
    Text(String),
    /// Nothing was recovered.
    Unknown,
}

impl FieldValue {
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    /// Flat string rendering, used for dedup keys.
    pub fn render(&self) -> String {
        match self {
            Self::Mailboxes(list) => list
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
            Self::Date(ts) => ts.to_string(),
            Self::Text(s) => s.clone(),
            Self::Unknown => UNKNOWN.to_string(),
        }
    }

    /// Trimmed, lowercased rendering.
    pub fn normalized(&self) -> String {
        self.render().trim().to_lowercase()
    }

    /// Best display name for a sender value.
    pub fn display_name(&self) -> String {
        match self {
            Self::Mailboxes(list) => list
                .first()
                .map(|m| m.display_name().to_string())
                .unwrap_or_else(|| UNKNOWN.to_string()),
            Self::Text(s) if !s.trim().is_empty() => s.trim().to_string(),
            _ => UNKNOWN.to_string(),
        }
    }
}

impl From<Vec<Mailbox>> for FieldValue {
    fn from(list: Vec<Mailbox>) -> Self {
        if list.is_empty() {
            Self::Unknown
        } else {
            Self::Mailboxes(list)
        }
    }
}

/// Mailboxes serialize as `[[name, address], ...]`, dates as their string
/// form, unknowns as the `"unknown"` sentinel.
impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Mailboxes(list) => {
                let mut seq = serializer.serialize_seq(Some(list.len()))?;
                for m in list {
                    seq.serialize_element(&(&m.name, &m.address))?;
                }
                seq.end()
            }
            Self::Date(ts) => ts.serialize(serializer),
            Self::Text(s) => serializer.serialize_str(s),
            Self::Unknown => serializer.serialize_str(UNKNOWN),
        }
    }
}

/// Metadata recovered from one block. Absent keys mean "not found",
/// which is distinct from "found but empty".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialRecord(BTreeMap<Field, FieldValue>);

impl PartialRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: Field) -> Option<&FieldValue> {
        self.0.get(&field)
    }

    pub fn insert(&mut self, field: Field, value: FieldValue) {
        self.0.insert(field, value);
    }

    pub fn contains(&self, field: Field) -> bool {
        self.0.contains_key(&field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Required fields that are still absent.
    pub fn missing_required(&self) -> Vec<Field> {
        Field::REQUIRED
            .into_iter()
            .filter(|f| !self.contains(*f))
            .collect()
    }

    /// Precedence merge: fields present in `self` always win; `lower`
    /// only fills fields still absent.
    pub fn merge(mut self, lower: PartialRecord) -> Self {
        for (field, value) in lower.0 {
            self.0.entry(field).or_insert(value);
        }
        self
    }

    /// Take a field out, substituting [`FieldValue::Unknown`] when absent.
    pub fn take_or_unknown(&mut self, field: Field) -> FieldValue {
        self.0.remove(&field).unwrap_or(FieldValue::Unknown)
    }
}

impl FromIterator<(Field, FieldValue)> for PartialRecord {
    fn from_iter<I: IntoIterator<Item = (Field, FieldValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// One reconstructed message of a thread.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadEntry {
    /// 1-based position after sequencing.
    pub index: usize,
    pub subject: FieldValue,
    pub from: FieldValue,
    pub to: FieldValue,
    pub cc: FieldValue,
    pub date: FieldValue,
    pub body: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}
