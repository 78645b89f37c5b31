//! Pattern-based header recovery from one quoted block.

use std::sync::LazyLock;

use regex::Regex;

use crate::mail::{Mailbox, parse_date};
use crate::thread::record::{Field, FieldValue, PartialRecord};

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^<>]*>").expect("valid regex"));

static NAMED_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([\w\s."'\-]+)?\s*<([\w.+\-]+@[\w.\-]+)>"#).expect("valid regex")
});

static BARE_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\w.+\-]+@[\w\-]+(?:\.[\w\-]+)+").expect("valid regex"));

/// One label pattern per field, tolerating `*` emphasis around the label.
/// Chinese labels may omit the colon; English ones must carry it, so prose
/// such as "Sent from my iPhone" or "To be honest" is not a header.
static LABELS: LazyLock<Vec<(Field, Regex)>> = LazyLock::new(|| {
    let label = |cjk: &str, en: &str| {
        Regex::new(&format!(
            r"(?i)^[\s>]*\**\s*(?:(?:{cjk})\**\s*[:：]?|(?:{en})\**\s*[:：])\**\s*(.+)$"
        ))
        .expect("valid regex")
    };
    vec![
        (Field::Date, label("发送时间|时间|日期", "date|sent")),
        (Field::From, label("发件人", "from")),
        (Field::To, label("收件人", "to")),
        (Field::Cc, label("抄送", "cc")),
        (Field::Subject, label("主题", "subject")),
    ]
});

/// Recovers date/from/to/cc/subject from literal header lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetadataExtractor;

impl MetadataExtractor {
    /// First matching line wins per field. Fields that never match are left
    /// absent.
    pub fn extract(&self, block: &str) -> PartialRecord {
        let mut record = PartialRecord::new();
        for raw_line in block.lines() {
            if record.len() == Field::ALL.len() {
                break;
            }
            let line = clean_line(raw_line);
            if line.is_empty() {
                continue;
            }
            for (field, pattern) in LABELS.iter() {
                if record.contains(*field) {
                    continue;
                }
                let Some(value) = pattern
                    .captures(&line)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().trim_start_matches([':', '：', '*']).trim())
                else {
                    continue;
                };
                if value.is_empty() {
                    continue;
                }
                record.insert(*field, parse_value(*field, value));
                // A line carries one header.
                break;
            }
        }
        record
    }
}

/// Interpret a cleaned value for `field`.
pub fn parse_value(field: Field, value: &str) -> FieldValue {
    match field {
        Field::Date => parse_date(value)
            .map(FieldValue::Date)
            .unwrap_or_else(|| FieldValue::Text(value.to_string())),
        Field::From | Field::To | Field::Cc => {
            let boxes = parse_mailboxes(value);
            if boxes.is_empty() {
                FieldValue::Text(value.to_string())
            } else {
                FieldValue::Mailboxes(boxes)
            }
        }
        Field::Subject => FieldValue::Text(value.to_string()),
    }
}

/// `Name <addr>` pairs, else bare addresses with empty names.
pub fn parse_mailboxes(value: &str) -> Vec<Mailbox> {
    let named: Vec<Mailbox> = NAMED_ADDRESS
        .captures_iter(value)
        .map(|c| {
            let name = c
                .get(1)
                .map(|m| m.as_str().trim().trim_matches(['"', '\'']).trim())
                .unwrap_or_default();
            Mailbox::new(name, &c[2])
        })
        .collect();
    if !named.is_empty() {
        return named;
    }
    BARE_ADDRESS
        .find_iter(value)
        .map(|m| Mailbox::new("", m.as_str()))
        .collect()
}

/// Strip markup tags and decode HTML entities.
///
/// Angle-bracketed addresses look like tags, so they are protected first.
fn clean_line(line: &str) -> String {
    let mut kept = String::with_capacity(line.len());
    let mut last = 0;
    for m in TAG.find_iter(line) {
        kept.push_str(&line[last..m.start()]);
        if m.as_str().contains('@') && !m.as_str().contains(['=', ' ']) {
            kept.push_str(m.as_str());
        }
        last = m.end();
    }
    kept.push_str(&line[last..]);
    html_escape::decode_html_entities(&kept).trim().to_string()
}
