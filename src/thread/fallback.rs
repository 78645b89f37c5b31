//! Inference fallback for blocks whose headers the patterns could not read.

use std::sync::Arc;

use serde_json::Value;

use crate::llm::{InferenceClient, extract_json_object};
use crate::mail::Mailbox;
use crate::thread::extractor::{parse_mailboxes, parse_value};
use crate::thread::record::{Field, FieldValue, PartialRecord};

const PROMPT: &str = "请从以下邮件内容中提取元数据，只返回JSON，字段包括：date, from, to, cc, subject。\
from/to/cc 为 [[姓名, 邮箱], ...] 形式的列表，无法确定的字段返回 null。\n邮件内容：\n";

/// Asks the inference backend for the five header fields as JSON.
#[derive(Clone)]
pub struct InferenceFallback {
    inference: Arc<InferenceClient>,
}

impl InferenceFallback {
    pub fn new(inference: Arc<InferenceClient>) -> Self {
        Self { inference }
    }

    /// Never fails: any transport or parse problem yields an empty record.
    pub async fn infer(&self, block: &str) -> PartialRecord {
        let prompt = format!("{PROMPT}{block}");
        match self.inference.infer_structured_fields(&prompt).await {
            Ok(reply) => {
                let record = parse_reply(&reply);
                if record.is_empty() {
                    tracing::warn!(reply = %reply, "Metadata inference returned no usable JSON");
                }
                record
            }
            Err(e) => {
                tracing::warn!(error = %e, "Metadata inference failed");
                PartialRecord::new()
            }
        }
    }
}

/// Parse a model reply into a partial record.
///
/// Only the first balanced `{...}` is decoded. Keys go through the label
/// map, so `发件人` and `from` land on the same field. `null`, `""` and `[]`
/// count as absent.
pub fn parse_reply(reply: &str) -> PartialRecord {
    let Some(Value::Object(map)) =
        extract_json_object(reply).and_then(|s| serde_json::from_str::<Value>(s).ok())
    else {
        return PartialRecord::new();
    };

    let mut record = PartialRecord::new();
    for (key, value) in &map {
        let Some(field) = Field::from_label(key) else {
            continue;
        };
        if record.contains(field) {
            continue;
        }
        if let Some(value) = convert(field, value) {
            record.insert(field, value);
        }
    }
    record
}

fn convert(field: Field, value: &Value) -> Option<FieldValue> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(parse_value(field, s.trim())),
        Value::Array(items) if !items.is_empty() => match field {
            Field::From | Field::To | Field::Cc => {
                let boxes: Vec<Mailbox> = items.iter().flat_map(mailboxes_from_item).collect();
                (!boxes.is_empty()).then_some(FieldValue::Mailboxes(boxes))
            }
            _ => {
                let joined = items
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(" ");
                (!joined.trim().is_empty()).then(|| parse_value(field, joined.trim()))
            }
        },
        Value::Number(n) if field == Field::Subject => Some(FieldValue::Text(n.to_string())),
        _ => None,
    }
}

/// `["Name", "addr"]`, `{"name": .., "email"/"address": ..}` or a
/// free-form string.
fn mailboxes_from_item(item: &Value) -> Vec<Mailbox> {
    match item {
        Value::Array(pair) => {
            let parts: Vec<&str> = pair.iter().filter_map(Value::as_str).collect();
            match parts.as_slice() {
                [name, addr, ..] => vec![Mailbox::new(name.trim(), addr.trim())],
                [single] => parse_mailboxes(single),
                [] => Vec::new(),
            }
        }
        Value::Object(obj) => {
            let name = obj.get("name").and_then(Value::as_str).unwrap_or_default();
            let addr = obj
                .get("email")
                .or_else(|| obj.get("address"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            if name.is_empty() && addr.is_empty() {
                Vec::new()
            } else {
                vec![Mailbox::new(name.trim(), addr.trim())]
            }
        }
        Value::String(s) => {
            let parsed = parse_mailboxes(s);
            if parsed.is_empty() && !s.trim().is_empty() {
                vec![Mailbox::new(s.trim(), "")]
            } else {
                parsed
            }
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_english_keys_with_prose() {
        let reply = "以下是提取结果：\n{\"date\": \"2024-01-02 09:15\", \"from\": [[\"Bob\", \"b@x.com\"]], \"to\": \"Alice <a@x.com>\", \"cc\": null, \"subject\": \"Budget\"}\n以上。";
        let record = parse_reply(reply);
        assert!(matches!(record.get(Field::Date), Some(FieldValue::Date(_))));
        assert_eq!(
            record.get(Field::From),
            Some(&FieldValue::Mailboxes(vec![Mailbox::new("Bob", "b@x.com")]))
        );
        assert_eq!(
            record.get(Field::To),
            Some(&FieldValue::Mailboxes(vec![Mailbox::new("Alice", "a@x.com")]))
        );
        assert!(!record.contains(Field::Cc));
        assert_eq!(record.get(Field::Subject), Some(&FieldValue::Text("Budget".into())));
    }

    #[test]
    fn chinese_keys_are_normalized() {
        let reply = r#"{"发件人": "张三 <z@x.cn>", "主题": "周报", "时间": "昨天下午"}"#;
        let record = parse_reply(reply);
        assert_eq!(
            record.get(Field::From),
            Some(&FieldValue::Mailboxes(vec![Mailbox::new("张三", "z@x.cn")]))
        );
        assert_eq!(record.get(Field::Subject), Some(&FieldValue::Text("周报".into())));
        assert_eq!(record.get(Field::Date), Some(&FieldValue::Text("昨天下午".into())));
    }

    #[test]
    fn empty_values_are_absent() {
        let record = parse_reply(r#"{"date": "", "from": [], "to": null, "subject": "  "}"#);
        assert!(record.is_empty());
    }

    #[test]
    fn garbage_is_empty_record() {
        assert!(parse_reply("I could not find any metadata.").is_empty());
        assert!(parse_reply("{not json}").is_empty());
        assert!(parse_reply("[1, 2]").is_empty());
    }

    #[test]
    fn object_style_mailboxes() {
        let reply = r#"{"to": [{"name": "Dan", "email": "d@x.com"}, "e@x.com"]}"#;
        let record = parse_reply(reply);
        assert_eq!(
            record.get(Field::To),
            Some(&FieldValue::Mailboxes(vec![
                Mailbox::new("Dan", "d@x.com"),
                Mailbox::new("", "e@x.com"),
            ]))
        );
    }
}
