//! Mail decoder — `.eml` bytes to [`RawMessage`] via mail-parser.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{FixedOffset, NaiveDate, TimeZone};
use mail_parser::{MessageParser, MimeHeaders};
use regex::Regex;
use tracing::debug;

use crate::error::MailError;
use crate::mail::types::{Attachment, Mailbox, RawMessage, Timestamp};

static BLOCK_BREAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<\s*(br\s*/?|/p|/div|/tr|/li|/h[1-6])\s*>").expect("valid regex")
});

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));

/// Read and decode a message file.
pub async fn decode_file(path: &Path) -> Result<RawMessage, MailError> {
    let raw = tokio::fs::read(path).await.map_err(|source| MailError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    decode_bytes(path, &raw)
}

/// Decode raw RFC 5322 bytes. `path` is only recorded on the result.
pub fn decode_bytes(path: &Path, raw: &[u8]) -> Result<RawMessage, MailError> {
    let parsed = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| MailError::Malformed {
            path: path.to_path_buf(),
        })?;

    // mail-parser accepts almost anything; a message without a single
    // recognised header is not a mail file.
    if parsed.headers().is_empty() {
        return Err(MailError::Malformed {
            path: path.to_path_buf(),
        });
    }

    let attachments = parsed
        .attachments()
        .map(|part| Attachment {
            filename: MimeHeaders::attachment_name(part)
                .unwrap_or_default()
                .to_string(),
            content_type: MimeHeaders::content_type(part)
                .map(|ct| match ct.subtype() {
                    Some(sub) => format!("{}/{}", ct.ctype(), sub),
                    None => ct.ctype().to_string(),
                })
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            payload: part.contents().to_vec(),
        })
        .collect::<Vec<_>>();

    let message = RawMessage {
        path: path.to_path_buf(),
        subject: parsed.subject().map(str::to_string),
        from: mailboxes(parsed.from()),
        to: mailboxes(parsed.to()),
        cc: mailboxes(parsed.cc()),
        date: parsed.date().and_then(convert_date),
        body: extract_body(&parsed),
        attachments,
    };

    debug!(
        path = %path.display(),
        subject = message.subject.as_deref().unwrap_or(""),
        attachments = message.attachments.len(),
        "Decoded message"
    );

    Ok(message)
}

/// Recursively collect `*.eml` files under `dir`, sorted by path.
pub fn scan_dir(dir: &Path) -> Result<Vec<PathBuf>, MailError> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let entries = std::fs::read_dir(&current).map_err(|source| MailError::Io {
            path: current.clone(),
            source,
        })?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("eml"))
            {
                found.push(path);
            }
        }
    }

    found.sort();
    Ok(found)
}

/// Convert HTML to plain text, keeping block boundaries as newlines.
pub fn html_to_text(html: &str) -> String {
    let with_breaks = BLOCK_BREAK.replace_all(html, "\n");
    let stripped = TAG.replace_all(&with_breaks, "");
    html_escape::decode_html_entities(&stripped).into_owned()
}

fn extract_body(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return html_to_text(html.as_ref());
    }
    String::new()
}

fn mailboxes(addr: Option<&mail_parser::Address>) -> Vec<Mailbox> {
    let Some(addr) = addr else {
        return Vec::new();
    };
    let to_mailbox = |a: &mail_parser::Addr| {
        Mailbox::new(
            a.name.as_deref().unwrap_or_default().trim(),
            a.address.as_deref().unwrap_or_default().trim(),
        )
    };
    match addr {
        mail_parser::Address::List(addrs) => addrs.iter().map(to_mailbox).collect(),
        mail_parser::Address::Group(groups) => groups
            .iter()
            .flat_map(|g| g.addresses.iter().map(to_mailbox))
            .collect(),
    }
}

fn convert_date(d: &mail_parser::DateTime) -> Option<Timestamp> {
    let offset_secs = (i32::from(d.tz_hour) * 3600 + i32::from(d.tz_minute) * 60)
        * if d.tz_before_gmt { -1 } else { 1 };
    let offset = FixedOffset::east_opt(offset_secs)?;
    let naive = NaiveDate::from_ymd_opt(i32::from(d.year), u32::from(d.month), u32::from(d.day))?
        .and_hms_opt(u32::from(d.hour), u32::from(d.minute), u32::from(d.second))?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(Timestamp::Zoned)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "From: \"Alice Chen\" <alice@example.com>\r\n\
To: Bob <bob@example.com>, carol@example.com\r\n\
Cc: Dan <dan@example.com>\r\n\
Subject: Budget review\r\n\
Date: Tue, 2 Jan 2024 09:30:00 +0800\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Please see the numbers below.\r\n";

    #[test]
    fn decodes_headers_and_body() {
        let msg = decode_bytes(Path::new("a.eml"), SAMPLE.as_bytes()).unwrap();
        assert_eq!(msg.subject.as_deref(), Some("Budget review"));
        assert_eq!(msg.from, vec![Mailbox::new("Alice Chen", "alice@example.com")]);
        assert_eq!(msg.to.len(), 2);
        assert_eq!(msg.to[1].address, "carol@example.com");
        assert_eq!(msg.cc[0].name, "Dan");
        assert!(msg.body.contains("numbers below"));
        match msg.date {
            Some(Timestamp::Zoned(dt)) => {
                assert_eq!(dt.offset().local_minus_utc(), 8 * 3600);
                assert_eq!(dt.to_rfc3339(), "2024-01-02T09:30:00+08:00");
            }
            other => panic!("expected zoned date, got {other:?}"),
        }
        assert!(msg.attachments.is_empty());
    }

    #[test]
    fn html_body_becomes_text() {
        let raw = "From: a@x.com\r\nSubject: Hi\r\nContent-Type: text/html\r\n\r\n<p>Hello&nbsp;there</p><div>From: b@x.com</div>";
        let msg = decode_bytes(Path::new("h.eml"), raw.as_bytes()).unwrap();
        assert!(msg.body.contains("Hello"));
        assert!(msg.body.contains("From: b@x.com"));
        assert!(!msg.body.contains("<p>"));
    }

    #[test]
    fn html_to_text_decodes_entities() {
        assert_eq!(html_to_text("a&amp;b<br>c"), "a&b\nc");
    }

    #[test]
    fn scan_dir_finds_eml_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("b.eml"), SAMPLE).unwrap();
        std::fs::write(nested.join("a.EML"), SAMPLE).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let found = scan_dir(dir.path()).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|p| p.extension().is_some()));
    }

    #[tokio::test]
    async fn decode_file_missing_is_io_error() {
        let err = decode_file(Path::new("/definitely/not/here.eml"))
            .await
            .unwrap_err();
        assert!(matches!(err, MailError::Io { .. }));
    }
}
