//! Deduplication and chronological sequencing of thread entries.

use std::collections::HashSet;

use chrono::NaiveDateTime;

use crate::mail::RawMessage;
use crate::thread::record::{Field, FieldValue, PartialRecord, ThreadEntry};

/// Turn per-block records into the final thread.
///
/// Absent fields become `"unknown"`, duplicates by (from, date, subject) are
/// dropped keeping the first, an empty result falls back to the root
/// message, and entries are stably sorted by date with unparsed dates first.
pub fn finalize(blocks: Vec<(PartialRecord, String)>, root: &RawMessage) -> Vec<ThreadEntry> {
    let entries = blocks
        .into_iter()
        .map(|(mut record, body)| ThreadEntry {
            index: 0,
            subject: record.take_or_unknown(Field::Subject),
            from: record.take_or_unknown(Field::From),
            to: record.take_or_unknown(Field::To),
            cc: record.take_or_unknown(Field::Cc),
            date: record.take_or_unknown(Field::Date),
            body: body.trim().to_string(),
            attachments: Vec::new(),
        })
        .collect::<Vec<_>>();

    let mut entries = dedup(entries);
    if entries.is_empty() {
        entries.push(root_entry(root));
    }
    sequence(entries)
}

/// Re-run dedup and sequencing over already-built entries. Stable on its
/// own output.
pub fn finalize_entries(entries: Vec<ThreadEntry>) -> Vec<ThreadEntry> {
    sequence(dedup(entries))
}

/// The root message as a single entry.
pub fn root_entry(root: &RawMessage) -> ThreadEntry {
    ThreadEntry {
        index: 1,
        subject: root
            .subject
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| FieldValue::Text(s.to_string()))
            .unwrap_or(FieldValue::Unknown),
        from: root.from.clone().into(),
        to: root.to.clone().into(),
        cc: root.cc.clone().into(),
        date: root.date.map(FieldValue::Date).unwrap_or(FieldValue::Unknown),
        body: root.body.trim().to_string(),
        attachments: root.attachments.clone(),
    }
}

fn dedup_key(entry: &ThreadEntry) -> (String, String, String) {
    (
        entry.from.normalized(),
        entry.date.normalized(),
        entry.subject.normalized(),
    )
}

fn dedup(entries: Vec<ThreadEntry>) -> Vec<ThreadEntry> {
    let mut seen = HashSet::new();
    let before = entries.len();
    let kept: Vec<ThreadEntry> = entries
        .into_iter()
        .filter(|e| seen.insert(dedup_key(e)))
        .collect();
    if kept.len() < before {
        tracing::debug!(dropped = before - kept.len(), "Removed duplicate thread entries");
    }
    kept
}

fn sort_key(entry: &ThreadEntry) -> NaiveDateTime {
    match &entry.date {
        FieldValue::Date(ts) => ts.sort_key(),
        _ => NaiveDateTime::MIN,
    }
}

fn sequence(mut entries: Vec<ThreadEntry>) -> Vec<ThreadEntry> {
    // sort_by_key is stable: equal keys keep encounter order.
    entries.sort_by_key(sort_key);
    for (i, entry) in entries.iter_mut().enumerate() {
        entry.index = i + 1;
    }
    entries
}
