//! Attachment text extraction.
//!
//! PDFs go through `pdf-extract`, `.docx` files are read straight out of
//! their zip container. Spreadsheets, legacy `.doc` and images have no
//! engine here and yield empty text.

use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::error::AttachmentError;

static DOCX_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<w:t(?:\s[^>]*)?>(.*?)</w:t>|</w:p>").expect("valid regex")
});

/// Coarse attachment type, derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Pdf,
    Spreadsheet,
    Document,
    Image,
    Text,
    Other,
}

impl AttachmentKind {
    pub fn from_filename(filename: &str) -> Self {
        match extension(filename).as_str() {
            "pdf" => Self::Pdf,
            "xls" | "xlsx" => Self::Spreadsheet,
            "doc" | "docx" => Self::Document,
            "png" | "jpg" | "jpeg" | "bmp" => Self::Image,
            "txt" | "csv" | "md" | "log" => Self::Text,
            _ => Self::Other,
        }
    }
}

/// Lowercased extension without the dot, or empty.
pub fn extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default()
}

/// Pulls plain text out of an attachment stored on disk.
pub trait AttachmentExtractor: Send + Sync {
    fn extract(&self, path: &Path, kind: AttachmentKind) -> Result<String, AttachmentError>;
}

/// Extractor backed by pure-Rust parsers.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinExtractor;

impl AttachmentExtractor for BuiltinExtractor {
    fn extract(&self, path: &Path, kind: AttachmentKind) -> Result<String, AttachmentError> {
        match kind {
            AttachmentKind::Pdf => {
                pdf_extract::extract_text(path).map_err(|e| AttachmentError::Pdf(e.to_string()))
            }
            AttachmentKind::Document if extension(&path.to_string_lossy()) == "docx" => {
                extract_docx(path)
            }
            AttachmentKind::Text => {
                let bytes = std::fs::read(path)?;
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
            _ => {
                debug!(path = %path.display(), ?kind, "No text extractor for attachment type");
                Ok(String::new())
            }
        }
    }
}

fn extract_docx(path: &Path) -> Result<String, AttachmentError> {
    let file = std::fs::File::open(path)?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| AttachmentError::Archive(e.to_string()))?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| AttachmentError::Archive(e.to_string()))?
        .read_to_string(&mut xml)?;
    Ok(docx_xml_to_text(&xml))
}

fn docx_xml_to_text(xml: &str) -> String {
    let mut text = String::new();
    for cap in DOCX_RUN.captures_iter(xml) {
        match cap.get(1) {
            Some(run) => text.push_str(&html_escape::decode_html_entities(run.as_str())),
            None => text.push('\n'),
        }
    }
    text.trim().to_string()
}
