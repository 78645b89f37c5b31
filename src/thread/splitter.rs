//! Quote splitter: cuts a message body into its quoted historical blocks.

use std::sync::LazyLock;

use regex::Regex;

/// A quote-header convention: a name for logging and a line-anchored
/// pattern marking where a quoted message starts.
#[derive(Debug, Clone)]
pub struct QuoteConvention {
    pub name: &'static str,
    pub header: Regex,
}

impl QuoteConvention {
    pub fn new(name: &'static str, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            name,
            header: Regex::new(pattern)?,
        })
    }
}

/// Tries conventions in priority order; the first one with any match decides
/// the split. Matches are never combined across conventions.
#[derive(Debug, Clone)]
pub struct QuoteSplitter {
    conventions: Vec<QuoteConvention>,
}

/// Line start: indentation, `>` quote marks, then any opening tags or `*`
/// emphasis wrapped around the header label.
const LEAD: &str = r"^[ \t>]*(?:<[^<>\n]*>|\*)*[ \t]*";

/// Closing markup allowed between a label and its colon (`<b>From</b>:`).
const CLOSE: &str = r"(?:\*|</[^<>\n]*>)*";

static BUILTIN: LazyLock<Vec<QuoteConvention>> = LazyLock::new(|| {
    [
        (
            "from_header",
            format!(r"(?m){LEAD}(?:From{CLOSE}:|发件人{CLOSE}[:：])"),
        ),
        (
            "original_message",
            format!(r"(?im){LEAD}-{{2,}}\s*Original Message\s*-{{2,}}"),
        ),
        ("on_wrote", format!(r"(?m){LEAD}On\s.+?wrote:")),
    ]
    .into_iter()
    .map(|(name, pattern)| QuoteConvention::new(name, &pattern).expect("valid regex"))
    .collect()
});

impl Default for QuoteSplitter {
    /// From:/发件人 headers, then Original Message delimiters, then
    /// "On ... wrote:" lines.
    fn default() -> Self {
        Self {
            conventions: BUILTIN.clone(),
        }
    }
}

impl QuoteSplitter {
    pub fn new(conventions: Vec<QuoteConvention>) -> Self {
        Self { conventions }
    }

    /// Append a lower-priority convention.
    pub fn with_convention(mut self, convention: QuoteConvention) -> Self {
        self.conventions.push(convention);
        self
    }

    /// Split `body` into trimmed, non-empty blocks in text order. Returns an
    /// empty list when no convention matches.
    pub fn split<'a>(&self, body: &'a str) -> Vec<&'a str> {
        for convention in &self.conventions {
            let starts: Vec<usize> = convention.header.find_iter(body).map(|m| m.start()).collect();
            if starts.is_empty() {
                continue;
            }
            tracing::debug!(
                convention = convention.name,
                blocks = starts.len(),
                "Quote convention matched"
            );
            return starts
                .iter()
                .enumerate()
                .map(|(i, &start)| {
                    let end = starts.get(i + 1).copied().unwrap_or(body.len());
                    body[start..end].trim()
                })
                .filter(|block| !block.is_empty())
                .collect();
        }
        Vec::new()
    }
}
