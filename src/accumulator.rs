use serde_json::Value;
use thiserror::Error;

use crate::models::{ChatContent, NormalContent, ParsedContent};

/// How much of the cleaned buffer a [`ParseError`] keeps for display.
pub const RAW_TEXT_LIMIT: usize = 1000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("model output is not a recognised JSON document: {reason}")]
pub struct ParseError {
    pub reason: String,
    /// The cleaned buffer, truncated to [`RAW_TEXT_LIMIT`] characters.
    pub raw_text: String,
}

/// Collects content fragments for one request and parses them once the
/// upstream is exhausted.
#[derive(Debug)]
pub struct FragmentAccumulator {
    buffer: String,
    limit: usize,
    overflowed: bool,
    fragments: usize,
}

impl FragmentAccumulator {
    pub fn with_limit(limit: usize) -> Self {
        Self { buffer: String::new(), limit, overflowed: false, fragments: 0 }
    }

    pub fn push(&mut self, fragment: &str) {
        self.fragments += 1;
        if self.overflowed {
            return;
        }
        if self.buffer.len() + fragment.len() > self.limit {
            let room = floor_char_boundary(fragment, self.limit.saturating_sub(self.buffer.len()));
            self.buffer.push_str(&fragment[..room]);
            self.overflowed = true;
            return;
        }
        self.buffer.push_str(fragment);
    }

    pub fn fragments(&self) -> usize {
        self.fragments
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn finish(self) -> Result<ParsedContent, ParseError> {
        let cleaned = strip_code_fence(&self.buffer);
        if self.overflowed {
            return Err(ParseError {
                reason: format!("output exceeded {} bytes", self.limit),
                raw_text: truncate_chars(cleaned, RAW_TEXT_LIMIT),
            });
        }
        parse_document(cleaned)
    }
}

/// Trims, then removes a leading "```json" / "```" marker and a trailing "```".
pub fn strip_code_fence(text: &str) -> &str {
    let mut s = text.trim();
    if let Some(rest) = s.strip_prefix("```json") {
        s = rest;
    } else if let Some(rest) = s.strip_prefix("```") {
        s = rest;
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest;
    }
    s.trim()
}

/// `sections` selects the article shape, then `messages` the chat shape.
fn parse_document(text: &str) -> Result<ParsedContent, ParseError> {
    let fail = |reason: String| ParseError { reason, raw_text: truncate_chars(text, RAW_TEXT_LIMIT) };

    let value: Value = serde_json::from_str(text).map_err(|e| fail(e.to_string()))?;
    let Some(object) = value.as_object() else {
        return Err(fail("top-level value is not an object".into()));
    };

    if object.contains_key("sections") {
        return serde_json::from_value::<NormalContent>(value)
            .map(ParsedContent::Normal)
            .map_err(|e| fail(e.to_string()));
    }
    if object.contains_key("messages") {
        return serde_json::from_value::<ChatContent>(value)
            .map(ParsedContent::Chat)
            .map_err(|e| fail(e.to_string()));
    }
    Err(fail("document has neither `sections` nor `messages`".into()))
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
