//! JSON extraction from model responses.
//!
//! [`JsonParser`] pulls a JSON value out of real-world model output:
//! think blocks, markdown fences, and JSON embedded in prose.

use serde_json::Value;

use super::error::{truncate, ParseError};
use super::OutputParser;
use crate::sanitize::strip_think_tags;

/// An output parser that extracts a JSON value from model text.
///
/// Strategies (in order):
/// 1. Direct parse on the cleaned text
/// 2. Extract from a ```` ```json ```` code block
/// 3. Extract from any code block whose content looks like JSON
/// 4. Balanced-scan a JSON object (`{...}`)
/// 5. Balanced-scan a JSON array (`[...]`)
#[derive(Debug, Default)]
pub struct JsonParser {
    auto_fix: bool,
}

impl JsonParser {
    /// Create a plain JSON parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opt in to self-correction: on parse failure the chain re-prompts
    /// the model with the error and the offending output.
    pub fn with_auto_fix(mut self) -> Self {
        self.auto_fix = true;
        self
    }
}

impl OutputParser for JsonParser {
    fn parse(&self, text: &str) -> Result<Value, ParseError> {
        extract_json_value(text)
    }

    fn auto_fix(&self) -> bool {
        self.auto_fix
    }

    fn format_instructions(&self) -> Option<String> {
        Some("Respond with a single valid JSON value.".to_string())
    }
}

/// Extract a JSON value from messy model text.
pub fn extract_json_value(text: &str) -> Result<Value, ParseError> {
    let cleaned = strip_think_tags(text);
    let cleaned = cleaned.trim();

    if cleaned.is_empty() {
        return Err(ParseError::EmptyResponse);
    }

    // Strategy 1: the whole response is JSON
    if let Ok(value) = serde_json::from_str::<Value>(cleaned) {
        return Ok(value);
    }

    // Strategies 2-3: fenced code blocks
    if let Some(content) = fenced_block(cleaned, Some("json")).or_else(|| {
        fenced_block(cleaned, None)
            .filter(|c| c.starts_with('{') || c.starts_with('['))
    }) {
        match serde_json::from_str::<Value>(content) {
            Ok(value) => return Ok(value),
            Err(e) => {
                return Err(ParseError::DeserializationFailed {
                    reason: e.to_string(),
                    raw_json: truncate(content, 200),
                })
            }
        }
    }

    // Strategies 4-5: JSON embedded in prose
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let Some(candidate) = balanced_span(cleaned, open, close) {
            if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                return Ok(value);
            }
        }
    }

    Err(ParseError::Unparseable {
        expected_format: "JSON",
        text: truncate(cleaned, 200),
    })
}

/// Content of the first code fence, optionally requiring a language hint.
fn fenced_block<'a>(text: &'a str, lang: Option<&str>) -> Option<&'a str> {
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find("```") {
        let after = search_from + offset + 3;
        let line_end = text[after..].find('\n')?;
        let hint = text[after..after + line_end].trim();
        let content_start = after + line_end + 1;

        let matches = match lang {
            Some(l) => hint.eq_ignore_ascii_case(l),
            None => true,
        };
        if matches {
            if let Some(close) = text[content_start..].find("```") {
                return Some(text[content_start..content_start + close].trim());
            }
        }
        search_from = content_start;
    }
    None
}

/// The last balanced `open...close` span, skipping delimiters inside strings.
fn balanced_span(text: &str, open: char, close: char) -> Option<&str> {
    let mut best: Option<&str> = None;
    let mut scan_from = 0;

    while let Some(offset) = text[scan_from..].find(open) {
        let start = scan_from + offset;
        let mut depth = 0i32;
        let mut in_string = false;
        let mut escape_next = false;
        let mut end = None;

        for (i, ch) in text[start..].char_indices() {
            if escape_next {
                escape_next = false;
                continue;
            }
            if ch == '\\' && in_string {
                escape_next = true;
                continue;
            }
            if ch == '"' {
                in_string = !in_string;
                continue;
            }
            if in_string {
                continue;
            }
            if ch == open {
                depth += 1;
            } else if ch == close {
                depth -= 1;
                if depth == 0 {
                    end = Some(start + i);
                    break;
                }
            }
        }

        match end {
            Some(end) => {
                // Prefer later spans: more likely the model's final answer
                best = Some(&text[start..=end]);
                scan_from = end + 1;
            }
            None => break,
        }
    }

    best
}
