//! Defensive cleanup of raw model text.
//!
//! Models wrap answers in reasoning blocks, markdown fences, and quotes.
//! These helpers strip that wrapping so the URL phase gets a bare URL and
//! the parsers get clean text.

/// Strip all `<think>...</think>` and `<thinking>...</thinking>` blocks.
///
/// Handles complete blocks, incomplete blocks (no closing tag), and
/// multiple sequential blocks.
pub fn strip_think_tags(text: &str) -> String {
    let mut result = strip_tag_variant(text, "<think>", "</think>");
    result = strip_tag_variant(&result, "<thinking>", "</thinking>");
    result
}

fn strip_tag_variant(text: &str, open: &str, close: &str) -> String {
    let mut result = text.to_string();
    while let Some(start) = result.find(open) {
        if let Some(end_offset) = result[start..].find(close) {
            let end = start + end_offset + close.len();
            result = format!("{}{}", &result[..start], &result[end..]);
        } else {
            // No closing tag, strip from open tag to end
            result = result[..start].to_string();
            break;
        }
    }
    result
}

/// Clean a model-synthesized URL candidate.
///
/// Strips think blocks, markdown code fences, surrounding quotes and
/// backticks, and whitespace. Deliberately does NOT validate URL syntax —
/// the HTTP call is the actual validator.
pub fn clean_url(text: &str) -> String {
    let stripped = strip_think_tags(text);
    let mut candidate = stripped.trim();

    // Unwrap a code fence if the whole output is fenced
    if let Some(inner) = unwrap_code_fence(candidate) {
        candidate = inner;
    }

    // Models sometimes answer with a labeled line; keep the last non-empty line
    if let Some(line) = candidate.lines().rev().find(|l| !l.trim().is_empty()) {
        candidate = line.trim();
    }

    candidate
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim()
        .to_string()
}

/// If `text` is entirely a ```fenced``` block, return the inner content.
fn unwrap_code_fence(text: &str) -> Option<&str> {
    let rest = text.strip_prefix("```")?;
    // Drop an optional language hint line
    let body_start = rest.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &rest[body_start..];
    let close = body.rfind("```")?;
    Some(body[..close].trim())
}
