//! Error type for output parsers.

/// Errors returned by output parsers.
///
/// Parse failures are the one recoverable error in a chain run: the chain
/// logs them and falls back to the raw answer text instead of aborting.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The model response was empty or whitespace-only.
    #[error("empty model response")]
    EmptyResponse,

    /// No strategy could extract the expected format.
    #[error("could not parse {expected_format} from model response: {text}")]
    Unparseable {
        /// The format the parser was trying to extract.
        expected_format: &'static str,
        /// A truncated copy of the cleaned model text.
        text: String,
    },

    /// Content was extracted but failed to deserialize.
    #[error("JSON deserialization failed: {reason}")]
    DeserializationFailed {
        /// The serde error message.
        reason: String,
        /// The raw JSON string that failed deserialization.
        raw_json: String,
    },

    /// Self-correction retries were exhausted without a valid result.
    #[error("parser failed after {attempts} correction attempt(s): {last_error}")]
    CorrectionExhausted {
        /// Correction attempts made (not counting the initial parse).
        attempts: u32,
        /// The final parse error message.
        last_error: String,
    },
}

/// Truncate a string to at most `max_len` bytes on a char boundary,
/// appending "..." if truncated.
pub(crate) fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        let mut end = max_len;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}
