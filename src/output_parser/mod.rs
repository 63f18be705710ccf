//! Structured-output parsing for the answer-synthesis phase.
//!
//! An [`OutputParser`] turns raw model text into a `serde_json::Value`.
//! Parsers that set the [`auto_fix`](OutputParser::auto_fix) flag are wrapped
//! once per chain in a [`SelfCorrectingParser`] that re-prompts the model
//! with the error and the offending output.
//!
//! | Item | Use Case |
//! |------|----------|
//! | [`JsonParser`] | Extract a JSON value from messy model output |
//! | [`SelfCorrectingParser`] | LLM-in-the-loop retry on parse failure |
//! | [`ResolvedParser`] | Plain vs. self-correcting, decided once |

pub mod error;
pub mod fixing;
pub mod json;

pub use error::ParseError;
pub use fixing::{ResolvedParser, SelfCorrectingParser};
pub use json::JsonParser;

use serde_json::Value;

/// Converts raw model text into a structured value.
///
/// Object-safe; shared as `Arc<dyn OutputParser>`.
pub trait OutputParser: Send + Sync {
    /// Parse the model's raw answer text.
    fn parse(&self, text: &str) -> Result<Value, ParseError>;

    /// Whether this parser should be wrapped in the self-correcting layer.
    ///
    /// Inspected exactly once, when the chain resolves its parser on first
    /// use. Default: `false`.
    fn auto_fix(&self) -> bool {
        false
    }

    /// Optional format instructions included in correction prompts so the
    /// model knows what shape was expected.
    fn format_instructions(&self) -> Option<String> {
        None
    }
}
