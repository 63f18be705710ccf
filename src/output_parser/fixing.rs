//! Self-correcting parser wrapper and one-time parser resolution.
//!
//! A parser whose `auto_fix` flag is set gets wrapped in
//! [`SelfCorrectingParser`]: on validation failure it feeds its own error
//! plus the offending output back to the model and re-parses the corrected
//! completion, up to a bounded retry count.
//!
//! [`ResolvedParser`] is the tagged outcome of inspecting `auto_fix` —
//! decided once per chain instance, never per call.

use std::sync::Arc;

use serde_json::Value;

use super::{OutputParser, ParseError};
use crate::model::LanguageModel;
use crate::prompt::PromptTemplate;

/// Prompt used to ask the model to correct a failed completion.
pub const CORRECTION_PROMPT_TEMPLATE: &str = "Instructions:
{instructions}

Completion:
{completion}

Above, the Completion did not satisfy the constraints given in the Instructions.
Error:
{error}

Please try again. Respond only with an answer that satisfies the constraints laid out in the Instructions:";

const CORRECTION_PLACEHOLDERS: &[&str] = &["completion", "error"];

/// Default number of correction round-trips.
const DEFAULT_MAX_RETRIES: u32 = 2;

/// Wraps a parser with LLM-in-the-loop correction on parse failure.
///
/// Bound to the same model the chain uses for answer synthesis.
pub struct SelfCorrectingParser {
    inner: Arc<dyn OutputParser>,
    model: Arc<dyn LanguageModel>,
    max_retries: u32,
}

impl SelfCorrectingParser {
    /// Wrap `inner`, correcting through `model`.
    pub fn new(inner: Arc<dyn OutputParser>, model: Arc<dyn LanguageModel>) -> Self {
        Self {
            inner,
            model,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Override the correction retry bound (capped at 5).
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.min(5);
        self
    }

    /// Parse `text`, re-prompting the model on failure.
    pub async fn parse(&self, text: &str) -> Result<Value, ParseError> {
        let mut last_error = match self.inner.parse(text) {
            Ok(value) => return Ok(value),
            Err(e) => e.to_string(),
        };
        let mut completion = text.to_string();

        for attempt in 1..=self.max_retries {
            let prompt = self.correction_prompt(&completion, &last_error);
            let corrected = match self.model.complete(&prompt).await {
                Ok(response) => response.text,
                Err(e) => {
                    // A failed correction call ends the loop; the parse
                    // failure itself stays recoverable for the chain.
                    return Err(ParseError::CorrectionExhausted {
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }
            };

            match self.inner.parse(&corrected) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    last_error = e.to_string();
                    completion = corrected;
                }
            }
        }

        Err(ParseError::CorrectionExhausted {
            attempts: self.max_retries,
            last_error,
        })
    }

    fn correction_prompt(&self, completion: &str, error: &str) -> String {
        let instructions = self
            .inner
            .format_instructions()
            .unwrap_or_else(|| "Produce output the parser accepts.".to_string());
        let template = PromptTemplate::new(CORRECTION_PROMPT_TEMPLATE, CORRECTION_PLACEHOLDERS);
        template
            .render(&[
                ("instructions", &instructions),
                ("completion", completion),
                ("error", error),
            ])
            // The built-in template always carries its placeholders
            .unwrap_or_else(|_| format!("{}\n\nError: {}", completion, error))
    }
}

/// A parser resolved for use by one chain instance.
///
/// The `auto_fix` capability flag is inspected exactly once, here, instead
/// of per call.
pub enum ResolvedParser {
    /// The bare parser; failures fall through to raw text.
    Plain(Arc<dyn OutputParser>),
    /// Wrapped with model-driven correction.
    SelfCorrecting(SelfCorrectingParser),
}

impl ResolvedParser {
    /// Inspect the parser's capability flag and wrap it if requested.
    pub fn resolve(parser: Arc<dyn OutputParser>, model: Arc<dyn LanguageModel>) -> Self {
        if parser.auto_fix() {
            ResolvedParser::SelfCorrecting(SelfCorrectingParser::new(parser, model))
        } else {
            ResolvedParser::Plain(parser)
        }
    }

    /// Whether resolution chose the self-correcting path.
    pub fn is_self_correcting(&self) -> bool {
        matches!(self, ResolvedParser::SelfCorrecting(_))
    }

    /// Parse the answer text.
    pub async fn parse(&self, text: &str) -> Result<Value, ParseError> {
        match self {
            ResolvedParser::Plain(parser) => parser.parse(text),
            ResolvedParser::SelfCorrecting(parser) => parser.parse(text).await,
        }
    }
}
