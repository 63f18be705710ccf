//! Prompt templates for the two synthesis phases.
//!
//! A [`PromptTemplate`] is a plain string with `{key}` placeholders plus the
//! list of placeholders its phase requires. Rendering is a pure substitution;
//! a template that lacks a required placeholder fails loudly at render time
//! rather than silently dropping the value.

use crate::error::{ApiChainError, Result};

/// Default prompt for the URL-synthesis phase.
pub const API_URL_PROMPT_TEMPLATE: &str = "You are given the below API Documentation:
{api_docs}
Using this documentation, generate the full API url to call for answering the user question.
You should build the API url in order to get a response that is as short as possible, while still getting the necessary information to answer the question. Pay attention to deliberately exclude any unnecessary pieces of data in the API call.

Question:{question}
API url:";

/// Default prompt for the answer-synthesis phase.
pub const API_ANSWER_PROMPT_TEMPLATE: &str =
    "Given this {api_response} response for {api_url}. use the given response to answer this {question}";

/// Placeholders the URL-synthesis phase requires.
pub const URL_PLACEHOLDERS: &[&str] = &["api_docs", "question"];

/// Placeholders the answer-synthesis phase requires.
pub const ANSWER_PLACEHOLDERS: &[&str] = &["api_response", "api_url", "question"];

/// A prompt template with named `{key}` placeholders.
///
/// Use `{{` to insert a literal `{` and `}}` to insert a literal `}`.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
    required: &'static [&'static str],
}

impl PromptTemplate {
    /// Create a template with the given required placeholders.
    pub fn new(template: impl Into<String>, required: &'static [&'static str]) -> Self {
        Self {
            template: template.into(),
            required,
        }
    }

    /// The default URL-synthesis template.
    pub fn url_default() -> Self {
        Self::new(API_URL_PROMPT_TEMPLATE, URL_PLACEHOLDERS)
    }

    /// The default answer-synthesis template.
    pub fn answer_default() -> Self {
        Self::new(API_ANSWER_PROMPT_TEMPLATE, ANSWER_PLACEHOLDERS)
    }

    /// The raw template text.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// The placeholders this template's phase requires.
    pub fn required(&self) -> &'static [&'static str] {
        self.required
    }

    /// Check that every required placeholder appears in the template.
    ///
    /// A user-supplied override that drops a required placeholder would make
    /// the model behave unpredictably, so this is surfaced as a
    /// [`ApiChainError::Template`] instead.
    pub fn validate(&self) -> Result<()> {
        for placeholder in self.required {
            let token = format!("{{{}}}", placeholder);
            if !self.template.contains(&token) {
                return Err(ApiChainError::Template { placeholder });
            }
        }
        Ok(())
    }

    /// Render the template, substituting `{key}` placeholders with `vars`.
    ///
    /// Validates required placeholders first, then substitutes in a single
    /// left-to-right scan. Substituted values are emitted verbatim and never
    /// re-scanned, so a value that happens to contain a placeholder token
    /// (an HTTP body with a literal `{question}`, say) cannot pull another
    /// variable into the prompt. Placeholders not in `vars` and unpaired
    /// braces are left as literals.
    pub fn render(&self, vars: &[(&str, &str)]) -> Result<String> {
        self.validate()?;

        let mut rendered = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();

        while let Some(pos) = rest.find(['{', '}']) {
            rendered.push_str(&rest[..pos]);
            let tail = &rest[pos..];

            if let Some(after) = tail.strip_prefix("{{") {
                rendered.push('{');
                rest = after;
            } else if let Some(after) = tail.strip_prefix("}}") {
                rendered.push('}');
                rest = after;
            } else if tail.starts_with('{') {
                let substituted = tail.find('}').and_then(|close| {
                    let key = &tail[1..close];
                    vars.iter()
                        .find(|(k, _)| *k == key)
                        .map(|(_, value)| (value, close))
                });
                match substituted {
                    Some((value, close)) => {
                        rendered.push_str(value);
                        rest = &tail[close + 1..];
                    }
                    None => {
                        rendered.push('{');
                        rest = &tail[1..];
                    }
                }
            } else {
                rendered.push('}');
                rest = &tail[1..];
            }
        }
        rendered.push_str(rest);
        Ok(rendered)
    }
}
