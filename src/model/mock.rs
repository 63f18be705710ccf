//! Mock model for testing without a live provider.
//!
//! [`MockModel`] returns pre-configured responses in order, allowing
//! downstream consumers to write deterministic tests against this crate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{LanguageModel, ModelResponse};
use crate::error::Result;

/// A test model that returns canned responses in order.
///
/// Cycles back to the beginning when all responses have been consumed.
/// Records every prompt it receives so tests can assert on what the
/// chain actually sent. For streaming, emits the entire response as a
/// single token.
#[derive(Debug)]
pub struct MockModel {
    responses: Vec<String>,
    index: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockModel {
    /// Create a mock model with the given canned responses.
    ///
    /// Responses are returned in order. When exhausted, cycles from the beginning.
    pub fn new(responses: Vec<String>) -> Self {
        assert!(
            !responses.is_empty(),
            "MockModel requires at least one response"
        );
        Self {
            responses,
            index: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock that always returns the same response.
    pub fn fixed(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }

    /// Number of completions served so far.
    pub fn calls(&self) -> usize {
        self.index.load(Ordering::Relaxed)
    }

    /// Every prompt received, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    fn next_response(&self, prompt: &str) -> String {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let idx = self.index.fetch_add(1, Ordering::Relaxed) % self.responses.len();
        self.responses[idx].clone()
    }
}

#[async_trait]
impl LanguageModel for MockModel {
    async fn complete(&self, prompt: &str) -> Result<ModelResponse> {
        Ok(ModelResponse::text(self.next_response(prompt)))
    }

    async fn complete_streaming(
        &self,
        prompt: &str,
        on_token: &mut (dyn FnMut(String) + Send),
    ) -> Result<ModelResponse> {
        let text = self.next_response(prompt);
        on_token(text.clone());
        Ok(ModelResponse::text(text))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
