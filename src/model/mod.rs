//! Language model abstraction.
//!
//! The chain treats the model as an opaque capability: given a prompt,
//! produce text, optionally streaming tokens as they arrive. Wire up any
//! provider by implementing [`LanguageModel`]; the chain itself never
//! speaks a provider protocol.

pub mod mock;

pub use mock::MockModel;

use crate::error::Result;
use async_trait::async_trait;

/// A completed model invocation.
#[derive(Debug)]
pub struct ModelResponse {
    /// The generated text.
    pub text: String,
    /// Provider-specific metadata (token counts, timing, model info).
    /// Stored as raw JSON — each provider returns different fields.
    pub metadata: Option<serde_json::Value>,
}

impl ModelResponse {
    /// A bare text response with no metadata.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: None,
        }
    }
}

/// Abstraction over language model providers.
///
/// Both synthesis phases go through this trait. It is object-safe and
/// designed to be shared as `Arc<dyn LanguageModel>`.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Execute a non-streaming completion.
    async fn complete(&self, prompt: &str) -> Result<ModelResponse>;

    /// Execute a streaming completion.
    ///
    /// `on_token` is called for each token as it arrives. The final
    /// accumulated text is returned as a [`ModelResponse`]. The default
    /// implementation falls back to [`complete`](Self::complete) and emits
    /// the whole text as a single token, for providers without streaming.
    async fn complete_streaming(
        &self,
        prompt: &str,
        on_token: &mut (dyn FnMut(String) + Send),
    ) -> Result<ModelResponse> {
        let response = self.complete(prompt).await?;
        on_token(response.text.clone());
        Ok(response)
    }

    /// Human-readable name for logging and diagnostics.
    fn name(&self) -> &'static str;
}
