use thiserror::Error;

/// Errors produced by the chain and its components.
#[derive(Error, Debug)]
pub enum ApiChainError {
    /// A prompt template is missing a placeholder the phase requires.
    #[error("prompt template is missing required placeholder '{{{placeholder}}}'")]
    Template {
        /// The placeholder name that was expected (without braces).
        placeholder: &'static str,
    },

    /// A language model invocation failed (either synthesis phase).
    #[error("model invocation failed: {0}")]
    Model(String),

    /// Low-level HTTP transport failure (connection refused, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The synthesized URL returned a non-success status code.
    #[error("HTTP {status} from API: {body}")]
    Http {
        /// HTTP status code (e.g. 404, 500).
        status: u16,
        /// Response body text, for diagnostics.
        body: String,
    },

    /// JSON decoding failed at the serde level (e.g. a headers string).
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration detected at build time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The run was cancelled via the cancellation flag.
    #[error("chain run was cancelled")]
    Cancelled,

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for ApiChainError {
    fn from(err: anyhow::Error) -> Self {
        ApiChainError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ApiChainError>;
