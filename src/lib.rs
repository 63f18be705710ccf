//! # API Chain
//!
//! LLM-mediated HTTP API invocation: ask a question in natural language,
//! get an answer grounded in a live API response.
//!
//! The chain runs a fixed two-phase sequence. First the model reads the
//! API's documentation and synthesizes the exact GET URL that answers the
//! question; the chain issues that request. Then the model reads the raw
//! response and synthesizes a natural-language answer, optionally
//! post-processed by an output parser.
//!
//! ## Core Concepts
//!
//! - **[`ApiChain`]** — the orchestrator. Built once per API configuration,
//!   reusable across questions and concurrent runs.
//! - **[`LanguageModel`]** — object-safe provider abstraction; both
//!   synthesis phases go through it. [`MockModel`] ships for tests.
//! - **[`OutputParser`]** — optional structuring of the final answer, with
//!   opt-in LLM-driven self-correction on parse failure. Parse failures
//!   never fail the run; the raw answer text is the fallback.
//! - **[`ProgressSink`]** — observer fan-out for phase transitions,
//!   streamed tokens, and the final result. A console [`LogSink`] is always
//!   registered; a [`StreamRelay`] forwards tokens to a client channel.
//!
//! ## Quick Start
//!
//! ```no_run
//! use api_chain::{ApiChain, MockModel};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let model = Arc::new(MockModel::new(vec![
//!         "https://api.example.com/weather?city=Paris".into(),
//!         "It is 5°C in Paris.".into(),
//!     ]));
//!
//!     let chain = ApiChain::builder(model)
//!         .api_docs("GET /weather?city=<name> returns {\"temp\": <celsius>}.")
//!         .build()?;
//!
//!     let output = chain.run("What is the temperature in Paris?").await?;
//!     println!("{}", output.answer_text());
//!     Ok(())
//! }
//! ```
//!
//! ## Structured Answers
//!
//! ```no_run
//! use api_chain::{ApiChain, JsonParser, MockModel};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let model = Arc::new(MockModel::fixed("{}"));
//! let chain = ApiChain::builder(model)
//!     .api_docs("...")
//!     .parser(Arc::new(JsonParser::new().with_auto_fix()))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

pub mod chain;
pub mod error;
pub mod events;
pub mod headers;
pub mod model;
pub mod output_parser;
pub mod prompt;
pub mod sanitize;
pub mod sinks;

pub use chain::{ApiChain, ApiChainBuilder, ApiChainOutput};
pub use error::{ApiChainError, Result};
pub use events::{Event, FnSink, Phase, ProgressSink, SinkSet};
pub use model::{LanguageModel, MockModel, ModelResponse};
pub use output_parser::{JsonParser, OutputParser, ParseError, SelfCorrectingParser};
pub use prompt::{PromptTemplate, API_ANSWER_PROMPT_TEMPLATE, API_URL_PROMPT_TEMPLATE};
pub use sinks::{LogSink, RelayMessage, StreamRelay};
