//! The two-phase API chain orchestrator.
//!
//! [`ApiChain`] owns the full sequence for one question: render the URL
//! prompt, invoke the model, issue the HTTP GET, render the answer prompt,
//! invoke the model again, and optionally run the output parser. Build one
//! chain per configuration with [`ApiChain::builder`]; each
//! [`run`](ApiChain::run) executes the sequence against that fixed
//! configuration.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::{ApiChainError, Result};
use crate::events::{Event, Phase, ProgressSink, SinkSet};
use crate::headers;
use crate::model::LanguageModel;
use crate::output_parser::{OutputParser, ResolvedParser};
use crate::prompt::PromptTemplate;
use crate::sanitize::clean_url;
use crate::sinks::{LogSink, RelayMessage, StreamRelay};

/// Whether verbose request/response logging is enabled process-wide.
fn debug_enabled() -> bool {
    std::env::var("DEBUG").map(|v| v == "true").unwrap_or(false)
}

/// Result of one chain run.
///
/// `answer` is the final answer: the raw model text, or the parser's value,
/// or — when the parser produced an object exposing a `json` field — that
/// field's value. The intermediate artifacts are kept for auditing and the
/// whole record serializes for audit logs.
#[derive(Debug, Clone, Serialize)]
pub struct ApiChainOutput {
    /// The final answer.
    pub answer: Value,
    /// The URL the model synthesized (after cleanup).
    pub api_url: String,
    /// The raw HTTP response body.
    pub api_response: String,
    /// The raw answer-synthesis model text, before any parsing.
    pub raw_answer: String,
}

impl ApiChainOutput {
    /// The answer as display text.
    pub fn answer_text(&self) -> String {
        match &self.answer {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// A reusable two-phase API invocation pipeline.
///
/// Immutable after build, apart from the one-time parser resolution.
/// Concurrent runs against one chain are independent.
///
/// # Example
///
/// ```no_run
/// use api_chain::{ApiChain, MockModel};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let model = Arc::new(MockModel::new(vec![
///     "https://api.example.com/weather?city=Paris".into(),
///     "It is 5°C in Paris.".into(),
/// ]));
/// let chain = ApiChain::builder(model)
///     .api_docs("Open weather API. GET /weather?city=<name> returns {\"temp\": <celsius>}.")
///     .build()?;
///
/// let output = chain.run("What is the temperature in Paris?").await?;
/// println!("{}", output.answer_text());
/// # Ok(())
/// # }
/// ```
pub struct ApiChain {
    model: Arc<dyn LanguageModel>,
    api_docs: String,
    url_prompt: PromptTemplate,
    answer_prompt: PromptTemplate,
    headers: HashMap<String, String>,
    client: Client,
    parser: Option<Arc<dyn OutputParser>>,
    resolved: OnceLock<ResolvedParser>,
    sinks: SinkSet,
    cancellation: Option<Arc<AtomicBool>>,
    streaming: bool,
}

impl ApiChain {
    /// Create a new builder around a model handle.
    pub fn builder(model: Arc<dyn LanguageModel>) -> ApiChainBuilder {
        ApiChainBuilder {
            model,
            api_docs: None,
            url_prompt: None,
            answer_prompt: None,
            headers: HeaderSource::Absent,
            parser: None,
            extra_sinks: Vec::new(),
            cancellation: None,
            streaming: false,
            client: None,
            timeout: None,
        }
    }

    /// Execute the full two-phase sequence for one question.
    pub async fn run(&self, question: &str) -> Result<ApiChainOutput> {
        self.check_cancelled()?;

        // Render the URL-synthesis prompt
        self.sinks.emit(Event::PhaseStart {
            phase: Phase::RenderUrlPrompt,
        });
        let url_prompt = self
            .url_prompt
            .render(&[("api_docs", self.api_docs.as_str()), ("question", question)])
            .map_err(|e| self.fail(Phase::RenderUrlPrompt, e))?;
        self.sinks.emit(Event::PhaseEnd {
            phase: Phase::RenderUrlPrompt,
            ok: true,
        });

        // First model invocation: synthesize the request URL
        self.sinks.emit(Event::PhaseStart {
            phase: Phase::SynthesizeUrl,
        });
        let url_text = self
            .invoke_model(Phase::SynthesizeUrl, &url_prompt)
            .await
            .map_err(|e| self.fail(Phase::SynthesizeUrl, e))?;
        let api_url = clean_url(&url_text);
        self.sinks.emit(Event::PhaseEnd {
            phase: Phase::SynthesizeUrl,
            ok: true,
        });

        self.check_cancelled()?;

        // The HTTP GET against the synthesized URL
        self.sinks.emit(Event::PhaseStart {
            phase: Phase::CallApi,
        });
        let api_response = self
            .call_api(&api_url)
            .await
            .map_err(|e| self.fail(Phase::CallApi, e))?;
        self.sinks.emit(Event::PhaseEnd {
            phase: Phase::CallApi,
            ok: true,
        });

        // Render the answer-synthesis prompt
        self.sinks.emit(Event::PhaseStart {
            phase: Phase::RenderAnswerPrompt,
        });
        let answer_prompt = self
            .answer_prompt
            .render(&[
                ("api_docs", self.api_docs.as_str()),
                ("api_url", api_url.as_str()),
                ("api_response", api_response.as_str()),
                ("question", question),
            ])
            .map_err(|e| self.fail(Phase::RenderAnswerPrompt, e))?;
        self.sinks.emit(Event::PhaseEnd {
            phase: Phase::RenderAnswerPrompt,
            ok: true,
        });

        self.check_cancelled()?;

        // Second model invocation: synthesize the answer
        self.sinks.emit(Event::PhaseStart {
            phase: Phase::SynthesizeAnswer,
        });
        let raw_answer = self
            .invoke_model(Phase::SynthesizeAnswer, &answer_prompt)
            .await
            .map_err(|e| self.fail(Phase::SynthesizeAnswer, e))?;
        self.sinks.emit(Event::PhaseEnd {
            phase: Phase::SynthesizeAnswer,
            ok: true,
        });

        // Optional structured parsing; failure falls back to raw text
        let answer = match self.resolved_parser() {
            Some(parser) => {
                self.sinks.emit(Event::PhaseStart {
                    phase: Phase::ParseOutput,
                });
                match parser.parse(&raw_answer).await {
                    Ok(value) => {
                        self.sinks.emit(Event::PhaseEnd {
                            phase: Phase::ParseOutput,
                            ok: true,
                        });
                        unwrap_json_field(value)
                    }
                    Err(e) => {
                        log::warn!("output parsing failed, returning raw text: {}", e);
                        self.sinks.emit(Event::PhaseEnd {
                            phase: Phase::ParseOutput,
                            ok: false,
                        });
                        Value::String(raw_answer.clone())
                    }
                }
            }
            None => Value::String(raw_answer.clone()),
        };

        let output = ApiChainOutput {
            answer,
            api_url,
            api_response,
            raw_answer,
        };
        self.sinks.emit(Event::Finished {
            answer: output.answer_text(),
        });
        Ok(output)
    }

    /// The resolved parser, wrapping on first use only.
    ///
    /// `OnceLock` guarantees a single resolution even under concurrent
    /// first runs; the originally supplied parser wins for the lifetime of
    /// this chain instance.
    fn resolved_parser(&self) -> Option<&ResolvedParser> {
        let parser = self.parser.as_ref()?;
        Some(
            self.resolved
                .get_or_init(|| ResolvedParser::resolve(parser.clone(), self.model.clone())),
        )
    }

    async fn invoke_model(&self, phase: Phase, prompt: &str) -> Result<String> {
        if debug_enabled() {
            log::debug!("[{}] prompt: {}", phase.as_str(), prompt);
        }
        let result = if self.streaming {
            let sinks = self.sinks.clone();
            let mut on_token = move |chunk: String| sinks.emit(Event::Token { phase, chunk });
            self.model.complete_streaming(prompt, &mut on_token).await
        } else {
            self.model.complete(prompt).await
        };
        match result {
            Ok(response) => {
                if debug_enabled() {
                    log::debug!("[{}] response: {}", phase.as_str(), response.text);
                }
                Ok(response.text)
            }
            Err(e @ (ApiChainError::Cancelled | ApiChainError::Model(_))) => Err(e),
            Err(e) => Err(ApiChainError::Model(e.to_string())),
        }
    }

    async fn call_api(&self, url: &str) -> Result<String> {
        let mut request = self.client.get(url);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }
        if debug_enabled() {
            log::debug!("GET {} headers={:?}", url, self.headers);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if debug_enabled() {
            log::debug!("GET {} -> {} body={}", url, status, body);
        }

        if !status.is_success() {
            return Err(ApiChainError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    fn fail(&self, phase: Phase, err: ApiChainError) -> ApiChainError {
        self.sinks.emit(Event::PhaseEnd { phase, ok: false });
        self.sinks.emit(Event::Errored {
            phase,
            message: err.to_string(),
        });
        err
    }

    fn check_cancelled(&self) -> Result<()> {
        let cancelled = self
            .cancellation
            .as_ref()
            .is_some_and(|c| c.load(Ordering::Relaxed));
        if cancelled {
            return Err(ApiChainError::Cancelled);
        }
        Ok(())
    }
}

impl std::fmt::Debug for ApiChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiChain")
            .field("model", &self.model.name())
            .field("headers", &self.headers.len())
            .field("has_parser", &self.parser.is_some())
            .field("sinks", &self.sinks.len())
            .field("streaming", &self.streaming)
            .finish()
    }
}

/// The parser result's `json` field wins when the carrier exposes one;
/// any other shape is returned verbatim.
fn unwrap_json_field(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("json") => map.remove("json").unwrap(),
        other => other,
    }
}

enum HeaderSource {
    Absent,
    Map(HashMap<String, String>),
    Json(String),
    Value(Value),
}

/// Builder for [`ApiChain`].
pub struct ApiChainBuilder {
    model: Arc<dyn LanguageModel>,
    api_docs: Option<String>,
    url_prompt: Option<String>,
    answer_prompt: Option<String>,
    headers: HeaderSource,
    parser: Option<Arc<dyn OutputParser>>,
    extra_sinks: Vec<Arc<dyn ProgressSink>>,
    cancellation: Option<Arc<AtomicBool>>,
    streaming: bool,
    client: Option<Client>,
    timeout: Option<Duration>,
}

impl ApiChainBuilder {
    /// Set the API documentation text (required).
    pub fn api_docs(mut self, docs: impl Into<String>) -> Self {
        self.api_docs = Some(docs.into());
        self
    }

    /// Override the URL-synthesis prompt.
    ///
    /// Must contain `{api_docs}` and `{question}`; a missing placeholder
    /// surfaces as a template error on the next run.
    pub fn url_prompt(mut self, template: impl Into<String>) -> Self {
        self.url_prompt = Some(template.into());
        self
    }

    /// Override the answer-synthesis prompt.
    ///
    /// Must contain `{api_response}`, `{api_url}`, and `{question}`.
    pub fn answer_prompt(mut self, template: impl Into<String>) -> Self {
        self.answer_prompt = Some(template.into());
        self
    }

    /// Set headers from a ready key-value map.
    pub fn headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = HeaderSource::Map(headers);
        self
    }

    /// Set headers from a JSON-encoded string (e.g. from a config field).
    pub fn headers_json(mut self, json: impl Into<String>) -> Self {
        self.headers = HeaderSource::Json(json.into());
        self
    }

    /// Set headers from a JSON value (object, string, or null).
    pub fn headers_value(mut self, value: Value) -> Self {
        self.headers = HeaderSource::Value(value);
        self
    }

    /// Set the output parser.
    pub fn parser(mut self, parser: Arc<dyn OutputParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Register an additional progress sink. A [`LogSink`] is always present.
    pub fn sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.extra_sinks.push(sink);
        self
    }

    /// Relay streamed tokens to a client channel for `session_id`.
    ///
    /// Registers a [`StreamRelay`] and enables streaming.
    pub fn stream_to(
        mut self,
        tx: UnboundedSender<RelayMessage>,
        session_id: impl Into<String>,
    ) -> Self {
        self.extra_sinks.push(Arc::new(StreamRelay::new(tx, session_id)));
        self.streaming = true;
        self
    }

    /// Enable or disable streaming model invocations.
    pub fn streaming(mut self, enabled: bool) -> Self {
        self.streaming = enabled;
        self
    }

    /// Set the cancellation flag, checked before each suspend point.
    pub fn cancellation(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancellation = Some(cancel);
        self
    }

    /// Use a custom HTTP client. Overrides [`timeout`](Self::timeout).
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the HTTP request timeout. Default: 60 seconds.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the chain.
    pub fn build(self) -> Result<ApiChain> {
        let api_docs = match self.api_docs {
            Some(docs) if !docs.trim().is_empty() => docs,
            _ => {
                return Err(ApiChainError::InvalidConfig(
                    "api_docs is required".to_string(),
                ))
            }
        };

        let headers = match self.headers {
            HeaderSource::Absent => HashMap::new(),
            HeaderSource::Map(map) => map,
            HeaderSource::Json(json) => headers::parse_headers_str(&json)?,
            HeaderSource::Value(value) => headers::parse_headers(&value)?,
        };

        let url_prompt = match self.url_prompt {
            Some(template) => PromptTemplate::new(template, crate::prompt::URL_PLACEHOLDERS),
            None => PromptTemplate::url_default(),
        };
        let answer_prompt = match self.answer_prompt {
            Some(template) => PromptTemplate::new(template, crate::prompt::ANSWER_PLACEHOLDERS),
            None => PromptTemplate::answer_default(),
        };

        let timeout = self.timeout.unwrap_or(Duration::from_secs(60));
        let client = match self.client {
            Some(client) => client,
            None => Client::builder()
                .timeout(timeout)
                .build()
                .map_err(ApiChainError::Request)?,
        };

        let mut sinks = SinkSet::new();
        sinks.push(Arc::new(LogSink));
        for sink in self.extra_sinks {
            sinks.push(sink);
        }

        Ok(ApiChain {
            model: self.model,
            api_docs,
            url_prompt,
            answer_prompt,
            headers,
            client,
            parser: self.parser,
            resolved: OnceLock::new(),
            sinks,
            cancellation: self.cancellation,
            streaming: self.streaming,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::FnSink;
    use crate::model::{MockModel, ModelResponse};
    use crate::output_parser::ParseError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    const WEATHER_DOCS: &str =
        "Open weather API. GET /weather?city=<name> returns {\"temp\": <celsius>}.";

    fn init_logs() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn weather_model(server_url: &str) -> Arc<MockModel> {
        Arc::new(MockModel::new(vec![
            format!("{}/weather?city=Paris", server_url),
            "It is 5°C in Paris.".to_string(),
        ]))
    }

    /// Parser that always rejects, optionally flagged auto-fix;
    /// counts both parse calls and auto_fix inspections.
    struct RejectingParser {
        auto_fix: bool,
        parse_calls: AtomicUsize,
        flag_checks: AtomicUsize,
    }

    impl RejectingParser {
        fn new(auto_fix: bool) -> Self {
            Self {
                auto_fix,
                parse_calls: AtomicUsize::new(0),
                flag_checks: AtomicUsize::new(0),
            }
        }
    }

    impl OutputParser for RejectingParser {
        fn parse(&self, text: &str) -> std::result::Result<Value, ParseError> {
            self.parse_calls.fetch_add(1, Ordering::Relaxed);
            Err(ParseError::Unparseable {
                expected_format: "anything else",
                text: text.to_string(),
            })
        }

        fn auto_fix(&self) -> bool {
            self.flag_checks.fetch_add(1, Ordering::Relaxed);
            self.auto_fix
        }
    }

    /// Parser returning a fixed value.
    struct FixedParser(Value);

    impl OutputParser for FixedParser {
        fn parse(&self, _text: &str) -> std::result::Result<Value, ParseError> {
            Ok(self.0.clone())
        }
    }

    /// Model that always fails.
    struct FailingModel;

    #[async_trait]
    impl LanguageModel for FailingModel {
        async fn complete(&self, _prompt: &str) -> Result<ModelResponse> {
            Err(ApiChainError::Model("provider unreachable".into()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn end_to_end_weather() {
        init_logs();
        let mut server = mockito::Server::new_async().await;
        let api = server
            .mock("GET", "/weather?city=Paris")
            .with_body(r#"{"temp":5}"#)
            .create_async()
            .await;

        let model = weather_model(&server.url());
        let chain = ApiChain::builder(model.clone())
            .api_docs(WEATHER_DOCS)
            .build()
            .unwrap();

        let output = chain
            .run("What is the temperature in Paris?")
            .await
            .unwrap();

        api.assert_async().await;
        assert_eq!(output.answer_text(), "It is 5°C in Paris.");
        assert_eq!(output.api_response, r#"{"temp":5}"#);
        assert!(output.api_url.ends_with("/weather?city=Paris"));
        assert_eq!(model.calls(), 2);

        // The URL prompt carried the docs and question verbatim
        let prompts = model.prompts();
        assert!(prompts[0].contains(WEATHER_DOCS));
        assert!(prompts[0].contains("What is the temperature in Paris?"));
        // The answer prompt carried the response and URL
        assert!(prompts[1].contains(r#"{"temp":5}"#));
        assert!(prompts[1].contains("/weather?city=Paris"));
    }

    #[tokio::test]
    async fn output_serializes_for_audit() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/weather?city=Paris")
            .with_body(r#"{"temp":5}"#)
            .create_async()
            .await;

        let chain = ApiChain::builder(weather_model(&server.url()))
            .api_docs(WEATHER_DOCS)
            .build()
            .unwrap();

        let output = chain.run("temperature in Paris").await.unwrap();
        let record = serde_json::to_value(&output).unwrap();
        assert_eq!(record["answer"], "It is 5°C in Paris.");
        assert_eq!(record["api_response"], r#"{"temp":5}"#);
        assert!(record["api_url"].as_str().unwrap().ends_with("city=Paris"));
    }

    #[tokio::test]
    async fn response_body_placeholders_stay_literal() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/weather?city=Paris")
            .with_body(r#"{"note":"render {question} here"}"#)
            .create_async()
            .await;

        let model = weather_model(&server.url());
        let chain = ApiChain::builder(model.clone())
            .api_docs(WEATHER_DOCS)
            .build()
            .unwrap();

        chain.run("temperature in Paris").await.unwrap();

        // The body's literal token survived; the question was not
        // substituted into it
        let prompts = model.prompts();
        assert!(prompts[1].contains(r#"{"note":"render {question} here"}"#));
    }

    #[tokio::test]
    async fn deterministic_across_runs() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/weather?city=Paris")
            .with_body(r#"{"temp":5}"#)
            .expect(2)
            .create_async()
            .await;

        let chain = ApiChain::builder(weather_model(&server.url()))
            .api_docs(WEATHER_DOCS)
            .build()
            .unwrap();

        let first = chain.run("temperature in Paris").await.unwrap();
        let second = chain.run("temperature in Paris").await.unwrap();
        assert_eq!(first.answer_text(), second.answer_text());
        assert_eq!(first.api_url, second.api_url);
    }

    #[tokio::test]
    async fn headers_string_is_sent() {
        let mut server = mockito::Server::new_async().await;
        let api = server
            .mock("GET", "/weather?city=Paris")
            .match_header("Authorization", "Bearer x")
            .with_body(r#"{"temp":5}"#)
            .create_async()
            .await;

        let chain = ApiChain::builder(weather_model(&server.url()))
            .api_docs(WEATHER_DOCS)
            .headers_json(r#"{"Authorization":"Bearer x"}"#)
            .build()
            .unwrap();

        chain.run("temperature in Paris").await.unwrap();
        api.assert_async().await;
    }

    #[tokio::test]
    async fn absent_headers_send_nothing_custom() {
        let mut server = mockito::Server::new_async().await;
        let api = server
            .mock("GET", "/weather?city=Paris")
            .match_header("Authorization", mockito::Matcher::Missing)
            .with_body(r#"{"temp":5}"#)
            .create_async()
            .await;

        let chain = ApiChain::builder(weather_model(&server.url()))
            .api_docs(WEATHER_DOCS)
            .build()
            .unwrap();

        chain.run("temperature in Paris").await.unwrap();
        api.assert_async().await;
    }

    #[tokio::test]
    async fn malformed_headers_fail_at_build() {
        let model = Arc::new(MockModel::fixed("unused"));
        let result = ApiChain::builder(model)
            .api_docs(WEATHER_DOCS)
            .headers_json("{broken")
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn parser_failure_falls_back_to_raw_text() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/weather?city=Paris")
            .with_body(r#"{"temp":5}"#)
            .create_async()
            .await;

        let parser = Arc::new(RejectingParser::new(false));
        let parse_events = Arc::new(Mutex::new(Vec::new()));
        let parse_events_clone = parse_events.clone();

        let chain = ApiChain::builder(weather_model(&server.url()))
            .api_docs(WEATHER_DOCS)
            .parser(parser.clone())
            .sink(Arc::new(FnSink(move |event: &Event| {
                if let Event::PhaseEnd {
                    phase: Phase::ParseOutput,
                    ok,
                } = event
                {
                    parse_events_clone.lock().unwrap().push(*ok);
                }
            })))
            .build()
            .unwrap();

        let output = chain.run("temperature in Paris").await.unwrap();

        // Best effort: raw text, not an error
        assert_eq!(output.answer, Value::String("It is 5°C in Paris.".into()));
        assert_eq!(parser.parse_calls.load(Ordering::Relaxed), 1);
        // The failure was observable
        assert_eq!(*parse_events.lock().unwrap(), vec![false]);
    }

    #[tokio::test]
    async fn auto_fix_parser_wrapped_once_across_runs() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/weather?city=Paris")
            .with_body(r#"{"temp":5}"#)
            .expect(2)
            .create_async()
            .await;

        let parser = Arc::new(RejectingParser::new(true));
        let chain = ApiChain::builder(weather_model(&server.url()))
            .api_docs(WEATHER_DOCS)
            .parser(parser.clone())
            .build()
            .unwrap();

        chain.run("temperature in Paris").await.unwrap();
        chain.run("temperature in Paris").await.unwrap();

        // The capability flag was inspected exactly once: resolution is
        // cached on the chain, not repeated per run
        assert_eq!(parser.flag_checks.load(Ordering::Relaxed), 1);
        // The self-correcting wrapper ran: the rejecting parser saw the
        // initial text plus each corrected completion, per run
        assert_eq!(parser.parse_calls.load(Ordering::Relaxed), 6);
    }

    #[tokio::test]
    async fn concurrent_first_runs_resolve_parser_once() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/weather?city=Paris")
            .with_body(r#"{"temp":5}"#)
            .expect(2)
            .create_async()
            .await;

        // A fixed response keeps both interleaved runs pointed at the mock
        let model = Arc::new(MockModel::fixed(format!(
            "{}/weather?city=Paris",
            server.url()
        )));
        let parser = Arc::new(RejectingParser::new(true));
        let chain = ApiChain::builder(model)
            .api_docs(WEATHER_DOCS)
            .parser(parser.clone())
            .build()
            .unwrap();

        let (first, second) = tokio::join!(
            chain.run("temperature in Paris"),
            chain.run("temperature in Paris"),
        );
        first.unwrap();
        second.unwrap();

        // Both runs raced the first resolution; the capability flag was
        // still read exactly once
        assert_eq!(parser.flag_checks.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn json_field_is_unwrapped() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/weather?city=Paris")
            .with_body(r#"{"temp":5}"#)
            .create_async()
            .await;

        let parser = Arc::new(FixedParser(json!({"json": {"temp": 5}, "raw": "..."})));
        let chain = ApiChain::builder(weather_model(&server.url()))
            .api_docs(WEATHER_DOCS)
            .parser(parser)
            .build()
            .unwrap();

        let output = chain.run("temperature in Paris").await.unwrap();
        assert_eq!(output.answer, json!({"temp": 5}));
    }

    #[tokio::test]
    async fn other_object_shapes_returned_verbatim() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/weather?city=Paris")
            .with_body(r#"{"temp":5}"#)
            .create_async()
            .await;

        let parser = Arc::new(FixedParser(json!({"summary": "cold", "temp": 5})));
        let chain = ApiChain::builder(weather_model(&server.url()))
            .api_docs(WEATHER_DOCS)
            .parser(parser)
            .build()
            .unwrap();

        let output = chain.run("temperature in Paris").await.unwrap();
        assert_eq!(output.answer, json!({"summary": "cold", "temp": 5}));
    }

    #[tokio::test]
    async fn model_failure_aborts_before_http() {
        let mut server = mockito::Server::new_async().await;
        let api = server
            .mock("GET", mockito::Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let chain = ApiChain::builder(Arc::new(FailingModel))
            .api_docs(WEATHER_DOCS)
            .build()
            .unwrap();

        let err = chain.run("temperature in Paris").await.unwrap_err();
        assert!(matches!(err, ApiChainError::Model(_)));
        api.assert_async().await;
    }

    #[tokio::test]
    async fn http_error_aborts_run() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/weather?city=Paris")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let model = weather_model(&server.url());
        let errors = Arc::new(Mutex::new(Vec::new()));
        let errors_clone = errors.clone();

        let chain = ApiChain::builder(model.clone())
            .api_docs(WEATHER_DOCS)
            .sink(Arc::new(FnSink(move |event: &Event| {
                if let Event::Errored { phase, .. } = event {
                    errors_clone.lock().unwrap().push(*phase);
                }
            })))
            .build()
            .unwrap();

        let err = chain.run("temperature in Paris").await.unwrap_err();
        assert!(matches!(err, ApiChainError::Http { status: 500, .. }));
        // No fallback answer: the second model call never happened
        assert_eq!(model.calls(), 1);
        assert_eq!(*errors.lock().unwrap(), vec![Phase::CallApi]);
    }

    #[tokio::test]
    async fn url_override_missing_placeholder_fails_at_run() {
        let chain = ApiChain::builder(Arc::new(MockModel::fixed("unused")))
            .api_docs(WEATHER_DOCS)
            .url_prompt("No placeholders at all")
            .build()
            .unwrap();

        let err = chain.run("q").await.unwrap_err();
        assert!(matches!(err, ApiChainError::Template { .. }));
    }

    #[tokio::test]
    async fn answer_override_missing_placeholder_fails_at_run() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/weather?city=Paris")
            .with_body(r#"{"temp":5}"#)
            .create_async()
            .await;

        let chain = ApiChain::builder(weather_model(&server.url()))
            .api_docs(WEATHER_DOCS)
            .answer_prompt("Only {question} here")
            .build()
            .unwrap();

        let err = chain.run("temperature in Paris").await.unwrap_err();
        assert!(matches!(
            err,
            ApiChainError::Template {
                placeholder: "api_response"
            }
        ));
    }

    #[tokio::test]
    async fn cancellation_stops_the_run() {
        let cancel = Arc::new(AtomicBool::new(true));
        let chain = ApiChain::builder(Arc::new(MockModel::fixed("unused")))
            .api_docs(WEATHER_DOCS)
            .cancellation(cancel)
            .build()
            .unwrap();

        let err = chain.run("q").await.unwrap_err();
        assert!(matches!(err, ApiChainError::Cancelled));
    }

    #[tokio::test]
    async fn missing_api_docs_fails_at_build() {
        let result = ApiChain::builder(Arc::new(MockModel::fixed("x"))).build();
        assert!(matches!(result, Err(ApiChainError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn quoted_url_is_cleaned_before_the_call() {
        let mut server = mockito::Server::new_async().await;
        let api = server
            .mock("GET", "/weather?city=Paris")
            .with_body(r#"{"temp":5}"#)
            .create_async()
            .await;

        let model = Arc::new(MockModel::new(vec![
            format!("\"{}/weather?city=Paris\"\n", server.url()),
            "It is 5°C in Paris.".to_string(),
        ]));
        let chain = ApiChain::builder(model)
            .api_docs(WEATHER_DOCS)
            .build()
            .unwrap();

        let output = chain.run("temperature in Paris").await.unwrap();
        api.assert_async().await;
        assert!(!output.api_url.contains('"'));
    }

    #[tokio::test]
    async fn streaming_relays_tokens_to_channel() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/weather?city=Paris")
            .with_body(r#"{"temp":5}"#)
            .create_async()
            .await;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let chain = ApiChain::builder(weather_model(&server.url()))
            .api_docs(WEATHER_DOCS)
            .stream_to(tx, "session-42")
            .build()
            .unwrap();

        chain.run("temperature in Paris").await.unwrap();

        let mut messages = Vec::new();
        while let Ok(m) = rx.try_recv() {
            messages.push(m);
        }
        assert!(matches!(messages.first(), Some(RelayMessage::Start { session_id }) if session_id == "session-42"));
        assert!(messages.iter().any(
            |m| matches!(m, RelayMessage::Chunk { text, .. } if text.contains("It is 5°C in Paris."))
        ));
        assert!(matches!(messages.last(), Some(RelayMessage::End { .. })));
    }

    #[test]
    fn unwrap_json_field_cases() {
        assert_eq!(
            unwrap_json_field(json!({"json": {"temp": 5}, "raw": "..."})),
            json!({"temp": 5})
        );
        assert_eq!(unwrap_json_field(json!({"a": 1})), json!({"a": 1}));
        assert_eq!(unwrap_json_field(json!("text")), json!("text"));
    }
}
