//! Progress events and observer fan-out.
//!
//! The chain broadcasts structured progress events to zero or more
//! registered [`ProgressSink`]s: phase transitions, streamed tokens, the
//! final result, and errors. Sinks never alter the run's outcome — a
//! panicking sink is isolated and the remaining sinks still fire.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// The steps of one chain run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Rendering the URL-synthesis prompt.
    RenderUrlPrompt,
    /// First model invocation (URL synthesis).
    SynthesizeUrl,
    /// The HTTP GET against the synthesized URL.
    CallApi,
    /// Rendering the answer-synthesis prompt.
    RenderAnswerPrompt,
    /// Second model invocation (answer synthesis).
    SynthesizeAnswer,
    /// Running the configured output parser.
    ParseOutput,
}

impl Phase {
    /// Stable identifier for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::RenderUrlPrompt => "render-url-prompt",
            Phase::SynthesizeUrl => "synthesize-url",
            Phase::CallApi => "call-api",
            Phase::RenderAnswerPrompt => "render-answer-prompt",
            Phase::SynthesizeAnswer => "synthesize-answer",
            Phase::ParseOutput => "parse-output",
        }
    }
}

/// Events emitted during a chain run.
#[derive(Debug, Clone)]
pub enum Event {
    /// A phase has started.
    PhaseStart {
        /// Which phase.
        phase: Phase,
    },
    /// A token was received while streaming a model response.
    Token {
        /// The phase producing this token.
        phase: Phase,
        /// The token text.
        chunk: String,
    },
    /// A phase has finished.
    ///
    /// `ok: false` on the parse phase signals the recoverable raw-text
    /// fallback, not a run failure.
    PhaseEnd {
        /// Which phase.
        phase: Phase,
        /// Whether the phase succeeded.
        ok: bool,
    },
    /// The run produced its final answer.
    Finished {
        /// The final answer, serialized for display.
        answer: String,
    },
    /// The run failed; partial progress already shown should be marked
    /// incomplete rather than left silently stalled.
    Errored {
        /// The phase that failed.
        phase: Phase,
        /// The error description.
        message: String,
    },
}

/// A registered observer of chain progress.
///
/// Implementations must not assume they are the only sink, and must not
/// block for long — they run inline between pipeline phases.
pub trait ProgressSink: Send + Sync {
    /// Called for every event, in per-run order.
    fn on_event(&self, event: &Event);
}

/// A [`ProgressSink`] backed by a closure.
pub struct FnSink<F: Fn(&Event) + Send + Sync>(pub F);

impl<F: Fn(&Event) + Send + Sync> ProgressSink for FnSink<F> {
    fn on_event(&self, event: &Event) {
        (self.0)(event);
    }
}

/// An ordered set of sinks with per-sink failure isolation.
#[derive(Clone, Default)]
pub struct SinkSet {
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl SinkSet {
    /// An empty sink set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink.
    pub fn push(&mut self, sink: Arc<dyn ProgressSink>) {
        self.sinks.push(sink);
    }

    /// Number of registered sinks.
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Whether no sinks are registered.
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Deliver an event to every sink.
    ///
    /// A sink that panics is caught and logged; it cannot abort the run or
    /// starve later sinks.
    pub fn emit(&self, event: Event) {
        for sink in &self.sinks {
            if catch_unwind(AssertUnwindSafe(|| sink.on_event(&event))).is_err() {
                log::warn!("progress sink panicked; event dropped for this sink");
            }
        }
    }
}

impl std::fmt::Debug for SinkSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkSet").field("len", &self.sinks.len()).finish()
    }
}
