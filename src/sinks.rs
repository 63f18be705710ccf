//! Built-in progress sinks.
//!
//! [`LogSink`] mirrors every event onto the `log` facade. [`StreamRelay`]
//! forwards streamed tokens to a live client channel, batching a few chunks
//! per send to cut call overhead.

use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::events::{Event, ProgressSink};

/// Pass-through logger for chain progress.
///
/// Cheap enough to register on every chain.
#[derive(Debug, Default)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn on_event(&self, event: &Event) {
        match event {
            Event::PhaseStart { phase } => log::debug!("[{}] start", phase.as_str()),
            Event::Token { phase, chunk } => {
                log::trace!("[{}] token: {}", phase.as_str(), chunk)
            }
            Event::PhaseEnd { phase, ok } => {
                log::debug!("[{}] end ok={}", phase.as_str(), ok)
            }
            Event::Finished { answer } => log::info!("chain finished: {}", answer),
            Event::Errored { phase, message } => {
                log::error!("[{}] failed: {}", phase.as_str(), message)
            }
        }
    }
}

/// Messages a [`StreamRelay`] forwards to its client channel.
///
/// Serializes to a `type`-tagged JSON object so receivers can ship it to a
/// client over the wire as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayMessage {
    /// Streaming has begun for this session.
    Start {
        /// The client session this stream belongs to.
        session_id: String,
    },
    /// A batch of streamed text.
    Chunk {
        /// The client session this stream belongs to.
        session_id: String,
        /// Concatenated token text.
        text: String,
    },
    /// The run finished; no more chunks will follow.
    End {
        /// The client session this stream belongs to.
        session_id: String,
    },
    /// The run failed; partial output shown so far is incomplete.
    Error {
        /// The client session this stream belongs to.
        session_id: String,
        /// The error description.
        message: String,
    },
}

/// Default number of token chunks buffered before a flush.
pub const DEFAULT_BATCH_THRESHOLD: usize = 2;

/// Relays streamed tokens to a live client channel, session-tagged.
///
/// Tokens are buffered up to a small threshold and flushed as one
/// [`RelayMessage::Chunk`]. Any remainder is flushed on phase end, on the
/// final result, and on error. Send failures (client gone) are ignored —
/// observers never affect the run.
pub struct StreamRelay {
    tx: UnboundedSender<RelayMessage>,
    session_id: String,
    threshold: usize,
    buffer: Mutex<Vec<String>>,
    started: Mutex<bool>,
}

impl StreamRelay {
    /// Create a relay for `session_id` over `tx`.
    pub fn new(tx: UnboundedSender<RelayMessage>, session_id: impl Into<String>) -> Self {
        Self {
            tx,
            session_id: session_id.into(),
            threshold: DEFAULT_BATCH_THRESHOLD,
            buffer: Mutex::new(Vec::new()),
            started: Mutex::new(false),
        }
    }

    /// Override the batch threshold (minimum 1).
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold.max(1);
        self
    }

    fn send(&self, message: RelayMessage) {
        // The receiver may have disconnected; that's the client's problem
        let _ = self.tx.send(message);
    }

    fn mark_started(&self) {
        let mut started = self.started.lock().unwrap();
        if !*started {
            *started = true;
            self.send(RelayMessage::Start {
                session_id: self.session_id.clone(),
            });
        }
    }

    fn flush(&self) {
        let mut buffer = self.buffer.lock().unwrap();
        if buffer.is_empty() {
            return;
        }
        let text = buffer.join("");
        buffer.clear();
        drop(buffer);
        self.send(RelayMessage::Chunk {
            session_id: self.session_id.clone(),
            text,
        });
    }
}

impl ProgressSink for StreamRelay {
    fn on_event(&self, event: &Event) {
        match event {
            Event::Token { chunk, .. } => {
                self.mark_started();
                let should_flush = {
                    let mut buffer = self.buffer.lock().unwrap();
                    buffer.push(chunk.clone());
                    buffer.len() >= self.threshold
                };
                if should_flush {
                    self.flush();
                }
            }
            Event::PhaseEnd { .. } => self.flush(),
            Event::Finished { .. } => {
                self.flush();
                self.send(RelayMessage::End {
                    session_id: self.session_id.clone(),
                });
            }
            Event::Errored { message, .. } => {
                self.flush();
                self.send(RelayMessage::Error {
                    session_id: self.session_id.clone(),
                    message: message.clone(),
                });
            }
            Event::PhaseStart { .. } => {}
        }
    }
}
