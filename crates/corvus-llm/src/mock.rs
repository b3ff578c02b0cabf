//! Scripted in-process provider for tests.
//!
//! Each `chat_stream` call pops the next [`StreamScript`]; each `chat` call pops
//! the next scripted reply. When a queue runs dry the `default_response` is used.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_core::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{ErrorClass, LlmError};
use crate::provider::{Capabilities, ChatStream, LlmProvider, Message, ProviderInfo};

/// One step of a scripted stream.
#[derive(Debug, Clone)]
pub enum StreamStep {
    Chunk(String),
    Delay(Duration),
    Fail(ErrorClass),
    /// Never yield again; the stream stays open until dropped.
    Hang,
}

/// Outcome of one `chat_stream` call: either the open fails or the steps play.
pub type StreamScript = Result<Vec<StreamStep>, ErrorClass>;

#[derive(Debug, Default)]
struct Counters {
    chat_calls: AtomicUsize,
    stream_calls: AtomicUsize,
    streams_aborted: AtomicUsize,
}

#[derive(Debug, Clone)]
pub struct MockProvider {
    info: ProviderInfo,
    streams: Arc<Mutex<VecDeque<StreamScript>>>,
    replies: Arc<Mutex<VecDeque<Result<String, ErrorClass>>>>,
    counters: Arc<Counters>,
    pub default_response: String,
    pub chat_delay: Duration,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            info: ProviderInfo::new("mock", "Mock", "mock-model"),
            streams: Arc::new(Mutex::new(VecDeque::new())),
            replies: Arc::new(Mutex::new(VecDeque::new())),
            counters: Arc::new(Counters::default()),
            default_response: "mock response".into(),
            chat_delay: Duration::ZERO,
        }
    }
}

impl MockProvider {
    #[must_use]
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(responses.into_iter().map(Ok).collect())),
            ..Self::default()
        }
    }

    /// Every call fails with the given class.
    #[must_use]
    pub fn failing(class: ErrorClass) -> Self {
        let mock = Self::default();
        mock.push_stream(Err(class));
        mock.push_reply(Err(class));
        mock
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.info.capabilities = capabilities;
        self
    }

    #[must_use]
    pub fn without_streaming(mut self) -> Self {
        self.info.capabilities.streaming = false;
        self
    }

    #[must_use]
    pub fn with_chat_delay(mut self, delay: Duration) -> Self {
        self.chat_delay = delay;
        self
    }

    /// Queue the script for the next `chat_stream` call.
    pub fn push_stream(&self, script: StreamScript) {
        if let Ok(mut q) = self.streams.lock() {
            q.push_back(script);
        }
    }

    /// Queue the reply for the next `chat` call.
    pub fn push_reply(&self, reply: Result<String, ErrorClass>) {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(reply);
        }
    }

    #[must_use]
    pub fn chat_calls(&self) -> usize {
        self.counters.chat_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn stream_calls(&self) -> usize {
        self.counters.stream_calls.load(Ordering::SeqCst)
    }

    /// Streams dropped by the consumer before they ended.
    #[must_use]
    pub fn streams_aborted(&self) -> usize {
        self.counters.streams_aborted.load(Ordering::SeqCst)
    }
}

/// Build the error an adapter would surface for the given class.
#[must_use]
pub fn error_for(class: ErrorClass) -> LlmError {
    match class {
        ErrorClass::Auth => LlmError::Auth {
            provider: "mock",
            status: 401,
        },
        ErrorClass::RateLimited => LlmError::RateLimited { provider: "mock" },
        ErrorClass::Network => LlmError::SseParse("mock connection reset".into()),
        ErrorClass::ProviderInternal => LlmError::Status {
            provider: "mock",
            status: 500,
        },
    }
}

impl LlmProvider for MockProvider {
    async fn chat(&self, _messages: &[Message]) -> Result<String, LlmError> {
        self.counters.chat_calls.fetch_add(1, Ordering::SeqCst);
        if !self.chat_delay.is_zero() {
            tokio::time::sleep(self.chat_delay).await;
        }
        let next = self.replies.lock().ok().and_then(|mut q| q.pop_front());
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(class)) => Err(error_for(class)),
            None => Ok(self.default_response.clone()),
        }
    }

    async fn chat_stream(&self, _messages: &[Message]) -> Result<ChatStream, LlmError> {
        self.counters.stream_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.streams.lock().ok().and_then(|mut q| q.pop_front());
        let steps = match next {
            Some(Ok(steps)) => steps,
            Some(Err(class)) => return Err(error_for(class)),
            None => self
                .default_response
                .chars()
                .map(|c| StreamStep::Chunk(c.to_string()))
                .collect(),
        };

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(play(steps, tx));
        Ok(Box::pin(ScriptedStream {
            inner: ReceiverStream::new(rx),
            finished: AtomicBool::new(false),
            counters: Arc::clone(&self.counters),
        }))
    }

    fn info(&self) -> &ProviderInfo {
        &self.info
    }
}

async fn play(steps: Vec<StreamStep>, tx: mpsc::Sender<Result<String, LlmError>>) {
    for step in steps {
        match step {
            StreamStep::Chunk(text) => {
                if tx.send(Ok(text)).await.is_err() {
                    return;
                }
            }
            StreamStep::Delay(d) => {
                tokio::select! {
                    () = tokio::time::sleep(d) => {}
                    () = tx.closed() => return,
                }
            }
            StreamStep::Fail(class) => {
                let _ = tx.send(Err(error_for(class))).await;
                return;
            }
            StreamStep::Hang => {
                tx.closed().await;
                return;
            }
        }
    }
}

struct ScriptedStream {
    inner: ReceiverStream<Result<String, LlmError>>,
    finished: AtomicBool,
    counters: Arc<Counters>,
}

impl Stream for ScriptedStream {
    type Item = Result<String, LlmError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let poll = Pin::new(&mut self.inner).poll_next(cx);
        if let Poll::Ready(None) = poll {
            self.finished.store(true, Ordering::SeqCst);
        }
        poll
    }
}

impl Drop for ScriptedStream {
    fn drop(&mut self) {
        if !self.finished.load(Ordering::SeqCst) {
            self.counters.streams_aborted.fetch_add(1, Ordering::SeqCst);
        }
    }
}
