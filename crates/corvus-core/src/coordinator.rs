//! Stream session coordinator.
//!
//! One task per session drives transcription (for recordings), the provider
//! stream, the parser and the snapshot channel. A slot admits at most one
//! non-terminal session. A stream that fails before any content reached
//! consumers is retried exactly once as a single complete-response call.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use corvus_llm::{LlmError, LlmProvider, Message};
use futures::Stream;
use tokio::sync::watch;
use tokio_stream::StreamExt as _;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::bridge::{JobHandle, TranscriptionBridge};
use crate::dispatch::Dispatcher;
use crate::error::{ErrorInfo, SessionError, TimeoutKind, TranscriptionError};
use crate::parser::{ParserMode, ProgressiveParser};
use crate::prompt::PromptBuilder;
use crate::request::{AudioClip, GenerationRequest, RequestInputs};
use crate::result::{ResultKind, StructuredResult};
use crate::snapshot::{Attempt, JobState, SessionState, Snapshot, TranscriptionSummary};

/// Time budgets applied to every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    /// Upper bound from submission until the session finalizes.
    pub overall_timeout: Duration,
    /// Upper bound from opening a stream until its first delta.
    pub first_byte_timeout: Duration,
    pub transcription_timeout: Duration,
    /// Finished sessions kept around for late lookups.
    pub retain_finished: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            overall_timeout: Duration::from_secs(120),
            first_byte_timeout: Duration::from_secs(15),
            transcription_timeout: Duration::from_secs(30),
            retain_finished: 16,
        }
    }
}

/// Caller-side view of one session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session_id: Uuid,
    request_id: Uuid,
    rx: watch::Receiver<Arc<Snapshot>>,
    cancel: CancellationToken,
}

impl SessionHandle {
    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    #[must_use]
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    #[must_use]
    pub fn latest(&self) -> Arc<Snapshot> {
        Arc::clone(&self.rx.borrow())
    }

    /// The current snapshot followed by every later one. Ends after the
    /// terminal snapshot. Intermediate snapshots may be skipped when the
    /// reader falls behind.
    pub fn snapshots(&self) -> impl Stream<Item = Arc<Snapshot>> + Send + 'static + use<> {
        let mut rx = self.rx.clone();
        rx.mark_changed();
        futures::stream::unfold(Some(rx), |state| async move {
            let mut rx = state?;
            rx.changed().await.ok()?;
            let snapshot = Arc::clone(&rx.borrow_and_update());
            let next = if snapshot.is_final() { None } else { Some(rx) };
            Some((snapshot, next))
        })
    }

    /// Wait for the terminal snapshot.
    pub async fn wait(&self) -> Arc<Snapshot> {
        let mut rx = self.rx.clone();
        if let Ok(snapshot) = rx.wait_for(|s| s.is_final()).await {
            return Arc::clone(&snapshot);
        }
        Arc::clone(&rx.borrow())
    }

    /// Request cancellation. Has no effect once the session is terminal.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.rx.borrow().is_final()
    }
}

#[derive(Debug, Default)]
struct Registry {
    slots: HashMap<String, Uuid>,
    sessions: HashMap<Uuid, SessionHandle>,
    finished: VecDeque<Uuid>,
}

pub struct Coordinator<P> {
    provider: Arc<RwLock<Arc<P>>>,
    prompts: Arc<PromptBuilder>,
    limits: SessionLimits,
    dispatcher: Dispatcher,
    bridge: Option<Arc<TranscriptionBridge>>,
    registry: Arc<Mutex<Registry>>,
}

impl<P> Clone for Coordinator<P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            prompts: Arc::clone(&self.prompts),
            limits: self.limits,
            dispatcher: self.dispatcher.clone(),
            bridge: self.bridge.clone(),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<P: LlmProvider + 'static> Coordinator<P> {
    #[must_use]
    pub fn new(
        provider: P,
        prompts: PromptBuilder,
        limits: SessionLimits,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            provider: Arc::new(RwLock::new(Arc::new(provider))),
            prompts: Arc::new(prompts),
            limits,
            dispatcher,
            bridge: None,
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    #[must_use]
    pub fn with_bridge(mut self, bridge: Arc<TranscriptionBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    #[must_use]
    pub fn limits(&self) -> SessionLimits {
        self.limits
    }

    /// The provider new sessions will use.
    #[must_use]
    pub fn provider(&self) -> Arc<P> {
        Arc::clone(&self.provider.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Swap the provider. Sessions already running keep the one they started with.
    pub fn replace_provider(&self, provider: P) {
        let mut guard = self.provider.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(provider);
        tracing::info!(provider = guard.name(), "provider replaced for future sessions");
    }

    #[must_use]
    pub fn is_busy(&self, slot: &str) -> bool {
        self.registry().slots.contains_key(slot)
    }

    /// Live or recently finished session.
    #[must_use]
    pub fn session(&self, session_id: Uuid) -> Option<SessionHandle> {
        self.registry().sessions.get(&session_id).cloned()
    }

    /// Cancel a session by id. Returns false for unknown ids.
    pub fn cancel(&self, session_id: Uuid) -> bool {
        match self.session(session_id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a session on `slot`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Busy`] if the slot already has a non-terminal
    /// session, [`SessionError::InvalidRequest`] if the inputs do not match the
    /// request kind, and [`SessionError::NoTranscriber`] for recordings when no
    /// bridge is configured.
    pub fn submit(&self, slot: &str, request: GenerationRequest) -> Result<SessionHandle, SessionError> {
        if !request.is_well_formed() {
            return Err(SessionError::InvalidRequest(request.id.to_string()));
        }
        if matches!(request.inputs, RequestInputs::Audio { .. }) && self.bridge.is_none() {
            return Err(SessionError::NoTranscriber);
        }

        let provider = self.provider();
        let session_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let attempt = if provider.supports_streaming() {
            Attempt::Streaming
        } else {
            Attempt::Fallback
        };

        let initial = Arc::new(Snapshot {
            session_id,
            request_id: request.id,
            seq: 0,
            state: SessionState::Pending,
            attempt,
            result: StructuredResult::empty(request.kind.result_kind()),
            transcription: None,
            error: None,
        });
        let (tx, rx) = watch::channel(Arc::clone(&initial));
        let handle = SessionHandle {
            session_id,
            request_id: request.id,
            rx,
            cancel: cancel.clone(),
        };

        {
            let mut registry = self.registry();
            if registry.slots.contains_key(slot) {
                tracing::debug!(slot, "rejecting submit, slot busy");
                return Err(SessionError::Busy {
                    slot: slot.to_owned(),
                });
            }
            registry.slots.insert(slot.to_owned(), session_id);
            registry.sessions.insert(session_id, handle.clone());
        }

        tracing::info!(
            %session_id,
            request_id = %request.id,
            kind = ?request.kind,
            provider = provider.name(),
            "session submitted"
        );
        self.dispatcher.publish(initial);

        let slot = SlotRelease {
            registry: Arc::clone(&self.registry),
            slot: slot.to_owned(),
            session_id,
            retain: self.limits.retain_finished,
        };
        let emitter = Emitter {
            tx,
            dispatcher: self.dispatcher.clone(),
            session_id,
            request_id: request.id,
            seq: 1,
            attempt,
            transcription: None,
            last_result: StructuredResult::empty(request.kind.result_kind()),
            content_emitted: false,
            slot: Some(slot),
        };
        let run = SessionRun {
            provider,
            prompts: Arc::clone(&self.prompts),
            bridge: self.bridge.clone(),
            limits: self.limits,
            request,
            cancel,
        };
        tokio::spawn(run.run(emitter));

        Ok(handle)
    }
}

/// Publishes numbered snapshots to the session channel and the dispatcher.
struct Emitter {
    tx: watch::Sender<Arc<Snapshot>>,
    dispatcher: Dispatcher,
    session_id: Uuid,
    request_id: Uuid,
    seq: u64,
    attempt: Attempt,
    transcription: Option<TranscriptionSummary>,
    last_result: StructuredResult,
    content_emitted: bool,
    /// Held until the terminal snapshot goes out.
    slot: Option<SlotRelease>,
}

impl Emitter {
    /// Release the slot, then publish the terminal snapshot.
    fn finish(&mut self, state: SessionState, result: StructuredResult, error: Option<ErrorInfo>) {
        drop(self.slot.take());
        self.emit(state, result, error);
    }

    fn emit(&mut self, state: SessionState, mut result: StructuredResult, error: Option<ErrorInfo>) {
        result.progress = result.progress.max(self.last_result.progress);
        if state == SessionState::Streaming {
            self.content_emitted = true;
        }
        self.last_result = result.clone();

        let snapshot = Arc::new(Snapshot {
            session_id: self.session_id,
            request_id: self.request_id,
            seq: self.seq,
            state,
            attempt: self.attempt,
            result,
            transcription: self.transcription.clone(),
            error,
        });
        self.seq += 1;
        tracing::debug!(
            session_id = %self.session_id,
            seq = snapshot.seq,
            state = ?state,
            progress = snapshot.result.progress,
            "snapshot"
        );
        self.tx.send_replace(Arc::clone(&snapshot));
        self.dispatcher.publish(snapshot);
    }

    /// Re-emit the current state with updated transcription details.
    fn emit_transcription(&mut self, summary: TranscriptionSummary) {
        self.transcription = Some(summary);
        let state = self.tx.borrow().state;
        self.emit(state, self.last_result.clone(), None);
    }

    fn fail(&mut self, state: SessionState, error: &SessionError) {
        let mut result = self.last_result.clone();
        result.is_complete = false;
        self.finish(state, result, Some(error.info()));
    }
}

impl Drop for Emitter {
    fn drop(&mut self) {
        if self.slot.is_some() {
            tracing::error!(session_id = %self.session_id, "session task ended without a terminal snapshot");
            self.fail(SessionState::Failed, &SessionError::Aborted);
        }
    }
}

struct SlotRelease {
    registry: Arc<Mutex<Registry>>,
    slot: String,
    session_id: Uuid,
    retain: usize,
}

impl Drop for SlotRelease {
    fn drop(&mut self) {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        if registry.slots.get(&self.slot) == Some(&self.session_id) {
            registry.slots.remove(&self.slot);
        }
        registry.finished.push_back(self.session_id);
        while registry.finished.len() > self.retain {
            if let Some(old) = registry.finished.pop_front() {
                registry.sessions.remove(&old);
            }
        }
    }
}

enum StreamFailure {
    /// Nothing reached consumers yet; a fallback attempt may follow.
    Recoverable(SessionError),
    Terminal(SessionError),
}

struct SessionRun<P> {
    provider: Arc<P>,
    prompts: Arc<PromptBuilder>,
    bridge: Option<Arc<TranscriptionBridge>>,
    limits: SessionLimits,
    request: GenerationRequest,
    cancel: CancellationToken,
}

impl<P: LlmProvider + 'static> SessionRun<P> {
    async fn run(self, mut emitter: Emitter) {
        let session_id = emitter.session_id;
        let mut job: Option<JobHandle> = None;

        let outcome = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(SessionError::Cancelled),
            driven = tokio::time::timeout(
                self.limits.overall_timeout,
                self.drive(&mut emitter, &mut job),
            ) => driven.unwrap_or(Err(SessionError::Timeout(TimeoutKind::Overall))),
        };

        if let Err(SessionError::Cancelled | SessionError::Timeout(TimeoutKind::Overall)) = &outcome
            && let Some(job) = job.take()
            && job.status() != JobState::Succeeded
        {
            self.cancel.cancel();
            emitter.transcription = Some(job.wait().await.summary());
        }

        match outcome {
            Ok(result) => {
                tracing::info!(%session_id, attempt = ?emitter.attempt, "session completed");
                emitter.finish(SessionState::Completed, result, None);
            }
            Err(SessionError::Cancelled) => {
                tracing::info!(%session_id, "session cancelled");
                emitter.fail(SessionState::Cancelled, &SessionError::Cancelled);
            }
            Err(e) => {
                tracing::warn!(%session_id, kind = ?e.kind(), "session failed: {e}");
                emitter.fail(SessionState::Failed, &e);
            }
        }
    }

    async fn drive(
        &self,
        emitter: &mut Emitter,
        job: &mut Option<JobHandle>,
    ) -> Result<StructuredResult, SessionError> {
        let transcript = match &self.request.inputs {
            RequestInputs::Audio { clip, .. } => Some(self.transcribe(clip, emitter, job).await?),
            _ => None,
        };

        let mode = if self.provider.supports_structured_output() {
            ParserMode::Json
        } else {
            ParserMode::Heuristic
        };
        let messages = self.prompts.build(&self.request, transcript.as_deref(), mode);
        let kind = self.request.kind.result_kind();

        if !self.provider.supports_streaming() {
            return self.complete(&messages, kind, mode, emitter).await;
        }

        match self.stream(&messages, kind, mode, emitter).await {
            Ok(result) => Ok(result),
            Err(StreamFailure::Recoverable(reason)) => {
                tracing::warn!(
                    session_id = %emitter.session_id,
                    kind = ?reason.kind(),
                    "stream failed before any content, retrying without streaming"
                );
                emitter.attempt = Attempt::Fallback;
                self.complete(&messages, kind, mode, emitter).await
            }
            Err(StreamFailure::Terminal(e)) => Err(e),
        }
    }

    async fn transcribe(
        &self,
        clip: &AudioClip,
        emitter: &mut Emitter,
        job: &mut Option<JobHandle>,
    ) -> Result<String, SessionError> {
        let bridge = self.bridge.as_ref().ok_or(SessionError::NoTranscriber)?;
        let handle = bridge.submit(
            clip.clone(),
            self.limits.transcription_timeout,
            self.cancel.child_token(),
        );
        *job = Some(handle.clone());
        emitter.emit_transcription(TranscriptionSummary {
            job_id: handle.id(),
            state: handle.status(),
            confidence: None,
        });

        let finished = handle.wait().await;
        emitter.emit_transcription(finished.summary());
        match (finished.state, finished.text) {
            (JobState::Succeeded, Some(text)) => Ok(text),
            _ => Err(SessionError::Transcription(
                finished
                    .error
                    .unwrap_or_else(|| TranscriptionError::Backend("job ended without text".into())),
            )),
        }
    }

    async fn stream(
        &self,
        messages: &[Message],
        kind: ResultKind,
        mode: ParserMode,
        emitter: &mut Emitter,
    ) -> Result<StructuredResult, StreamFailure> {
        let first_byte = tokio::time::sleep(self.limits.first_byte_timeout);
        tokio::pin!(first_byte);
        let first_byte_expired = || {
            StreamFailure::Recoverable(SessionError::Timeout(TimeoutKind::FirstByte))
        };

        let opened = tokio::select! {
            opened = self.provider.chat_stream(messages) => opened,
            () = &mut first_byte => return Err(first_byte_expired()),
        };
        let mut stream = opened.map_err(|e| StreamFailure::Recoverable(e.into()))?;

        let mut parser = ProgressiveParser::new(kind, mode);
        let mut received = false;
        loop {
            let item = if received {
                stream.next().await
            } else {
                tokio::select! {
                    item = stream.next() => item,
                    () = &mut first_byte => return Err(first_byte_expired()),
                }
            };
            match item {
                Some(Ok(delta)) => {
                    received = true;
                    if let Some(snapshot) = parser.feed(&delta) {
                        emitter.emit(SessionState::Streaming, snapshot, None);
                    }
                    if parser.is_closed() {
                        break;
                    }
                }
                Some(Err(e)) if emitter.content_emitted => {
                    return Err(StreamFailure::Terminal(e.into()));
                }
                Some(Err(e)) => return Err(StreamFailure::Recoverable(e.into())),
                None => break,
            }
        }
        drop(stream);

        if !received {
            return Err(StreamFailure::Recoverable(
                LlmError::EmptyResponse {
                    provider: "stream",
                }
                .into(),
            ));
        }
        finalize(&mut parser, emitter).map_err(StreamFailure::Terminal)
    }

    async fn complete(
        &self,
        messages: &[Message],
        kind: ResultKind,
        mode: ParserMode,
        emitter: &mut Emitter,
    ) -> Result<StructuredResult, SessionError> {
        let text = self.provider.chat(messages).await?;
        let mut parser = ProgressiveParser::new(kind, mode);
        parser.feed(&text);
        finalize(&mut parser, emitter)
    }
}

fn finalize(parser: &mut ProgressiveParser, emitter: &mut Emitter) -> Result<StructuredResult, SessionError> {
    emitter.emit(SessionState::Finalizing, parser.snapshot(), None);
    parser.finalize().map_err(SessionError::from)
}
