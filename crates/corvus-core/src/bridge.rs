//! Runs blocking speech-to-text calls on a small dedicated worker pool.
//!
//! Each submitted job waits for a worker permit, then runs on a blocking thread
//! while the async side watches for cancellation and the job timeout. Jobs
//! beyond the pool size queue on the semaphore.

use std::sync::Arc;
use std::time::Duration;

use corvus_llm::stt::{SpeechToText, Transcription};
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::TranscriptionError;
use crate::request::AudioClip;
use crate::snapshot::{JobState, TranscriptionSummary};

pub const MAX_WORKERS: usize = 2;

/// A blocking transcription backend. Called from a worker thread, never from
/// the async runtime.
pub trait Transcriber: Send + Sync + 'static {
    /// # Errors
    ///
    /// Returns [`TranscriptionError::Backend`] when the backend fails and
    /// [`TranscriptionError::Cancelled`] when `cancel` fired mid-call.
    fn transcribe(
        &self,
        audio: &AudioClip,
        cancel: &CancellationToken,
    ) -> Result<Transcription, TranscriptionError>;

    /// Whether `transcribe` returns promptly once `cancel` fires.
    fn supports_cancellation(&self) -> bool {
        false
    }

    fn name(&self) -> &str;
}

/// Adapts an async [`SpeechToText`] backend by driving it to completion on the
/// worker thread.
pub struct RemoteTranscriber {
    stt: Arc<dyn SpeechToText>,
    handle: Handle,
}

impl RemoteTranscriber {
    #[must_use]
    pub fn new(stt: Arc<dyn SpeechToText>, handle: Handle) -> Self {
        Self { stt, handle }
    }
}

impl Transcriber for RemoteTranscriber {
    fn transcribe(
        &self,
        audio: &AudioClip,
        cancel: &CancellationToken,
    ) -> Result<Transcription, TranscriptionError> {
        self.handle.block_on(async {
            tokio::select! {
                biased;
                () = cancel.cancelled() => Err(TranscriptionError::Cancelled),
                result = self.stt.transcribe(&audio.data, audio.filename.as_deref()) => {
                    result.map_err(|e| {
                        tracing::warn!(backend = self.stt.name(), class = %e.class(), "transcription request failed");
                        TranscriptionError::Backend(e.to_string())
                    })
                }
            }
        })
    }

    fn supports_cancellation(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        self.stt.name()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionJob {
    pub id: Uuid,
    pub filename: Option<String>,
    pub state: JobState,
    pub text: Option<String>,
    pub confidence: Option<f32>,
    pub error: Option<TranscriptionError>,
}

impl TranscriptionJob {
    fn queued(id: Uuid, filename: Option<String>) -> Self {
        Self {
            id,
            filename,
            state: JobState::Queued,
            text: None,
            confidence: None,
            error: None,
        }
    }

    #[must_use]
    pub fn summary(&self) -> TranscriptionSummary {
        TranscriptionSummary {
            job_id: self.id,
            state: self.state,
            confidence: self.confidence,
        }
    }
}

/// Observer for one submitted job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: Uuid,
    rx: watch::Receiver<TranscriptionJob>,
}

impl JobHandle {
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn status(&self) -> JobState {
        self.rx.borrow().state
    }

    /// Wait until the job reaches a terminal state.
    pub async fn wait(&self) -> TranscriptionJob {
        let mut rx = self.rx.clone();
        if let Ok(job) = rx.wait_for(|job| job.state.is_terminal()).await {
            return job.clone();
        }
        let mut job = rx.borrow().clone();
        job.state = JobState::Failed;
        job.error = Some(TranscriptionError::Backend("bridge stopped".into()));
        job
    }
}

pub struct TranscriptionBridge {
    transcriber: Arc<dyn Transcriber>,
    permits: Arc<Semaphore>,
    workers: usize,
    min_confidence: f32,
}

impl std::fmt::Debug for TranscriptionBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscriptionBridge")
            .field("transcriber", &self.transcriber.name())
            .field("workers", &self.workers)
            .field("min_confidence", &self.min_confidence)
            .finish_non_exhaustive()
    }
}

enum Outcome {
    Finished(Result<Transcription, TranscriptionError>),
    Cancelled,
    TimedOut,
}

impl TranscriptionBridge {
    /// `workers` is clamped to `1..=2`.
    #[must_use]
    pub fn new(transcriber: Arc<dyn Transcriber>, workers: usize, min_confidence: f32) -> Self {
        let workers = workers.clamp(1, MAX_WORKERS);
        Self {
            transcriber,
            permits: Arc::new(Semaphore::new(workers)),
            workers,
            min_confidence,
        }
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Workers not currently running a job.
    #[must_use]
    pub fn idle_workers(&self) -> usize {
        self.permits.available_permits()
    }

    /// Queue a job. `timeout` counts from the moment a worker picks it up.
    #[must_use]
    pub fn submit(&self, audio: AudioClip, timeout: Duration, cancel: CancellationToken) -> JobHandle {
        let id = Uuid::new_v4();
        let (tx, rx) = watch::channel(TranscriptionJob::queued(id, audio.filename.clone()));
        tracing::debug!(job_id = %id, bytes = audio.data.len(), "transcription job queued");

        tokio::spawn(run_job(
            Arc::clone(&self.transcriber),
            Arc::clone(&self.permits),
            self.min_confidence,
            audio,
            timeout,
            cancel,
            tx,
        ));
        JobHandle { id, rx }
    }
}

async fn run_job(
    transcriber: Arc<dyn Transcriber>,
    permits: Arc<Semaphore>,
    min_confidence: f32,
    audio: AudioClip,
    timeout: Duration,
    cancel: CancellationToken,
    tx: watch::Sender<TranscriptionJob>,
) {
    let permit = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            finish(&tx, Err(TranscriptionError::Cancelled));
            return;
        }
        permit = Arc::clone(&permits).acquire_owned() => match permit {
            Ok(p) => p,
            Err(_) => {
                finish(&tx, Err(TranscriptionError::Backend("worker pool closed".into())));
                return;
            }
        },
    };

    tx.send_modify(|job| job.state = JobState::Running);
    tracing::debug!(job_id = %tx.borrow().id, backend = transcriber.name(), "transcription job running");

    let call_token = cancel.child_token();
    let mut worker: JoinHandle<Result<Transcription, TranscriptionError>> =
        tokio::task::spawn_blocking({
            let transcriber = Arc::clone(&transcriber);
            let call_token = call_token.clone();
            move || {
                let _permit = permit;
                transcriber.transcribe(&audio, &call_token)
            }
        });

    let outcome = tokio::select! {
        biased;
        () = cancel.cancelled() => Outcome::Cancelled,
        joined = &mut worker => match joined {
            Ok(result) => Outcome::Finished(result),
            Err(e) => Outcome::Finished(Err(TranscriptionError::Backend(format!("worker failed: {e}")))),
        },
        () = tokio::time::sleep(timeout) => Outcome::TimedOut,
    };

    let interrupted = match outcome {
        Outcome::Finished(result) => {
            finish(&tx, classify(result, min_confidence));
            return;
        }
        Outcome::Cancelled => TranscriptionError::Cancelled,
        Outcome::TimedOut => TranscriptionError::Timeout,
    };

    call_token.cancel();
    if transcriber.supports_cancellation() {
        let _ = worker.await;
    } else {
        tracing::warn!(
            job_id = %tx.borrow().id,
            backend = transcriber.name(),
            "backend cannot be cancelled, detaching worker"
        );
    }
    finish(&tx, Err(interrupted));
}

fn classify(
    result: Result<Transcription, TranscriptionError>,
    min_confidence: f32,
) -> Result<Transcription, TranscriptionError> {
    let transcription = result?;
    if transcription.text.trim().is_empty() {
        return Err(TranscriptionError::Empty);
    }
    if let Some(confidence) = transcription.confidence
        && confidence < min_confidence
    {
        return Err(TranscriptionError::LowConfidence {
            confidence,
            threshold: min_confidence,
        });
    }
    Ok(transcription)
}

fn finish(tx: &watch::Sender<TranscriptionJob>, result: Result<Transcription, TranscriptionError>) {
    tx.send_modify(|job| match result {
        Ok(t) => {
            job.state = JobState::Succeeded;
            job.text = Some(t.text);
            job.confidence = t.confidence;
        }
        Err(e) => {
            job.state = if matches!(e, TranscriptionError::Timeout) {
                JobState::TimedOut
            } else {
                JobState::Failed
            };
            if let TranscriptionError::LowConfidence { confidence, .. } = e {
                job.confidence = Some(confidence);
            }
            job.error = Some(e);
        }
    });
    let job = tx.borrow();
    tracing::info!(job_id = %job.id, state = ?job.state, confidence = ?job.confidence, "transcription job finished");
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use super::*;

    /// Blocking transcriber that sleeps in small steps, tracking concurrency.
    pub(crate) struct ScriptedTranscriber {
        pub delay: Duration,
        pub reply: Result<Transcription, TranscriptionError>,
        pub cancellable: bool,
        pub calls: AtomicUsize,
        active: AtomicUsize,
        pub max_active: AtomicUsize,
    }

    impl ScriptedTranscriber {
        pub(crate) fn new(delay: Duration, text: &str, confidence: Option<f32>) -> Self {
            Self {
                delay,
                reply: Ok(Transcription {
                    text: text.to_owned(),
                    language: Some("en".into()),
                    duration_secs: Some(1.0),
                    confidence,
                }),
                cancellable: true,
                calls: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            }
        }

        pub(crate) fn uncancellable(mut self) -> Self {
            self.cancellable = false;
            self
        }
    }

    impl Transcriber for ScriptedTranscriber {
        fn transcribe(
            &self,
            _audio: &AudioClip,
            cancel: &CancellationToken,
        ) -> Result<Transcription, TranscriptionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);

            let started = Instant::now();
            let mut result = self.reply.clone();
            while started.elapsed() < self.delay {
                if self.cancellable && cancel.is_cancelled() {
                    result = Err(TranscriptionError::Cancelled);
                    break;
                }
                std::thread::sleep(Duration::from_millis(2));
            }
            self.active.fetch_sub(1, Ordering::SeqCst);
            result
        }

        fn supports_cancellation(&self) -> bool {
            self.cancellable
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn clip() -> AudioClip {
        AudioClip::new(vec![0_u8; 16], Some("clip.wav".into()))
    }

    fn bridge(t: ScriptedTranscriber, workers: usize) -> (TranscriptionBridge, Arc<ScriptedTranscriber>) {
        let t = Arc::new(t);
        (TranscriptionBridge::new(t.clone(), workers, 0.3), t)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn successful_job() {
        let (bridge, _) = bridge(ScriptedTranscriber::new(Duration::ZERO, "two sum", Some(0.9)), 1);
        let handle = bridge.submit(clip(), Duration::from_secs(5), CancellationToken::new());
        let job = handle.wait().await;
        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.text.as_deref(), Some("two sum"));
        assert_eq!(job.summary().confidence, Some(0.9));
        assert_eq!(handle.status(), JobState::Succeeded);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn empty_text_fails() {
        let (bridge, _) = bridge(ScriptedTranscriber::new(Duration::ZERO, "   ", None), 1);
        let job = bridge
            .submit(clip(), Duration::from_secs(5), CancellationToken::new())
            .wait()
            .await;
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error, Some(TranscriptionError::Empty));
        assert!(job.text.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn low_confidence_fails() {
        let (bridge, _) = bridge(ScriptedTranscriber::new(Duration::ZERO, "mumble", Some(0.1)), 1);
        let job = bridge
            .submit(clip(), Duration::from_secs(5), CancellationToken::new())
            .wait()
            .await;
        assert_eq!(job.state, JobState::Failed);
        assert!(matches!(job.error, Some(TranscriptionError::LowConfidence { .. })));
        assert_eq!(job.confidence, Some(0.1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn missing_confidence_is_accepted() {
        let (bridge, _) = bridge(ScriptedTranscriber::new(Duration::ZERO, "hello", None), 1);
        let job = bridge
            .submit(clip(), Duration::from_secs(5), CancellationToken::new())
            .wait()
            .await;
        assert_eq!(job.state, JobState::Succeeded);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timeout_marks_timed_out_and_frees_worker() {
        let (bridge, _) = bridge(ScriptedTranscriber::new(Duration::from_secs(10), "late", Some(0.9)), 1);
        let job = bridge
            .submit(clip(), Duration::from_millis(50), CancellationToken::new())
            .wait()
            .await;
        assert_eq!(job.state, JobState::TimedOut);
        assert_eq!(job.error, Some(TranscriptionError::Timeout));
        assert_eq!(bridge.idle_workers(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn uncancellable_backend_is_detached_on_timeout() {
        let (bridge, t) = bridge(
            ScriptedTranscriber::new(Duration::from_millis(300), "late", Some(0.9)).uncancellable(),
            1,
        );
        let started = Instant::now();
        let job = bridge
            .submit(clip(), Duration::from_millis(30), CancellationToken::new())
            .wait()
            .await;
        assert_eq!(job.state, JobState::TimedOut);
        assert!(started.elapsed() < Duration::from_millis(250));
        assert_eq!(t.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn jobs_beyond_pool_queue() {
        let (bridge, t) = bridge(ScriptedTranscriber::new(Duration::from_millis(40), "ok", Some(0.9)), 1);
        let handles: Vec<_> = (0..3)
            .map(|_| bridge.submit(clip(), Duration::from_secs(5), CancellationToken::new()))
            .collect();
        for h in &handles {
            assert_eq!(h.wait().await.state, JobState::Succeeded);
        }
        assert_eq!(t.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(t.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancel_while_running_releases_worker() {
        let (bridge, _) = bridge(ScriptedTranscriber::new(Duration::from_secs(10), "never", None), 1);
        let token = CancellationToken::new();
        let handle = bridge.submit(clip(), Duration::from_secs(30), token.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
        let job = handle.wait().await;
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error, Some(TranscriptionError::Cancelled));
        assert_eq!(bridge.idle_workers(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancel_while_queued_never_runs() {
        let (bridge, t) = bridge(ScriptedTranscriber::new(Duration::from_millis(100), "ok", None), 1);
        let first = bridge.submit(clip(), Duration::from_secs(5), CancellationToken::new());
        while first.status() != JobState::Running {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let token = CancellationToken::new();
        let second = bridge.submit(clip(), Duration::from_secs(5), token.clone());
        token.cancel();
        assert_eq!(second.wait().await.error, Some(TranscriptionError::Cancelled));
        assert_eq!(first.wait().await.state, JobState::Succeeded);
        assert_eq!(t.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn workers_clamped() {
        let t: Arc<dyn Transcriber> = Arc::new(ScriptedTranscriber::new(Duration::ZERO, "x", None));
        assert_eq!(TranscriptionBridge::new(t.clone(), 0, 0.3).workers(), 1);
        assert_eq!(TranscriptionBridge::new(t, 8, 0.3).workers(), 2);
    }

    struct FixedStt;

    impl SpeechToText for FixedStt {
        fn transcribe(
            &self,
            _audio: &[u8],
            _filename: Option<&str>,
        ) -> std::pin::Pin<
            Box<dyn Future<Output = Result<Transcription, corvus_llm::LlmError>> + Send + '_>,
        > {
            Box::pin(async {
                Ok(Transcription {
                    text: "remote text".into(),
                    language: None,
                    duration_secs: None,
                    confidence: Some(0.8),
                })
            })
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn remote_transcriber_drives_async_backend() {
        let remote = RemoteTranscriber::new(Arc::new(FixedStt), Handle::current());
        assert!(remote.supports_cancellation());
        let bridge = TranscriptionBridge::new(Arc::new(remote), 1, 0.3);
        let job = bridge
            .submit(clip(), Duration::from_secs(5), CancellationToken::new())
            .wait()
            .await;
        assert_eq!(job.text.as_deref(), Some("remote text"));
    }
}
