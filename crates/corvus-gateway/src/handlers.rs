use std::convert::Infallible;
use std::sync::PoisonError;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use corvus_core::prompt::decode_data_url;
use corvus_core::{
    AudioClip, DEFAULT_SLOT, GenerationRequest, HistoryEntry, ImageInput, SessionHandle,
    SessionState,
};
use corvus_llm::LlmProvider;
use futures::{Stream, StreamExt};
use uuid::Uuid;

use super::error::ApiError;
use super::server::AppState;

const DEFAULT_IMAGE_MIME: &str = "image/png";

#[derive(serde::Deserialize)]
pub(crate) struct SolutionBody {
    #[serde(default)]
    pub language: Option<String>,
    /// Base64 screenshots, bare or as `data:` URLs.
    pub screenshots: Vec<String>,
}

#[derive(serde::Deserialize)]
pub(crate) struct OptimizeBody {
    pub code: String,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(serde::Deserialize)]
pub(crate) struct RecordingBody {
    pub audio: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    /// Text of an attached file.
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(serde::Deserialize, serde::Serialize)]
pub(crate) struct LanguageBody {
    pub language: String,
}

#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    provider: String,
    uptime_secs: u64,
    busy: bool,
}

pub(crate) async fn health_handler<P: LlmProvider + 'static>(
    State(state): State<AppState<P>>,
) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        provider: state.coordinator.provider().name().to_owned(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        busy: state.coordinator.is_busy(DEFAULT_SLOT),
    })
}

pub(crate) async fn solution_handler<P: LlmProvider + 'static>(
    State(state): State<AppState<P>>,
    Json(body): Json<SolutionBody>,
) -> Result<impl IntoResponse, ApiError> {
    if body.screenshots.is_empty() {
        return Err(ApiError::BadRequest("at least one screenshot is required".into()));
    }
    let images = body
        .screenshots
        .iter()
        .map(|s| {
            decode_data_url(s).map(|(data, mime)| ImageInput {
                data,
                mime_type: mime.unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_owned()),
            })
        })
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ApiError::BadRequest(format!("invalid screenshot encoding: {e}")))?;

    let language = state.language_or(body.language);
    start(&state, GenerationRequest::solution(images, Some(language)))
}

pub(crate) async fn optimize_handler<P: LlmProvider + 'static>(
    State(state): State<AppState<P>>,
    Json(body): Json<OptimizeBody>,
) -> Result<impl IntoResponse, ApiError> {
    let language = state.language_or(body.language);
    start(&state, GenerationRequest::optimization(body.code, Some(language)))
}

pub(crate) async fn recording_handler<P: LlmProvider + 'static>(
    State(state): State<AppState<P>>,
    Json(body): Json<RecordingBody>,
) -> Result<impl IntoResponse, ApiError> {
    let (data, _) = decode_data_url(&body.audio)
        .map_err(|e| ApiError::BadRequest(format!("invalid audio encoding: {e}")))?;
    let mut request =
        GenerationRequest::recording(AudioClip::new(data, body.filename), body.instructions);
    if let Some(context) = body.context.filter(|c| !c.trim().is_empty()) {
        request = request.with_context(context);
    }
    start(&state, request)
}

/// Re-attach to a running or recently finished session.
pub(crate) async fn events_handler<P: LlmProvider + 'static>(
    State(state): State<AppState<P>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let handle = state.coordinator.session(id).ok_or(ApiError::NotFound)?;
    Ok(snapshot_events(&handle))
}

pub(crate) async fn cancel_handler<P: LlmProvider + 'static>(
    State(state): State<AppState<P>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.coordinator.cancel(id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound)
    }
}

pub(crate) async fn reset_history_handler<P: LlmProvider + 'static>(
    State(state): State<AppState<P>>,
) -> Result<StatusCode, ApiError> {
    if state.coordinator.is_busy(DEFAULT_SLOT) {
        return Err(ApiError::Conflict(
            "history cannot be reset while a session is active".into(),
        ));
    }
    state.history.reset();
    tracing::info!("conversation history reset");
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn get_language_handler<P: LlmProvider + 'static>(
    State(state): State<AppState<P>>,
) -> Json<LanguageBody> {
    let language = state
        .language
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    Json(LanguageBody { language })
}

pub(crate) async fn set_language_handler<P: LlmProvider + 'static>(
    State(state): State<AppState<P>>,
    Json(body): Json<LanguageBody>,
) -> Result<Json<LanguageBody>, ApiError> {
    let language = body.language.trim().to_lowercase();
    if language.is_empty() {
        return Err(ApiError::BadRequest("language must not be empty".into()));
    }
    *state.language.write().unwrap_or_else(PoisonError::into_inner) = language.clone();
    tracing::info!(%language, "default language changed");
    Ok(Json(LanguageBody { language }))
}

impl<P> AppState<P> {
    fn language_or(&self, requested: Option<String>) -> String {
        requested
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| {
                self.language
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone()
            })
    }
}

fn start<P: LlmProvider + 'static>(
    state: &AppState<P>,
    request: GenerationRequest,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>> + use<P>>, ApiError> {
    let request = request.with_history(state.history.snapshot());
    let kind = request.kind;
    let request_summary = request.summary();
    let handle = state.coordinator.submit(DEFAULT_SLOT, request)?;
    tracing::info!(session = %handle.session_id(), ?kind, "session started");

    let history = std::sync::Arc::clone(&state.history);
    let watcher = handle.clone();
    tokio::spawn(async move {
        let last = watcher.wait().await;
        if last.state == SessionState::Completed {
            history.push(HistoryEntry {
                kind,
                request_summary,
                result: last.result.clone(),
            });
        }
    });

    Ok(snapshot_events(&handle))
}

/// One SSE event per snapshot; the stream ends after the final one.
fn snapshot_events(
    handle: &SessionHandle,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + use<>> {
    let events = handle.snapshots().map(|snapshot| {
        Ok(Event::default()
            .event("snapshot")
            .id(snapshot.seq.to_string())
            .data(snapshot.to_event_json().to_string()))
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_response_serializes() {
        let resp = HealthResponse {
            status: "ok",
            version: "0.1.0",
            provider: "mock".into(),
            uptime_secs: 42,
            busy: false,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
        assert!(json.contains("\"busy\":false"));
    }

    #[test]
    fn solution_body_defaults_language() {
        let json = r#"{"screenshots":["aGVsbG8="]}"#;
        let body: SolutionBody = serde_json::from_str(json).unwrap();
        assert!(body.language.is_none());
        assert_eq!(body.screenshots.len(), 1);
    }

    #[test]
    fn recording_body_optional_fields() {
        let json = r#"{"audio":"AAEC","instructions":"summarize"}"#;
        let body: RecordingBody = serde_json::from_str(json).unwrap();
        assert_eq!(body.instructions.as_deref(), Some("summarize"));
        assert!(body.filename.is_none());
        assert!(body.context.is_none());
    }
}
