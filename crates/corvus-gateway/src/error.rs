use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use corvus_core::{ErrorKind, SessionError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to bind {0}: {1}")]
    Bind(String, std::io::Error),
    #[error("server error: {0}")]
    Server(String),
}

/// Request-level failure rendered as a JSON error body.
#[derive(Debug)]
pub(crate) enum ApiError {
    BadRequest(String),
    NotFound,
    Conflict(String),
    Session(SessionError),
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        Self::Session(e)
    }
}

#[derive(serde::Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<ErrorKind>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, ErrorBody { error: msg, kind: None }),
            Self::NotFound => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    error: "unknown session".into(),
                    kind: None,
                },
            ),
            Self::Conflict(msg) => (StatusCode::CONFLICT, ErrorBody { error: msg, kind: None }),
            Self::Session(e) => {
                let status = match &e {
                    SessionError::Busy { .. } => StatusCode::CONFLICT,
                    SessionError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                    SessionError::NoTranscriber => StatusCode::SERVICE_UNAVAILABLE,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let info = e.info();
                (
                    status,
                    ErrorBody {
                        error: info.summary,
                        kind: Some(info.kind),
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
