use corvus_llm::{ErrorClass, LlmError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("no usable structured content in the response")]
    Malformed,

    #[error("response ended without required fields: {}", missing.join(", "))]
    IncompleteAtFinalize { missing: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TranscriptionError {
    #[error("transcription timed out")]
    Timeout,

    #[error("transcription confidence {confidence:.2} is below {threshold:.2}")]
    LowConfidence { confidence: f32, threshold: f32 },

    #[error("transcription produced no text")]
    Empty,

    #[error("transcription backend failed: {0}")]
    Backend(String),

    #[error("transcription cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutKind {
    FirstByte,
    Overall,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("slot {slot} already has an active session")]
    Busy { slot: String },

    #[error("request {0} is missing the inputs its kind requires")]
    InvalidRequest(String),

    #[error("recording requests need a transcription backend")]
    NoTranscriber,

    #[error(transparent)]
    Provider(#[from] LlmError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Transcription(#[from] TranscriptionError),

    #[error("{0:?} timeout elapsed")]
    Timeout(TimeoutKind),

    #[error("session cancelled")]
    Cancelled,

    #[error("session task ended without a result")]
    Aborted,
}

/// Machine-readable failure kind carried by terminal snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "category", content = "detail", rename_all = "snake_case")]
pub enum ErrorKind {
    Provider(ErrorClass),
    Parse(ParseErrorKind),
    Transcription(TranscriptionErrorKind),
    Timeout(TimeoutKind),
    Busy,
    Cancelled,
    Aborted,
    InvalidRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseErrorKind {
    Malformed,
    IncompleteAtFinalize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptionErrorKind {
    Timeout,
    LowConfidence,
    Empty,
    Backend,
    Cancelled,
}

/// Error detail exposed to consumers: a kind plus a line of prose that never
/// contains provider response text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub summary: String,
}

impl TranscriptionError {
    #[must_use]
    pub fn kind(&self) -> TranscriptionErrorKind {
        match self {
            Self::Timeout => TranscriptionErrorKind::Timeout,
            Self::LowConfidence { .. } => TranscriptionErrorKind::LowConfidence,
            Self::Empty => TranscriptionErrorKind::Empty,
            Self::Backend(_) => TranscriptionErrorKind::Backend,
            Self::Cancelled => TranscriptionErrorKind::Cancelled,
        }
    }
}

impl SessionError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Busy { .. } => ErrorKind::Busy,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::NoTranscriber => ErrorKind::Transcription(TranscriptionErrorKind::Backend),
            Self::Provider(e) => ErrorKind::Provider(e.class()),
            Self::Parse(ParseError::Malformed) => ErrorKind::Parse(ParseErrorKind::Malformed),
            Self::Parse(ParseError::IncompleteAtFinalize { .. }) => {
                ErrorKind::Parse(ParseErrorKind::IncompleteAtFinalize)
            }
            Self::Transcription(e) => ErrorKind::Transcription(e.kind()),
            Self::Timeout(k) => ErrorKind::Timeout(*k),
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Aborted => ErrorKind::Aborted,
        }
    }

    #[must_use]
    pub fn info(&self) -> ErrorInfo {
        let summary = match self {
            Self::Provider(e) => e.summary(),
            Self::Transcription(TranscriptionError::Backend(_)) => {
                "the transcription backend failed".to_owned()
            }
            other => other.to_string(),
        };
        ErrorInfo {
            kind: self.kind(),
            summary,
        }
    }
}
