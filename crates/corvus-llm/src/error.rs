use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{provider} rejected the credentials (status {status})")]
    Auth { provider: &'static str, status: u16 },

    #[error("rate limited by {provider}")]
    RateLimited { provider: &'static str },

    #[error("{provider} request failed (status {status})")]
    Status { provider: &'static str, status: u16 },

    #[error("empty response from {provider}")]
    EmptyResponse { provider: &'static str },

    #[error("SSE parse error: {0}")]
    SseParse(String),

    #[error("{provider} stream error: {kind}")]
    StreamError {
        provider: &'static str,
        kind: String,
    },

    #[error("transcription failed: {0}")]
    TranscriptionFailed(String),

    #[error("{0}")]
    Other(String),
}

/// Coarse classification of provider failures, the only error detail that
/// crosses the adapter boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Auth,
    RateLimited,
    Network,
    ProviderInternal,
}

impl ErrorClass {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::RateLimited => "rate_limited",
            Self::Network => "network",
            Self::ProviderInternal => "provider_internal",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl LlmError {
    /// Map an HTTP status to the error the adapters surface for it.
    #[must_use]
    pub fn from_status(provider: &'static str, status: reqwest::StatusCode) -> Self {
        match status.as_u16() {
            401 | 403 => Self::Auth {
                provider,
                status: status.as_u16(),
            },
            429 => Self::RateLimited { provider },
            code => Self::Status {
                provider,
                status: code,
            },
        }
    }

    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Auth { .. } => ErrorClass::Auth,
            Self::RateLimited { .. } => ErrorClass::RateLimited,
            Self::Http(e) => match e.status() {
                Some(s) if s == reqwest::StatusCode::UNAUTHORIZED => ErrorClass::Auth,
                Some(s) if s == reqwest::StatusCode::FORBIDDEN => ErrorClass::Auth,
                Some(s) if s == reqwest::StatusCode::TOO_MANY_REQUESTS => ErrorClass::RateLimited,
                Some(s) if s.is_server_error() => ErrorClass::ProviderInternal,
                _ => ErrorClass::Network,
            },
            Self::SseParse(_) => ErrorClass::Network,
            Self::StreamError { kind, .. } if kind.contains("overloaded") => {
                ErrorClass::RateLimited
            }
            Self::Json(_)
            | Self::Status { .. }
            | Self::EmptyResponse { .. }
            | Self::StreamError { .. }
            | Self::TranscriptionFailed(_)
            | Self::Other(_) => ErrorClass::ProviderInternal,
        }
    }

    /// Human-readable one-liner that never includes provider response text.
    #[must_use]
    pub fn summary(&self) -> String {
        match self.class() {
            ErrorClass::Auth => "the provider rejected the configured credentials".into(),
            ErrorClass::RateLimited => "the provider is rate limiting requests".into(),
            ErrorClass::Network => "the connection to the provider failed".into(),
            ErrorClass::ProviderInternal => "the provider returned an unusable response".into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_401_is_auth() {
        let err = LlmError::from_status("openai", reqwest::StatusCode::UNAUTHORIZED);
        assert_eq!(err.class(), ErrorClass::Auth);
    }

    #[test]
    fn status_429_is_rate_limited() {
        let err = LlmError::from_status("claude", reqwest::StatusCode::TOO_MANY_REQUESTS);
        assert!(matches!(err, LlmError::RateLimited { provider: "claude" }));
        assert_eq!(err.class(), ErrorClass::RateLimited);
    }

    #[test]
    fn status_500_is_provider_internal() {
        let err = LlmError::from_status("claude", reqwest::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.class(), ErrorClass::ProviderInternal);
    }

    #[test]
    fn sse_parse_is_network() {
        assert_eq!(
            LlmError::SseParse("eof".into()).class(),
            ErrorClass::Network
        );
    }

    #[test]
    fn overloaded_stream_error_is_rate_limited() {
        let err = LlmError::StreamError {
            provider: "claude",
            kind: "overloaded_error".into(),
        };
        assert_eq!(err.class(), ErrorClass::RateLimited);
    }

    #[test]
    fn summary_hides_provider_text() {
        let err = LlmError::Other("secret upstream body sk-123".into());
        assert!(!err.summary().contains("sk-123"));
    }

    #[test]
    fn error_class_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorClass::ProviderInternal).unwrap();
        assert_eq!(json, "\"provider_internal\"");
    }
}
