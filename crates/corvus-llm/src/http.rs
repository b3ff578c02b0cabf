//! Shared HTTP client construction for consistent timeout and TLS configuration.

use std::time::Duration;

/// Create a shared HTTP client with standard Corvus configuration.
///
/// Config: 30s connect timeout, `request_timeout` overall, rustls TLS,
/// `corvus/{version}` user-agent, redirect limit 10.
#[must_use]
pub fn default_client(request_timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .timeout(request_timeout)
        .user_agent(concat!("corvus/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("falling back to default HTTP client: {e}");
            reqwest::Client::new()
        })
}

/// Read a failed response and turn it into a classified error.
///
/// The body is logged at debug level only; it never reaches the caller.
pub(crate) async fn status_error(
    provider: &'static str,
    response: reqwest::Response,
) -> crate::error::LlmError {
    let status = response.status();
    let mut body = response.text().await.unwrap_or_default();
    truncate_chars(&mut body, 500);
    tracing::debug!(provider, %status, body, "provider request failed");
    crate::error::LlmError::from_status(provider, status)
}

/// Cut `text` to at most `max` characters, never inside a UTF-8 sequence.
fn truncate_chars(text: &mut String, max: usize) {
    if let Some((cut, _)) = text.char_indices().nth(max) {
        text.truncate(cut);
    }
}
