use std::future::Future;
use std::pin::Pin;

use crate::error::LlmError;
use crate::stt::{SpeechToText, Transcription, audio_mime_type};

/// `OpenAI`-compatible `/audio/transcriptions` backend.
pub struct WhisperProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    language: Option<String>,
}

impl WhisperProvider {
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: model.into(),
            language: None,
        }
    }

    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

impl std::fmt::Debug for WhisperProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    duration: Option<f32>,
}

impl SpeechToText for WhisperProvider {
    fn transcribe(
        &self,
        audio: &[u8],
        filename: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = Result<Transcription, LlmError>> + Send + '_>> {
        let audio = audio.to_vec();
        let mime = audio_mime_type(filename);
        let fname = filename.unwrap_or("audio.wav").to_string();
        Box::pin(async move {
            let part = reqwest::multipart::Part::bytes(audio)
                .file_name(fname)
                .mime_str(mime)
                .map_err(|e| LlmError::TranscriptionFailed(e.to_string()))?;

            let mut form = reqwest::multipart::Form::new()
                .text("model", self.model.clone())
                .text("response_format", "json")
                .part("file", part);
            if let Some(lang) = &self.language {
                form = form.text("language", lang.clone());
            }

            let url = format!(
                "{}/audio/transcriptions",
                self.base_url.trim_end_matches('/')
            );
            let resp = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .multipart(form)
                .send()
                .await?;

            if !resp.status().is_success() {
                return Err(crate::http::status_error("whisper", resp).await);
            }

            let parsed: WhisperResponse = resp.json().await?;
            Ok(Transcription {
                text: parsed.text,
                language: parsed.language,
                duration_secs: parsed.duration,
                confidence: None,
            })
        })
    }

    fn name(&self) -> &'static str {
        "whisper"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn whisper_provider_debug_redacts_key() {
        let client = reqwest::Client::new();
        let provider = WhisperProvider::new(
            client,
            "sk-secret",
            "https://api.openai.com/v1",
            "whisper-1",
        );
        let debug = format!("{provider:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("whisper-1"));
    }

    #[tokio::test]
    async fn transcribe_parses_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"text": "two sum", "duration": 1.5})),
            )
            .mount(&server)
            .await;

        let provider =
            WhisperProvider::new(reqwest::Client::new(), "sk-test", server.uri(), "whisper-1");
        let t = provider.transcribe(b"RIFF", Some("a.wav")).await.unwrap();
        assert_eq!(t.text, "two sum");
        assert_eq!(t.duration_secs, Some(1.5));
        assert!(t.confidence.is_none());
    }

    #[tokio::test]
    async fn transcribe_401_is_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let provider =
            WhisperProvider::new(reqwest::Client::new(), "bad", server.uri(), "whisper-1");
        let err = provider.transcribe(b"RIFF", None).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Auth);
    }
}
