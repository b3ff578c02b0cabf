use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;

use crate::error::LlmError;
use crate::stt::{SpeechToText, Transcription, audio_mime_type};

const API_URL: &str = "https://api.deepgram.com/v1";

/// Deepgram pre-recorded `/listen` backend. Reports a per-transcript confidence.
pub struct DeepgramProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    language: String,
}

impl DeepgramProvider {
    #[must_use]
    pub fn new(client: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: API_URL.to_owned(),
            model: "nova-2".to_owned(),
            language: "en".to_owned(),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    fn listen_url(&self) -> String {
        format!(
            "{}/listen?model={}&smart_format=true&punctuate=true&paragraphs=true\
             &utterances=true&diarize=false&language={}",
            self.base_url.trim_end_matches('/'),
            self.model,
            self.language
        )
    }
}

impl std::fmt::Debug for DeepgramProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeepgramProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("language", &self.language)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct ListenResponse {
    #[serde(default)]
    metadata: Option<ListenMetadata>,
    results: ListenResults,
}

#[derive(Deserialize)]
struct ListenMetadata {
    #[serde(default)]
    duration: Option<f32>,
}

#[derive(Deserialize)]
struct ListenResults {
    channels: Vec<Channel>,
}

#[derive(Deserialize)]
struct Channel {
    alternatives: Vec<Alternative>,
    #[serde(default)]
    detected_language: Option<String>,
}

#[derive(Deserialize)]
struct Alternative {
    transcript: String,
    #[serde(default)]
    confidence: Option<f32>,
}

impl SpeechToText for DeepgramProvider {
    fn transcribe(
        &self,
        audio: &[u8],
        filename: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = Result<Transcription, LlmError>> + Send + '_>> {
        let audio = audio.to_vec();
        let mime = audio_mime_type(filename);
        Box::pin(async move {
            let resp = self
                .client
                .post(self.listen_url())
                .header("authorization", format!("Token {}", self.api_key))
                .header("content-type", mime)
                .body(audio)
                .send()
                .await?;

            if !resp.status().is_success() {
                return Err(crate::http::status_error("deepgram", resp).await);
            }

            let parsed: ListenResponse = resp.json().await?;
            let channel = parsed
                .results
                .channels
                .into_iter()
                .next()
                .ok_or_else(|| LlmError::TranscriptionFailed("no channels in response".into()))?;
            let language = channel.detected_language;
            let alt = channel.alternatives.into_iter().next().ok_or_else(|| {
                LlmError::TranscriptionFailed("no alternatives in response".into())
            })?;

            Ok(Transcription {
                text: alt.transcript,
                language: language.or_else(|| Some(self.language.clone())),
                duration_secs: parsed.metadata.and_then(|m| m.duration),
                confidence: alt.confidence,
            })
        })
    }

    fn name(&self) -> &'static str {
        "deepgram"
    }
}
