use std::future::Future;
use std::pin::Pin;

use crate::error::LlmError;

#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    pub text: String,
    pub language: Option<String>,
    pub duration_secs: Option<f32>,
    /// Backend-reported confidence in `[0, 1]`, when the backend reports one.
    pub confidence: Option<f32>,
}

/// Async trait for speech-to-text backends.
pub trait SpeechToText: Send + Sync {
    /// Transcribe audio bytes into text.
    ///
    /// # Errors
    ///
    /// Returns `LlmError::TranscriptionFailed` if the backend rejects the request.
    fn transcribe(
        &self,
        audio: &[u8],
        filename: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = Result<Transcription, LlmError>> + Send + '_>>;

    fn name(&self) -> &str;
}

/// Guess a MIME type from an audio file name. Defaults to WAV.
#[must_use]
pub fn audio_mime_type(filename: Option<&str>) -> &'static str {
    let ext = filename
        .and_then(|f| f.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("m4a" | "mp4") => "audio/mp4",
        Some("ogg" | "oga") => "audio/ogg",
        Some("webm") => "audio/webm",
        Some("flac") => "audio/flac",
        _ => "audio/wav",
    }
}
