use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::result::{ResultKind, StructuredResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    SolutionGeneration,
    Optimization,
    RecordingAnalysis,
}

impl RequestKind {
    #[must_use]
    pub fn result_kind(self) -> ResultKind {
        match self {
            Self::SolutionGeneration => ResultKind::CodeSolution,
            Self::Optimization => ResultKind::CodeOptimization,
            Self::RecordingAnalysis => ResultKind::RecordingAnalysis,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInput {
    pub data: Vec<u8>,
    pub mime_type: String,
}

/// Recorded audio handed to the transcription bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub data: Arc<[u8]>,
    pub filename: Option<String>,
}

impl AudioClip {
    #[must_use]
    pub fn new(data: impl Into<Arc<[u8]>>, filename: Option<String>) -> Self {
        Self {
            data: data.into(),
            filename,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestInputs {
    Images(Vec<ImageInput>),
    SourceCode(String),
    Audio {
        clip: AudioClip,
        instructions: Option<String>,
        /// Text of an attached file the analysis should take into account.
        context: Option<String>,
    },
}

/// One prior exchange, replayed into later prompts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub kind: RequestKind,
    pub request_summary: String,
    pub result: StructuredResult,
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub id: Uuid,
    pub kind: RequestKind,
    pub inputs: RequestInputs,
    pub language: Option<String>,
    pub history: Arc<[HistoryEntry]>,
}

impl GenerationRequest {
    fn new(kind: RequestKind, inputs: RequestInputs, language: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            inputs,
            language,
            history: Arc::from(Vec::new()),
        }
    }

    #[must_use]
    pub fn solution(images: Vec<ImageInput>, language: Option<String>) -> Self {
        Self::new(
            RequestKind::SolutionGeneration,
            RequestInputs::Images(images),
            language,
        )
    }

    #[must_use]
    pub fn optimization(code: impl Into<String>, language: Option<String>) -> Self {
        Self::new(
            RequestKind::Optimization,
            RequestInputs::SourceCode(code.into()),
            language,
        )
    }

    #[must_use]
    pub fn recording(clip: AudioClip, instructions: Option<String>) -> Self {
        Self::new(
            RequestKind::RecordingAnalysis,
            RequestInputs::Audio {
                clip,
                instructions,
                context: None,
            },
            None,
        )
    }

    #[must_use]
    pub fn with_context(mut self, text: impl Into<String>) -> Self {
        if let RequestInputs::Audio { context, .. } = &mut self.inputs {
            *context = Some(text.into());
        }
        self
    }

    #[must_use]
    pub fn with_history(mut self, history: Arc<[HistoryEntry]>) -> Self {
        self.history = history;
        self
    }

    /// Whether the inputs match what the kind needs.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        match (&self.kind, &self.inputs) {
            (RequestKind::SolutionGeneration, RequestInputs::Images(images)) => !images.is_empty(),
            (RequestKind::Optimization, RequestInputs::SourceCode(code)) => !code.trim().is_empty(),
            (RequestKind::RecordingAnalysis, RequestInputs::Audio { clip, .. }) => {
                !clip.data.is_empty()
            }
            _ => false,
        }
    }

    /// Short human-readable description kept in history.
    #[must_use]
    pub fn summary(&self) -> String {
        match &self.inputs {
            RequestInputs::Images(images) => format!(
                "solve the problem in {} screenshot(s){}",
                images.len(),
                self.language
                    .as_deref()
                    .map(|l| format!(" using {l}"))
                    .unwrap_or_default()
            ),
            RequestInputs::SourceCode(code) => {
                format!("optimize {} lines of code", code.lines().count())
            }
            RequestInputs::Audio { instructions, .. } => match instructions {
                Some(i) if !i.trim().is_empty() => format!("analyze recording: {}", i.trim()),
                _ => "analyze recording".to_owned(),
            },
        }
    }
}

/// Prior exchanges of one conversation slot, in insertion order.
///
/// Owned by the caller; sessions only ever see an immutable snapshot.
#[derive(Debug, Default)]
pub struct ConversationHistory {
    entries: Mutex<Vec<HistoryEntry>>,
}

impl ConversationHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Vec<HistoryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, entry: HistoryEntry) {
        self.entries().push(entry);
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<[HistoryEntry]> {
        Arc::from(self.entries().as_slice())
    }

    pub fn reset(&self) {
        self.entries().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
