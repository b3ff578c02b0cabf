use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorInfo;
use crate::result::StructuredResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Pending,
    Streaming,
    Finalizing,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attempt {
    Streaming,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionSummary {
    pub job_id: Uuid,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

/// One published view of a session. Consumers replace, never append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub session_id: Uuid,
    pub request_id: Uuid,
    pub seq: u64,
    pub state: SessionState,
    pub attempt: Attempt,
    pub result: StructuredResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<TranscriptionSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl Snapshot {
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.state.is_terminal()
    }

    /// Wire form for event streams: the snapshot with `progress` and
    /// `is_complete` lifted to the top level.
    #[must_use]
    pub fn to_event_json(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(obj) = value.as_object_mut() {
            obj.insert("progress".into(), self.result.progress.into());
            obj.insert("is_complete".into(), self.result.is_complete.into());
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{ResultKind, StructuredResult};

    #[test]
    fn event_json_lifts_progress() {
        let mut result = StructuredResult::empty(ResultKind::CodeSolution);
        result.progress = 40;
        let snap = Snapshot {
            session_id: Uuid::nil(),
            request_id: Uuid::nil(),
            seq: 3,
            state: SessionState::Streaming,
            attempt: Attempt::Streaming,
            result,
            transcription: None,
            error: None,
        };
        let json = snap.to_event_json();
        assert_eq!(json["progress"], 40);
        assert_eq!(json["is_complete"], false);
        assert_eq!(json["state"], "streaming");
        assert_eq!(json["result"]["kind"], "code_solution");
        assert!(json.get("error").is_none());
        assert!(!snap.is_final());
    }

    #[test]
    fn terminal_states() {
        assert!(SessionState::Cancelled.is_terminal());
        assert!(!SessionState::Finalizing.is_terminal());
        assert!(JobState::TimedOut.is_terminal());
        assert!(!JobState::Running.is_terminal());
    }
}
