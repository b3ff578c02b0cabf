//! Session coordination, progressive parsing, transcription bridging, and
//! snapshot fan-out between callers and model providers.

pub mod bridge;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod parser;
pub mod prompt;
pub mod request;
pub mod result;
pub mod snapshot;
pub mod vault;

pub use bridge::{JobHandle, RemoteTranscriber, Transcriber, TranscriptionBridge, TranscriptionJob};
pub use config::Config;
pub use coordinator::{Coordinator, SessionHandle, SessionLimits};
pub use dispatch::{Delivery, Dispatcher, Subscription};
pub use error::{ErrorInfo, ErrorKind, ParseError, SessionError, TimeoutKind, TranscriptionError};
pub use parser::{ParserMode, ProgressiveParser};
pub use prompt::PromptBuilder;
pub use request::{
    AudioClip, ConversationHistory, GenerationRequest, HistoryEntry, ImageInput, RequestKind,
};
pub use result::{ResultBody, ResultKind, StructuredResult};
pub use snapshot::{Attempt, JobState, SessionState, Snapshot};

/// Conversation slot used when a caller has only one.
pub const DEFAULT_SLOT: &str = "default";
