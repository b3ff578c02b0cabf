//! LLM and speech-to-text provider adapters.
//!
//! Every adapter reports a [`provider::ProviderInfo`] with its capability flags
//! and maps transport failures onto [`error::ErrorClass`].

pub mod any;
pub mod claude;
pub mod deepgram;
pub mod error;
pub mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod openai;
pub mod provider;
pub(crate) mod sse;
pub mod stt;
#[cfg(feature = "stt")]
pub mod whisper;

pub use any::AnyProvider;
pub use error::{ErrorClass, LlmError};
pub use provider::{Capabilities, LlmProvider, Message, ProviderInfo, Role};
