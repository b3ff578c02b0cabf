use std::pin::Pin;

use futures_core::Stream;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Ordered text deltas produced by an open provider stream.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessagePart {
    Text { text: String },
    Image { data: Vec<u8>, mime_type: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

impl Message {
    #[must_use]
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            parts: vec![],
        }
    }

    #[must_use]
    pub fn with_image(mut self, data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        self.parts.push(MessagePart::Image {
            data,
            mime_type: mime_type.into(),
        });
        self
    }

    #[must_use]
    pub fn has_images(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, MessagePart::Image { .. }))
    }
}

/// What a backend can do. Fixed when the provider is constructed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub streaming: bool,
    pub structured_output: bool,
    pub vision: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            streaming: true,
            structured_output: false,
            vision: false,
        }
    }
}

/// Immutable description of a configured provider. Swapped wholesale when
/// configuration changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub id: String,
    pub display_name: String,
    pub capabilities: Capabilities,
    pub model: String,
    pub temperature: f32,
    /// Name of the secret the credential was resolved from, never the secret itself.
    pub credential_ref: Option<String>,
}

impl ProviderInfo {
    #[must_use]
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            capabilities: Capabilities::default(),
            model: model.into(),
            temperature: 1.0,
            credential_ref: None,
        }
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    #[must_use]
    pub fn with_credential_ref(mut self, credential_ref: impl Into<String>) -> Self {
        self.credential_ref = Some(credential_ref.into());
        self
    }
}

pub trait LlmProvider: Send + Sync {
    /// Request a single complete response.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider fails to communicate or the response is invalid.
    fn chat(&self, messages: &[Message]) -> impl Future<Output = Result<String, LlmError>> + Send;

    /// Open a token stream. The stream ends naturally or with an error item.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be opened.
    fn chat_stream(
        &self,
        messages: &[Message],
    ) -> impl Future<Output = Result<ChatStream, LlmError>> + Send;

    fn info(&self) -> &ProviderInfo;

    fn name(&self) -> &str {
        &self.info().id
    }

    fn capabilities(&self) -> Capabilities {
        self.info().capabilities
    }

    fn supports_streaming(&self) -> bool {
        self.capabilities().streaming
    }

    fn supports_structured_output(&self) -> bool {
        self.capabilities().structured_output
    }

    fn supports_vision(&self) -> bool {
        self.capabilities().vision
    }
}
