use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::http::status_error;
use crate::provider::{
    Capabilities, ChatStream, LlmProvider, Message, MessagePart, ProviderInfo, Role,
};
use crate::sse::claude_sse_to_stream;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Clone)]
pub struct ClaudeProvider {
    client: reqwest::Client,
    api_key: String,
    api_url: String,
    max_tokens: u32,
    info: ProviderInfo,
}

impl fmt::Debug for ClaudeProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaudeProvider")
            .field("client", &"<reqwest::Client>")
            .field("api_key", &"<redacted>")
            .field("api_url", &self.api_url)
            .field("model", &self.info.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl ClaudeProvider {
    #[must_use]
    pub fn new(api_key: String, model: String, max_tokens: u32) -> Self {
        let info = ProviderInfo::new("claude", "Anthropic Claude", model).with_capabilities(
            Capabilities {
                streaming: true,
                structured_output: false,
                vision: true,
            },
        );
        Self {
            client: reqwest::Client::new(),
            api_key,
            api_url: API_URL.to_owned(),
            max_tokens,
            info,
        }
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Point the adapter at a different messages endpoint (proxies, tests).
    #[must_use]
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.info.temperature = temperature;
        self
    }

    #[must_use]
    pub fn with_credential_ref(mut self, credential_ref: impl Into<String>) -> Self {
        self.info.credential_ref = Some(credential_ref.into());
        self
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.info.capabilities = capabilities;
        self
    }

    fn build_request(&self, messages: &[Message], stream: bool) -> reqwest::RequestBuilder {
        let (system, chat_messages) = split_messages(messages);

        let body = RequestBody {
            model: &self.info.model,
            max_tokens: self.max_tokens,
            temperature: self.info.temperature,
            system: system.as_deref(),
            messages: &chat_messages,
            stream,
        };

        self.client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
    }

    async fn send_request(&self, messages: &[Message]) -> Result<String, LlmError> {
        let response = self.build_request(messages, false).send().await?;
        if !response.status().is_success() {
            return Err(status_error("claude", response).await);
        }

        let resp: ApiResponse = response.json().await?;
        let text: String = resp
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect();

        if text.is_empty() {
            return Err(LlmError::EmptyResponse { provider: "claude" });
        }
        Ok(text)
    }
}

impl LlmProvider for ClaudeProvider {
    async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.send_request(messages).await
    }

    async fn chat_stream(&self, messages: &[Message]) -> Result<ChatStream, LlmError> {
        let response = self.build_request(messages, true).send().await?;
        if !response.status().is_success() {
            return Err(status_error("claude", response).await);
        }
        Ok(claude_sse_to_stream(response))
    }

    fn info(&self) -> &ProviderInfo {
        &self.info
    }
}

fn split_messages(messages: &[Message]) -> (Option<String>, Vec<ApiMessage>) {
    let mut system_parts = Vec::new();
    let mut chat = Vec::new();

    for msg in messages {
        let role = match msg.role {
            Role::System => {
                system_parts.push(msg.content.clone());
                continue;
            }
            Role::User => "user",
            Role::Assistant => "assistant",
        };

        let content = if msg.has_images() {
            let mut blocks = Vec::with_capacity(msg.parts.len() + 1);
            for part in &msg.parts {
                match part {
                    MessagePart::Image { data, mime_type } => blocks.push(ContentBlock::Image {
                        source: ImageSource {
                            source_type: "base64",
                            media_type: mime_type.clone(),
                            data: STANDARD.encode(data),
                        },
                    }),
                    MessagePart::Text { text } => {
                        blocks.push(ContentBlock::Text { text: text.clone() });
                    }
                }
            }
            if !msg.content.is_empty() {
                blocks.push(ContentBlock::Text {
                    text: msg.content.clone(),
                });
            }
            ApiContent::Blocks(blocks)
        } else {
            ApiContent::Text(msg.content.clone())
        };

        chat.push(ApiMessage { role, content });
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };

    (system, chat)
}

#[derive(Serialize)]
struct RequestBody<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: &'a [ApiMessage],
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: ApiContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum ApiContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    Image { source: ImageSource },
}

#[derive(Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    source_type: &'static str,
    media_type: String,
    data: String,
}

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ResponseBlock>,
}

#[derive(Deserialize)]
struct ResponseBlock {
    #[serde(default)]
    text: Option<String>,
}
