use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::http::status_error;
use crate::provider::{
    Capabilities, ChatStream, LlmProvider, Message, MessagePart, ProviderInfo, Role,
};
use crate::sse::openai_sse_to_stream;

#[derive(Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    max_tokens: u32,
    info: ProviderInfo,
}

impl fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("client", &"<reqwest::Client>")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.info.model)
            .field("max_tokens", &self.max_tokens)
            .field("capabilities", &self.info.capabilities)
            .finish()
    }
}

impl OpenAiProvider {
    #[must_use]
    pub fn new(api_key: String, mut base_url: String, model: String, max_tokens: u32) -> Self {
        while base_url.ends_with('/') {
            base_url.pop();
        }
        let info = ProviderInfo::new("openai", "OpenAI", model).with_capabilities(Capabilities {
            streaming: true,
            structured_output: true,
            vision: true,
        });
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            max_tokens,
            info,
        }
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
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

    /// Override the advertised capabilities, e.g. for compatible endpoints
    /// that lack streaming or JSON mode.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.info.capabilities = capabilities;
        self
    }

    fn build_request(&self, messages: &[Message], stream: bool) -> reqwest::RequestBuilder {
        let response_format = self
            .info
            .capabilities
            .structured_output
            .then_some(ResponseFormat {
                format_type: "json_object",
            });
        let body = ChatRequest {
            model: &self.info.model,
            messages: convert_messages(messages),
            max_tokens: self.max_tokens,
            temperature: self.info.temperature,
            stream,
            response_format,
        };

        self.client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
    }
}

impl LlmProvider for OpenAiProvider {
    async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
        let response = self.build_request(messages, false).send().await?;
        if !response.status().is_success() {
            return Err(status_error("openai", response).await);
        }

        let resp: OpenAiChatResponse = response.json().await?;
        resp.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.is_empty())
            .ok_or(LlmError::EmptyResponse { provider: "openai" })
    }

    async fn chat_stream(&self, messages: &[Message]) -> Result<ChatStream, LlmError> {
        let response = self.build_request(messages, true).send().await?;
        if !response.status().is_success() {
            return Err(status_error("openai", response).await);
        }
        Ok(openai_sse_to_stream(response))
    }

    fn info(&self) -> &ProviderInfo {
        &self.info
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn convert_messages(messages: &[Message]) -> Vec<ApiMessage> {
    messages
        .iter()
        .map(|msg| {
            let content = if msg.has_images() {
                let mut parts = Vec::with_capacity(msg.parts.len() + 1);
                if !msg.content.is_empty() {
                    parts.push(ContentPart::Text {
                        text: msg.content.clone(),
                    });
                }
                for part in &msg.parts {
                    match part {
                        MessagePart::Text { text } => {
                            parts.push(ContentPart::Text { text: text.clone() });
                        }
                        MessagePart::Image { data, mime_type } => {
                            let b64 = STANDARD.encode(data);
                            parts.push(ContentPart::ImageUrl {
                                image_url: ImageUrlDetail {
                                    url: format!("data:{mime_type};base64,{b64}"),
                                },
                            });
                        }
                    }
                }
                ApiContent::Parts(parts)
            } else {
                ApiContent::Text(msg.content.clone())
            };
            ApiMessage {
                role: role_str(msg.role),
                content,
            }
        })
        .collect()
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
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
    Parts(Vec<ContentPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrlDetail },
}

#[derive(Serialize)]
struct ImageUrlDetail {
    url: String,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}
