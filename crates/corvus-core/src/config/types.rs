use std::collections::BTreeMap;
use std::time::Duration;

use corvus_llm::Capabilities;
use serde::{Deserialize, Serialize};

use crate::coordinator::SessionLimits;
use crate::vault::Secret;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stt: Option<SttConfig>,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(skip)]
    pub secrets: ResolvedSecrets,
}

/// LLM provider backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Claude,
    OpenAi,
    Mock,
}

impl ProviderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::OpenAi => "openai",
            Self::Mock => "mock",
        }
    }

    /// Env var consulted for the API key when `credential_ref` is not set.
    #[must_use]
    pub fn default_credential_ref(self) -> Option<&'static str> {
        match self {
            Self::Claude => Some("ANTHROPIC_API_KEY"),
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::Mock => None,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-flag override of a backend's built-in capabilities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct CapabilitiesOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_output: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vision: Option<bool>,
}

impl CapabilitiesOverride {
    #[must_use]
    pub fn apply(self, base: Capabilities) -> Capabilities {
        Capabilities {
            streaming: self.streaming.unwrap_or(base.streaming),
            structured_output: self.structured_output.unwrap_or(base.structured_output),
            vision: self.vision.unwrap_or(base.vision),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: ProviderKind,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<CapabilitiesOverride>,
    /// Name of the secret holding the API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_ref: Option<String>,
}

fn default_provider() -> ProviderKind {
    ProviderKind::OpenAi
}

fn default_model() -> String {
    "gpt-4o".into()
}

fn default_temperature() -> f32 {
    1.0
}

fn default_max_tokens() -> u32 {
    4096
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            capabilities: None,
            credential_ref: None,
        }
    }
}

impl LlmConfig {
    #[must_use]
    pub fn credential_ref(&self) -> Option<&str> {
        self.credential_ref
            .as_deref()
            .or_else(|| self.provider.default_credential_ref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SttProviderKind {
    Whisper,
    Deepgram,
}

impl SttProviderKind {
    #[must_use]
    pub fn default_credential_ref(self) -> &'static str {
        match self {
            Self::Whisper => "OPENAI_API_KEY",
            Self::Deepgram => "DEEPGRAM_API_KEY",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SttConfig {
    #[serde(default = "default_stt_provider")]
    pub provider: SttProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_ref: Option<String>,
    #[serde(default = "default_stt_timeout")]
    pub timeout_seconds: u64,
    /// Transcripts reporting a lower confidence are rejected.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    #[serde(default = "default_stt_workers")]
    pub workers: usize,
}

pub(crate) fn default_stt_provider() -> SttProviderKind {
    SttProviderKind::Deepgram
}

fn default_stt_timeout() -> u64 {
    30
}

fn default_min_confidence() -> f32 {
    0.3
}

fn default_stt_workers() -> usize {
    1
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            provider: default_stt_provider(),
            model: None,
            language: None,
            base_url: None,
            credential_ref: None,
            timeout_seconds: default_stt_timeout(),
            min_confidence: default_min_confidence(),
            workers: default_stt_workers(),
        }
    }
}

impl SttConfig {
    #[must_use]
    pub fn credential_ref(&self) -> &str {
        self.credential_ref
            .as_deref()
            .unwrap_or_else(|| self.provider.default_credential_ref())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    #[serde(default = "default_overall_timeout")]
    pub overall_timeout_seconds: u64,
    #[serde(default = "default_first_byte_timeout")]
    pub first_byte_timeout_seconds: u64,
    #[serde(default = "default_retain_finished")]
    pub retain_finished: usize,
}

fn default_overall_timeout() -> u64 {
    120
}

fn default_first_byte_timeout() -> u64 {
    15
}

fn default_retain_finished() -> usize {
    16
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            overall_timeout_seconds: default_overall_timeout(),
            first_byte_timeout_seconds: default_first_byte_timeout(),
            retain_finished: default_retain_finished(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_redelivery_ms")]
    pub redelivery_ms: u64,
}

fn default_queue_capacity() -> usize {
    32
}

fn default_redelivery_ms() -> u64 {
    1000
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            redelivery_ms: default_redelivery_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PromptsConfig {
    #[serde(default = "default_language")]
    pub default_language: String,
    /// Replacement texts keyed by template name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub templates: BTreeMap<String, String>,
}

fn default_language() -> String {
    "python".into()
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            default_language: default_language(),
            templates: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_enabled")]
    pub enabled: bool,
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Requests per minute per client address; 0 disables the limit.
    #[serde(default = "default_gateway_rate_limit")]
    pub rate_limit: u32,
    #[serde(default = "default_gateway_max_body")]
    pub max_body_size: usize,
}

fn default_gateway_enabled() -> bool {
    true
}

fn default_gateway_bind() -> String {
    "127.0.0.1".into()
}

fn default_gateway_port() -> u16 {
    8000
}

fn default_gateway_rate_limit() -> u32 {
    120
}

fn default_gateway_max_body() -> usize {
    16 * 1_048_576
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: default_gateway_enabled(),
            bind: default_gateway_bind(),
            port: default_gateway_port(),
            auth_token: None,
            rate_limit: default_gateway_rate_limit(),
            max_body_size: default_gateway_max_body(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ResolvedSecrets {
    pub llm_api_key: Option<Secret>,
    pub stt_api_key: Option<Secret>,
}

impl Config {
    /// Time budgets handed to the coordinator.
    #[must_use]
    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            overall_timeout: Duration::from_secs(self.session.overall_timeout_seconds),
            first_byte_timeout: Duration::from_secs(self.session.first_byte_timeout_seconds),
            transcription_timeout: Duration::from_secs(
                self.stt
                    .as_ref()
                    .map_or_else(default_stt_timeout, |s| s.timeout_seconds),
            ),
            retain_finished: self.session.retain_finished,
        }
    }
}
