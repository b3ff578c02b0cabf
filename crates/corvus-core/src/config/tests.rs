use std::io::Write;
use std::time::Duration;

use serial_test::serial;

use super::*;
use crate::vault::MockVaultProvider;

const ENV_KEYS: [&str; 15] = [
    "CORVUS_LLM_PROVIDER",
    "CORVUS_LLM_MODEL",
    "CORVUS_LLM_BASE_URL",
    "CORVUS_LLM_TEMPERATURE",
    "CORVUS_STT_PROVIDER",
    "CORVUS_STT_MODEL",
    "CORVUS_STT_MIN_CONFIDENCE",
    "CORVUS_SESSION_TIMEOUT",
    "CORVUS_FIRST_BYTE_TIMEOUT",
    "CORVUS_DEFAULT_LANGUAGE",
    "CORVUS_GATEWAY_ENABLED",
    "CORVUS_GATEWAY_BIND",
    "CORVUS_GATEWAY_PORT",
    "CORVUS_GATEWAY_TOKEN",
    "CORVUS_CONFIG",
];

fn clear_env() {
    for key in ENV_KEYS {
        unsafe { std::env::remove_var(key) };
    }
}

fn write_config(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("corvus.toml");
    let mut f = std::fs::File::create(&path).unwrap();
    write!(f, "{body}").unwrap();
    path
}

#[test]
fn defaults_when_file_missing() {
    let config = Config::default();
    assert_eq!(config.llm.provider, ProviderKind::OpenAi);
    assert_eq!(config.llm.model, "gpt-4o");
    assert!((config.llm.temperature - 1.0).abs() < f32::EPSILON);
    assert_eq!(config.llm.credential_ref(), Some("OPENAI_API_KEY"));
    assert!(config.stt.is_none());
    assert_eq!(config.session.overall_timeout_seconds, 120);
    assert_eq!(config.session.first_byte_timeout_seconds, 15);
    assert_eq!(config.dispatch.queue_capacity, 32);
    assert_eq!(config.prompts.default_language, "python");
    assert!(config.gateway.enabled);
    assert_eq!(config.gateway.port, 8000);
    assert_eq!(config.gateway.rate_limit, 120);
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn load_missing_file_uses_defaults() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.llm.model, "gpt-4o");
}

#[test]
#[serial]
fn parse_full_toml() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
[llm]
provider = "claude"
model = "claude-sonnet-4-5-20250929"
temperature = 0.2
max_tokens = 8192
credential_ref = "MY_CLAUDE_KEY"

[llm.capabilities]
structured_output = true

[stt]
provider = "whisper"
model = "whisper-1"
timeout_seconds = 45
min_confidence = 0.5
workers = 2

[session]
overall_timeout_seconds = 60
first_byte_timeout_seconds = 5
retain_finished = 4

[dispatch]
queue_capacity = 8

[prompts]
default_language = "rust"

[prompts.templates]
mcq = "Answer the multiple choice question."

[gateway]
bind = "0.0.0.0"
port = 9100
auth_token = "abc"
rate_limit = 0
"#,
    );

    let config = Config::load(&path).unwrap();
    assert_eq!(config.llm.provider, ProviderKind::Claude);
    assert_eq!(config.llm.max_tokens, 8192);
    assert_eq!(config.llm.credential_ref(), Some("MY_CLAUDE_KEY"));
    let caps = config
        .llm
        .capabilities
        .unwrap()
        .apply(corvus_llm::Capabilities::default());
    assert!(caps.structured_output);
    assert!(caps.streaming);

    let stt = config.stt.as_ref().unwrap();
    assert_eq!(stt.provider, SttProviderKind::Whisper);
    assert_eq!(stt.workers, 2);
    assert_eq!(stt.credential_ref(), "OPENAI_API_KEY");

    let limits = config.session_limits();
    assert_eq!(limits.overall_timeout, Duration::from_secs(60));
    assert_eq!(limits.first_byte_timeout, Duration::from_secs(5));
    assert_eq!(limits.transcription_timeout, Duration::from_secs(45));
    assert_eq!(limits.retain_finished, 4);

    assert_eq!(config.dispatch.queue_capacity, 8);
    assert_eq!(config.prompts.default_language, "rust");
    assert_eq!(
        config.prompts.templates.get("mcq").map(String::as_str),
        Some("Answer the multiple choice question.")
    );
    assert_eq!(config.gateway.port, 9100);
    assert_eq!(config.gateway.auth_token.as_deref(), Some("abc"));
    assert_eq!(config.gateway.rate_limit, 0);
}

#[test]
#[serial]
fn invalid_toml_is_an_error() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[llm\nprovider = ");
    assert!(Config::load(&path).is_err());
}

#[test]
#[serial]
fn unknown_provider_is_an_error() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[llm]\nprovider = \"ollama\"\n");
    assert!(Config::load(&path).is_err());
}

#[test]
#[serial]
fn env_overrides() {
    clear_env();
    let mut config = Config::default();

    unsafe {
        std::env::set_var("CORVUS_LLM_PROVIDER", "claude");
        std::env::set_var("CORVUS_LLM_MODEL", "claude-haiku");
        std::env::set_var("CORVUS_LLM_TEMPERATURE", "0.5");
        std::env::set_var("CORVUS_SESSION_TIMEOUT", "90");
        std::env::set_var("CORVUS_FIRST_BYTE_TIMEOUT", "7");
        std::env::set_var("CORVUS_DEFAULT_LANGUAGE", "go");
        std::env::set_var("CORVUS_GATEWAY_PORT", "9001");
        std::env::set_var("CORVUS_GATEWAY_TOKEN", "tok");
    }
    config.apply_env_overrides();
    clear_env();

    assert_eq!(config.llm.provider, ProviderKind::Claude);
    assert_eq!(config.llm.model, "claude-haiku");
    assert!((config.llm.temperature - 0.5).abs() < f32::EPSILON);
    assert_eq!(config.session.overall_timeout_seconds, 90);
    assert_eq!(config.session.first_byte_timeout_seconds, 7);
    assert_eq!(config.prompts.default_language, "go");
    assert_eq!(config.gateway.port, 9001);
    assert_eq!(config.gateway.auth_token.as_deref(), Some("tok"));
}

#[test]
#[serial]
fn invalid_env_values_are_ignored() {
    clear_env();
    let mut config = Config::default();
    unsafe {
        std::env::set_var("CORVUS_LLM_PROVIDER", "bogus");
        std::env::set_var("CORVUS_GATEWAY_PORT", "not-a-port");
    }
    config.apply_env_overrides();
    clear_env();

    assert_eq!(config.llm.provider, ProviderKind::OpenAi);
    assert_eq!(config.gateway.port, 8000);
}

#[test]
#[serial]
fn stt_env_creates_section() {
    clear_env();
    let mut config = Config::default();
    unsafe {
        std::env::set_var("CORVUS_STT_PROVIDER", "deepgram");
        std::env::set_var("CORVUS_STT_MIN_CONFIDENCE", "0.6");
    }
    config.apply_env_overrides();
    clear_env();

    let stt = config.stt.unwrap();
    assert_eq!(stt.provider, SttProviderKind::Deepgram);
    assert!((stt.min_confidence - 0.6).abs() < f32::EPSILON);
    assert_eq!(stt.credential_ref(), "DEEPGRAM_API_KEY");
}

#[test]
fn validate_rejects_out_of_range_values() {
    let mut config = Config::default();
    config.llm.temperature = 3.0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.stt = Some(SttConfig {
        workers: 3,
        ..SttConfig::default()
    });
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.stt = Some(SttConfig {
        min_confidence: 1.5,
        ..SttConfig::default()
    });
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.session.first_byte_timeout_seconds = 500;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.dispatch.queue_capacity = 0;
    assert!(config.validate().is_err());
}

#[test]
fn mock_provider_needs_no_credential() {
    let mut config = Config::default();
    config.llm.provider = ProviderKind::Mock;
    assert!(config.llm.credential_ref().is_none());
}

#[tokio::test]
async fn resolve_secrets_uses_credential_refs() {
    let mut config = Config::default();
    config.llm.credential_ref = Some("LLM_KEY".into());
    config.stt = Some(SttConfig::default());
    let vault = MockVaultProvider::new()
        .with_secret("LLM_KEY", "sk-llm")
        .with_secret("DEEPGRAM_API_KEY", "dg-key")
        .with_secret("CORVUS_GATEWAY_TOKEN", "gw");

    config.resolve_secrets(&vault).await.unwrap();

    assert_eq!(config.secrets.llm_api_key.as_ref().unwrap().expose(), "sk-llm");
    assert_eq!(config.secrets.stt_api_key.as_ref().unwrap().expose(), "dg-key");
    assert_eq!(config.gateway.auth_token.as_deref(), Some("gw"));
    assert_eq!(format!("{:?}", config.secrets.llm_api_key), "Some([REDACTED])");
}

#[tokio::test]
async fn resolve_secrets_tolerates_missing_keys() {
    let mut config = Config::default();
    config.resolve_secrets(&MockVaultProvider::new()).await.unwrap();
    assert!(config.secrets.llm_api_key.is_none());
    assert!(config.secrets.stt_api_key.is_none());
}

#[test]
fn config_serializes_round_trip_through_toml() {
    let config = Config::default();
    let text = toml::to_string(&config).unwrap();
    let parsed: Config = toml::from_str(&text).unwrap();
    assert_eq!(parsed.llm.model, config.llm.model);
    assert_eq!(parsed.gateway.port, config.gateway.port);
}
