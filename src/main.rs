use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use corvus_core::config::{Config, LlmConfig, ProviderKind, SttProviderKind};
use corvus_core::vault::EnvVaultProvider;
use corvus_core::{
    ConversationHistory, Coordinator, Dispatcher, PromptBuilder, RemoteTranscriber, Subscription,
    TranscriptionBridge,
};
use corvus_gateway::GatewayServer;
use corvus_llm::claude::ClaudeProvider;
use corvus_llm::deepgram::DeepgramProvider;
use corvus_llm::http::default_client;
use corvus_llm::openai::OpenAiProvider;
use corvus_llm::stt::SpeechToText;
use corvus_llm::whisper::WhisperProvider;
use corvus_llm::{AnyProvider, LlmProvider};
use tokio::sync::watch;

const OPENAI_API_URL: &str = "https://api.openai.com/v1";
const WHISPER_MODEL: &str = "whisper-1";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();

    let config_path = resolve_config_path();
    let mut config = Config::load(&config_path)?;
    config.resolve_secrets(&EnvVaultProvider).await?;

    let provider = create_provider(&config)?;
    let caps = provider.capabilities();
    tracing::info!(
        provider = provider.name(),
        model = %provider.info().model,
        streaming = caps.streaming,
        structured_output = caps.structured_output,
        vision = caps.vision,
        "LLM provider ready"
    );

    let dispatcher = Dispatcher::with_redelivery(
        config.dispatch.queue_capacity,
        Duration::from_millis(config.dispatch.redelivery_ms),
    );
    let prompts = PromptBuilder::new(
        config.prompts.default_language.clone(),
        config.prompts.templates.clone(),
    );
    let mut coordinator = Coordinator::new(
        provider,
        prompts,
        config.session_limits(),
        dispatcher.clone(),
    );
    if let Some(bridge) = create_bridge(&config)? {
        coordinator = coordinator.with_bridge(Arc::new(bridge));
    } else {
        tracing::info!("no [stt] section, recording analysis disabled");
    }

    let progress_log = tokio::spawn(log_progress(dispatcher.subscribe("log")));

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e:#}");
            return;
        }
        tracing::info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    if config.gateway.enabled {
        GatewayServer::new(
            &config.gateway.bind,
            config.gateway.port,
            coordinator,
            shutdown_rx,
        )
        .with_auth(config.gateway.auth_token.clone())
        .with_rate_limit(config.gateway.rate_limit)
        .with_max_body_size(config.gateway.max_body_size)
        .with_history(Arc::new(ConversationHistory::new()))
        .with_default_language(config.prompts.default_language.clone())
        .serve()
        .await?;
    } else {
        tracing::warn!("gateway disabled, waiting for shutdown");
        while !*shutdown_rx.borrow_and_update() {
            if shutdown_rx.changed().await.is_err() {
                break;
            }
        }
    }

    progress_log.abort();
    Ok(())
}

/// Log every published snapshot and acknowledge terminal ones.
async fn log_progress(subscription: Subscription) {
    while let Some(delivery) = subscription.recv().await {
        let snapshot = &delivery.snapshot;
        if snapshot.is_final() {
            tracing::info!(
                session = %snapshot.session_id,
                state = ?snapshot.state,
                attempt = ?snapshot.attempt,
                redelivered = delivery.redelivered,
                error = snapshot.error.as_ref().map(|e| e.summary.as_str()),
                "session finished"
            );
            subscription.ack(snapshot.session_id, snapshot.seq);
        } else {
            tracing::debug!(
                session = %snapshot.session_id,
                seq = snapshot.seq,
                state = ?snapshot.state,
                progress = snapshot.result.progress,
                "session progress"
            );
        }
    }
}

fn llm_api_key(config: &Config) -> anyhow::Result<String> {
    config
        .secrets
        .llm_api_key
        .as_ref()
        .map(|s| s.expose().to_owned())
        .with_context(|| {
            format!(
                "{} API key not found, set {}",
                config.llm.provider,
                config.llm.credential_ref().unwrap_or("llm.credential_ref")
            )
        })
}

fn create_provider(config: &Config) -> anyhow::Result<AnyProvider> {
    let llm = &config.llm;
    let client = default_client(Duration::from_secs(config.session.overall_timeout_seconds));

    let provider = match llm.provider {
        ProviderKind::Claude => {
            let mut p = ClaudeProvider::new(llm_api_key(config)?, llm.model.clone(), llm.max_tokens)
                .with_client(client)
                .with_temperature(llm.temperature);
            if let Some(url) = &llm.base_url {
                p = p.with_api_url(url.clone());
            }
            if let Some(credential_ref) = llm.credential_ref() {
                p = p.with_credential_ref(credential_ref);
            }
            let caps = effective_capabilities(llm, p.capabilities());
            AnyProvider::Claude(p.with_capabilities(caps))
        }
        ProviderKind::OpenAi => {
            let base_url = llm.base_url.clone().unwrap_or_else(|| OPENAI_API_URL.to_owned());
            let mut p = OpenAiProvider::new(
                llm_api_key(config)?,
                base_url,
                llm.model.clone(),
                llm.max_tokens,
            )
            .with_client(client)
            .with_temperature(llm.temperature);
            if let Some(credential_ref) = llm.credential_ref() {
                p = p.with_credential_ref(credential_ref);
            }
            let caps = effective_capabilities(llm, p.capabilities());
            AnyProvider::OpenAi(p.with_capabilities(caps))
        }
        #[cfg(feature = "mock")]
        ProviderKind::Mock => {
            let p = corvus_llm::mock::MockProvider::default();
            let caps = effective_capabilities(llm, p.capabilities());
            AnyProvider::Mock(p.with_capabilities(caps))
        }
        #[cfg(not(feature = "mock"))]
        ProviderKind::Mock => anyhow::bail!("the mock provider requires the `mock` feature"),
    };
    Ok(provider)
}

fn effective_capabilities(
    llm: &LlmConfig,
    base: corvus_llm::Capabilities,
) -> corvus_llm::Capabilities {
    llm.capabilities.map_or(base, |o| o.apply(base))
}

fn create_bridge(config: &Config) -> anyhow::Result<Option<TranscriptionBridge>> {
    let Some(stt) = &config.stt else {
        return Ok(None);
    };
    let api_key = config
        .secrets
        .stt_api_key
        .as_ref()
        .map(|s| s.expose().to_owned())
        .with_context(|| {
            format!(
                "speech-to-text API key not found, set {}",
                stt.credential_ref()
            )
        })?;
    let client = default_client(Duration::from_secs(stt.timeout_seconds));

    let backend: Arc<dyn SpeechToText> = match stt.provider {
        SttProviderKind::Whisper => {
            let mut w = WhisperProvider::new(
                client,
                api_key,
                stt.base_url.clone().unwrap_or_else(|| OPENAI_API_URL.to_owned()),
                stt.model.clone().unwrap_or_else(|| WHISPER_MODEL.to_owned()),
            );
            if let Some(language) = &stt.language {
                w = w.with_language(language.clone());
            }
            Arc::new(w)
        }
        SttProviderKind::Deepgram => {
            let mut d = DeepgramProvider::new(client, api_key);
            if let Some(url) = &stt.base_url {
                d = d.with_base_url(url.clone());
            }
            if let Some(model) = &stt.model {
                d = d.with_model(model.clone());
            }
            if let Some(language) = &stt.language {
                d = d.with_language(language.clone());
            }
            Arc::new(d)
        }
    };

    tracing::info!(
        backend = backend.name(),
        workers = stt.workers,
        min_confidence = stt.min_confidence,
        "transcription bridge ready"
    );
    let transcriber = Arc::new(RemoteTranscriber::new(
        backend,
        tokio::runtime::Handle::current(),
    ));
    Ok(Some(TranscriptionBridge::new(
        transcriber,
        stt.workers,
        stt.min_confidence,
    )))
}

fn resolve_config_path() -> PathBuf {
    let args: Vec<String> = std::env::args().collect();
    if let Some(path) = args.windows(2).find(|w| w[0] == "--config").map(|w| &w[1]) {
        return PathBuf::from(path);
    }
    if let Ok(path) = std::env::var("CORVUS_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/default.toml")
}

fn init_subscriber() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use corvus_core::config::{CapabilitiesOverride, SttConfig};
    use corvus_core::vault::Secret;
    use serial_test::serial;

    use super::*;

    fn config_with_key(provider: ProviderKind) -> Config {
        let mut config = Config::default();
        config.llm.provider = provider;
        config.secrets.llm_api_key = Some(Secret::new("sk-test"));
        config
    }

    #[test]
    #[serial]
    fn config_path_defaults() {
        unsafe { std::env::remove_var("CORVUS_CONFIG") };
        assert_eq!(resolve_config_path(), PathBuf::from("config/default.toml"));
    }

    #[test]
    #[serial]
    fn config_path_from_env() {
        unsafe { std::env::set_var("CORVUS_CONFIG", "/tmp/corvus.toml") };
        let path = resolve_config_path();
        unsafe { std::env::remove_var("CORVUS_CONFIG") };
        assert_eq!(path, PathBuf::from("/tmp/corvus.toml"));
    }

    #[test]
    #[serial]
    fn config_loading_from_default_toml() {
        let config = Config::load(Path::new("config/default.toml")).unwrap();
        assert!(config.gateway.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn create_provider_without_key_errors() {
        let mut config = Config::default();
        config.llm.provider = ProviderKind::Claude;
        let err = create_provider(&config).unwrap_err();
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn create_provider_claude_uses_heuristic_output() {
        let provider = create_provider(&config_with_key(ProviderKind::Claude)).unwrap();
        assert!(matches!(provider, AnyProvider::Claude(_)));
        assert!(!provider.supports_structured_output());
        assert!(provider.supports_streaming());
        assert_eq!(
            provider.info().credential_ref.as_deref(),
            Some("ANTHROPIC_API_KEY")
        );
    }

    #[test]
    fn create_provider_applies_capability_override() {
        let mut config = config_with_key(ProviderKind::OpenAi);
        config.llm.capabilities = Some(CapabilitiesOverride {
            streaming: Some(false),
            ..CapabilitiesOverride::default()
        });
        let provider = create_provider(&config).unwrap();
        assert!(matches!(provider, AnyProvider::OpenAi(_)));
        assert!(!provider.supports_streaming());
        assert_eq!(provider.info().model, "gpt-4o");
    }

    #[tokio::test]
    async fn bridge_absent_without_stt_section() {
        assert!(create_bridge(&Config::default()).unwrap().is_none());
    }

    #[tokio::test]
    async fn bridge_requires_stt_key() {
        let mut config = Config::default();
        config.stt = Some(SttConfig::default());
        let err = create_bridge(&config).unwrap_err();
        assert!(err.to_string().contains("DEEPGRAM_API_KEY"));
    }

    #[tokio::test]
    async fn bridge_built_with_configured_workers() {
        let mut config = Config::default();
        config.stt = Some(SttConfig {
            provider: SttProviderKind::Whisper,
            workers: 2,
            ..SttConfig::default()
        });
        config.secrets.stt_api_key = Some(Secret::new("sk-stt"));
        let bridge = create_bridge(&config).unwrap().unwrap();
        assert_eq!(bridge.workers(), 2);
        assert_eq!(bridge.idle_workers(), 2);
    }
}
