use super::{Config, SttConfig};

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_llm();
        self.apply_env_overrides_stt();
        self.apply_env_overrides_runtime();
    }

    fn apply_env_overrides_llm(&mut self) {
        if let Ok(v) = std::env::var("CORVUS_LLM_PROVIDER") {
            if let Ok(kind) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.llm.provider = kind;
            } else {
                tracing::warn!("ignoring invalid CORVUS_LLM_PROVIDER value: {v}");
            }
        }
        if let Ok(v) = std::env::var("CORVUS_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("CORVUS_LLM_BASE_URL") {
            self.llm.base_url = Some(v);
        }
        if let Ok(v) = std::env::var("CORVUS_LLM_TEMPERATURE")
            && let Ok(t) = v.parse::<f32>()
        {
            self.llm.temperature = t;
        }
    }

    fn apply_env_overrides_stt(&mut self) {
        if let Ok(v) = std::env::var("CORVUS_STT_PROVIDER") {
            if let Ok(kind) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.stt.get_or_insert_with(SttConfig::default).provider = kind;
            } else {
                tracing::warn!("ignoring invalid CORVUS_STT_PROVIDER value: {v}");
            }
        }
        if let Ok(v) = std::env::var("CORVUS_STT_MODEL") {
            self.stt.get_or_insert_with(SttConfig::default).model = Some(v);
        }
        if let Ok(v) = std::env::var("CORVUS_STT_MIN_CONFIDENCE")
            && let Ok(c) = v.parse::<f32>()
            && let Some(stt) = self.stt.as_mut()
        {
            stt.min_confidence = c;
        }
    }

    fn apply_env_overrides_runtime(&mut self) {
        if let Ok(v) = std::env::var("CORVUS_SESSION_TIMEOUT")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.session.overall_timeout_seconds = secs;
        }
        if let Ok(v) = std::env::var("CORVUS_FIRST_BYTE_TIMEOUT")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.session.first_byte_timeout_seconds = secs;
        }
        if let Ok(v) = std::env::var("CORVUS_DEFAULT_LANGUAGE")
            && !v.trim().is_empty()
        {
            self.prompts.default_language = v.trim().to_owned();
        }
        if let Ok(v) = std::env::var("CORVUS_GATEWAY_ENABLED")
            && let Ok(enabled) = v.parse::<bool>()
        {
            self.gateway.enabled = enabled;
        }
        if let Ok(v) = std::env::var("CORVUS_GATEWAY_BIND") {
            self.gateway.bind = v;
        }
        if let Ok(v) = std::env::var("CORVUS_GATEWAY_PORT")
            && let Ok(port) = v.parse::<u16>()
        {
            self.gateway.port = port;
        }
        if let Ok(v) = std::env::var("CORVUS_GATEWAY_TOKEN") {
            self.gateway.auth_token = Some(v);
        }
    }
}
