mod env;
mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use std::path::Path;

use anyhow::{Context, bail};

use crate::bridge::MAX_WORKERS;
use crate::vault::{Secret, VaultProvider};

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or if
    /// the resulting values are out of range.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot honor.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first offending setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.llm.model.trim().is_empty() {
            bail!("llm.model must not be empty");
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            bail!("llm.temperature must be within 0.0..=2.0, got {}", self.llm.temperature);
        }
        if self.llm.max_tokens == 0 {
            bail!("llm.max_tokens must be positive");
        }
        if let Some(stt) = &self.stt {
            if !(0.0..=1.0).contains(&stt.min_confidence) {
                bail!("stt.min_confidence must be within 0.0..=1.0, got {}", stt.min_confidence);
            }
            if !(1..=MAX_WORKERS).contains(&stt.workers) {
                bail!("stt.workers must be between 1 and {MAX_WORKERS}, got {}", stt.workers);
            }
            if stt.timeout_seconds == 0 {
                bail!("stt.timeout_seconds must be positive");
            }
        }
        if self.session.overall_timeout_seconds == 0 {
            bail!("session.overall_timeout_seconds must be positive");
        }
        if self.session.first_byte_timeout_seconds == 0
            || self.session.first_byte_timeout_seconds > self.session.overall_timeout_seconds
        {
            bail!("session.first_byte_timeout_seconds must be positive and not exceed the overall timeout");
        }
        if self.dispatch.queue_capacity == 0 {
            bail!("dispatch.queue_capacity must be positive");
        }
        Ok(())
    }

    /// Resolve credential references through the vault.
    ///
    /// # Errors
    ///
    /// Returns an error if the vault backend fails.
    pub async fn resolve_secrets(&mut self, vault: &dyn VaultProvider) -> anyhow::Result<()> {
        if let Some(key) = self.llm.credential_ref() {
            self.secrets.llm_api_key = vault.get_secret(key).await?.map(Secret::new);
            if self.secrets.llm_api_key.is_none() {
                tracing::warn!(credential_ref = key, "no credential found for the LLM provider");
            }
        }
        if let Some(stt) = &self.stt {
            let key = stt.credential_ref();
            self.secrets.stt_api_key = vault.get_secret(key).await?.map(Secret::new);
            if self.secrets.stt_api_key.is_none() {
                tracing::warn!(credential_ref = key, "no credential found for the STT provider");
            }
        }
        if let Some(val) = vault.get_secret("CORVUS_GATEWAY_TOKEN").await? {
            self.gateway.auth_token = Some(val);
        }
        Ok(())
    }
}
