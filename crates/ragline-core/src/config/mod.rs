mod env;
mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use std::path::Path;

use anyhow::{Context, bail};

use crate::vault::{Secret, VaultProvider};

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to sensible defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Reject values no run could work with.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.retrieval.k == 0 {
            bail!("retrieval.k must be at least 1");
        }
        if self.retrieval.chunk_size == 0 {
            bail!("retrieval.chunk_size must be at least 1");
        }
        if self.retrieval.chunk_overlap >= self.retrieval.chunk_size {
            bail!(
                "retrieval.chunk_overlap ({}) must be smaller than retrieval.chunk_size ({})",
                self.retrieval.chunk_overlap,
                self.retrieval.chunk_size
            );
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            bail!(
                "llm.temperature must be within [0, 2], got {}",
                self.llm.temperature
            );
        }
        if self.llm.timeout_secs == 0 {
            bail!("llm.timeout_secs must be at least 1");
        }
        for d in &self.router.destinations {
            if d.name.trim().is_empty() {
                bail!("router destination names must not be empty");
            }
        }
        Ok(())
    }

    /// Resolve the API key through the vault.
    ///
    /// # Errors
    ///
    /// Returns an error if the vault backend fails.
    pub async fn resolve_secrets(&mut self, vault: &dyn VaultProvider) -> anyhow::Result<()> {
        for key in ["RAGLINE_OPENAI_API_KEY", "OPENAI_API_KEY"] {
            if let Some(val) = vault.get_secret(key).await?
                && !val.trim().is_empty()
            {
                self.secrets.openai_api_key = Some(Secret::new(val));
                break;
            }
        }
        Ok(())
    }
}
