use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use quire_core::config::StoreBackend;
use quire_core::Config;
use quire_engine::{AutosaveSettings, OpenAiProofreader, Proofreader};
use quire_store::{MemoryStore, RecordStore, RestStore};
use tracing::{info, warn};

use crate::auth::AuthConfig;
use crate::cli::Cli;
use crate::ratelimit::RateLimitConfig;

/// Runtime configuration: quire.yml plus CLI/env overrides.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub app: Config,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
}

impl ServerConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let mut app = match &cli.config {
            Some(path) => Config::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(url) = &cli.store_url {
            app.store.backend = StoreBackend::Rest;
            app.store.url = Some(url.clone());
        }
        if let Some(secs) = cli.debounce_secs {
            if secs == 0 {
                return Err(anyhow!("debounce must be at least 1 second"));
            }
            app.autosave.debounce_secs = secs;
        }

        let auth = AuthConfig {
            secret: cli.jwt_secret.clone(),
            previous_secret: cli.jwt_previous_secret.clone(),
            expected_aud: cli.auth_audience.clone(),
            require_auth: cli.require_auth,
        };
        if auth.require_auth && auth.secret.is_none() {
            return Err(anyhow!("--require-auth needs QUIRE_JWT_SECRET"));
        }

        let rate_limit = RateLimitConfig {
            burst: cli.rate_burst,
            refill_rate: cli.rate_per_sec,
            enabled: cli.rate_limit,
        };

        Ok(Self {
            listen_addr: cli.listen_addr.clone(),
            app,
            auth,
            rate_limit,
        })
    }

    pub fn autosave(&self) -> AutosaveSettings {
        AutosaveSettings::from(&self.app.autosave)
    }

    pub fn build_store(&self) -> Result<Arc<dyn RecordStore>> {
        let store = &self.app.store;
        match store.backend {
            StoreBackend::Memory => {
                warn!("using the in-memory store; data is lost on restart");
                Ok(Arc::new(MemoryStore::new()))
            }
            StoreBackend::Rest => {
                let url = store
                    .url
                    .as_deref()
                    .ok_or_else(|| anyhow!("store.url is required for the rest backend"))?;
                let mut rest = RestStore::new(url, store.timeout())?;
                match std::env::var(&store.api_key_env) {
                    Ok(key) => rest = rest.with_api_key(key),
                    Err(_) => warn!(env = %store.api_key_env, "no store API key set"),
                }
                info!(%url, "using the rest record store");
                Ok(Arc::new(rest))
            }
        }
    }

    /// The configured proofreader. A missing API key disables proofreading
    /// rather than failing startup.
    pub fn build_proofreader(&self) -> Option<Arc<dyn Proofreader>> {
        let cfg = self.app.proofreading.as_ref()?;
        match OpenAiProofreader::from_config(cfg) {
            Ok(client) => {
                info!(model = %cfg.model, "proofreading enabled");
                Some(Arc::new(client))
            }
            Err(err) => {
                warn!(%err, "proofreading disabled");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::time::Duration;

    #[test]
    fn test_overrides_apply_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quire.yml");
        std::fs::write(&path, "autosave:\n  debounce_secs: 45\n").unwrap();

        let cli = Cli::parse_from([
            "quire",
            "--config",
            path.to_str().unwrap(),
            "--store-url",
            "http://db.local",
            "--debounce-secs",
            "5",
        ]);
        let config = ServerConfig::from_cli(&cli).unwrap();
        assert_eq!(config.app.store.backend, StoreBackend::Rest);
        assert_eq!(config.app.store.url.as_deref(), Some("http://db.local"));
        assert_eq!(config.autosave().debounce, Duration::from_secs(5));
    }

    #[test]
    fn test_required_auth_needs_secret() {
        let cli = Cli::parse_from(["quire", "--require-auth"]);
        assert!(ServerConfig::from_cli(&cli).is_err());
    }
}
