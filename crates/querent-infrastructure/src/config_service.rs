//! Configuration service implementation.
//!
//! Layers, lowest precedence first:
//!
//! 1. Built-in defaults ([`QuerentConfig::default`])
//! 2. `config.toml` (explicit path, or `~/.config/querent/config.toml`)
//! 3. `secret.json` API key for the selected provider
//! 4. Environment variables (`QUERENT_*`, `OPENAI_API_KEY`, `ANTHROPIC_API_KEY`)
//!
//! The merged result is validated before it is handed out.

use crate::paths::QuerentPaths;
use crate::secret_storage::SecretStorage;
use querent_core::config::{ModelProvider, QuerentConfig};
use querent_core::error::{QuerentError, Result};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Loads and caches the merged configuration.
#[derive(Debug, Clone)]
pub struct ConfigService {
    /// `Some` when the caller named a file; a missing named file is an error.
    explicit_path: Option<PathBuf>,
    secret_path: Option<PathBuf>,
    config: Arc<RwLock<Option<QuerentConfig>>>,
}

impl ConfigService {
    /// Uses the default file locations.
    pub fn new() -> Self {
        Self {
            explicit_path: None,
            secret_path: None,
            config: Arc::new(RwLock::new(None)),
        }
    }

    /// Reads configuration from `path` instead of the default location.
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit_path = Some(path.into());
        self
    }

    /// Reads API keys from `path` instead of the default location.
    pub fn with_secret_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.secret_path = Some(path.into());
        self
    }

    /// Returns the merged configuration, loading it on first access.
    ///
    /// # Errors
    ///
    /// Returns `QuerentError::Config` or `QuerentError::Format` when a
    /// file cannot be parsed or the merged result is invalid.
    pub fn get_config(&self) -> Result<QuerentConfig> {
        {
            let read_lock = self.config.read().unwrap_or_else(|e| e.into_inner());
            if let Some(ref cached) = *read_lock {
                return Ok(cached.clone());
            }
        }

        let loaded = self.load_with_env(|key| std::env::var(key).ok())?;

        {
            let mut write_lock = self.config.write().unwrap_or_else(|e| e.into_inner());
            *write_lock = Some(loaded.clone());
        }

        Ok(loaded)
    }

    /// Invalidates the cache, forcing a reload on next access.
    pub fn invalidate_cache(&self) {
        let mut write_lock = self.config.write().unwrap_or_else(|e| e.into_inner());
        *write_lock = None;
    }

    /// Loads every layer, reading environment variables through `env`.
    pub fn load_with_env<F>(&self, env: F) -> Result<QuerentConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = self.load_file()?;

        // Provider first: it decides which secret and key variable apply.
        if let Some(raw) = env("QUERENT_PROVIDER") {
            config.model.provider = raw.parse::<ModelProvider>().map_err(|_| {
                QuerentError::config(format!("QUERENT_PROVIDER: unknown provider '{raw}'"))
            })?;
        }

        self.apply_secret(&mut config)?;
        apply_env_overrides(&mut config, &env);

        config.validate()?;
        tracing::debug!(
            "[ConfigService] Loaded configuration: provider={}, pool={}, preview_rows={}",
            config.model.provider,
            config.pool.max_connections,
            config.limits.preview_rows
        );
        Ok(config)
    }

    /// Writes `config` to the active config file (API key omitted).
    pub fn save(&self, config: &QuerentConfig) -> Result<PathBuf> {
        let path = self.config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(config)?;
        std::fs::write(&path, content)?;
        self.invalidate_cache();
        Ok(path)
    }

    /// The file this service reads.
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.explicit_path {
            Some(path) => Ok(path.clone()),
            None => QuerentPaths::config_file()
                .ok_or_else(|| QuerentError::config("no platform config directory")),
        }
    }

    fn load_file(&self) -> Result<QuerentConfig> {
        let path = self.config_path()?;
        if !path.exists() {
            if self.explicit_path.is_some() {
                return Err(QuerentError::config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            tracing::debug!("[ConfigService] No config file, using defaults");
            return Ok(QuerentConfig::default());
        }
        read_toml(&path)
    }

    fn apply_secret(&self, config: &mut QuerentConfig) -> Result<()> {
        let Some(path) = self.secret_path.clone().or_else(QuerentPaths::secret_file) else {
            return Ok(());
        };
        let secrets = SecretStorage::at(path)
            .load()
            .map_err(|e| QuerentError::config(e.to_string()))?;

        if let Some(secret) = secrets.for_provider(config.model.provider) {
            config.model.api_key = Some(secret.api_key.clone());
            if config.model.model_name.is_none() {
                config.model.model_name = secret.model_name.clone();
            }
        }
        Ok(())
    }
}

impl Default for ConfigService {
    fn default() -> Self {
        Self::new()
    }
}

fn read_toml(path: &Path) -> Result<QuerentConfig> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

// ── env helpers ──────────────────────────────────────────────────────────────

fn apply_env_overrides<F>(config: &mut QuerentConfig, env: &F)
where
    F: Fn(&str) -> Option<String>,
{
    let provider_key = match config.model.provider {
        ModelProvider::OpenAi => env("OPENAI_API_KEY"),
        ModelProvider::Claude => env("ANTHROPIC_API_KEY"),
        ModelProvider::Local => None,
    };
    if let Some(key) = env("QUERENT_API_KEY").or(provider_key) {
        if !key.trim().is_empty() {
            config.model.api_key = Some(key);
        }
    }

    config.model.model_name = env("QUERENT_MODEL").or(config.model.model_name.take());
    config.model.base_url = env("QUERENT_BASE_URL").or(config.model.base_url.take());
    config.model.local_fallback = env("QUERENT_LOCAL_FALLBACK")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(config.model.local_fallback);
    config.logging.level = env_or(env, "QUERENT_LOG", &config.logging.level);
    config.logging.json = env("QUERENT_LOG_JSON")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(config.logging.json);

    let limits = &mut config.limits;
    limits.preview_rows = parse_env(env, "QUERENT_PREVIEW_ROWS", limits.preview_rows);
    limits.max_result_rows = parse_env(env, "QUERENT_MAX_RESULT_ROWS", limits.max_result_rows);
    limits.query_timeout_secs =
        parse_env(env, "QUERENT_QUERY_TIMEOUT_SECS", limits.query_timeout_secs);

    let pool = &mut config.pool;
    pool.max_connections = parse_env(env, "QUERENT_POOL_SIZE", pool.max_connections);
    pool.max_age_secs = parse_env(env, "QUERENT_POOL_MAX_AGE_SECS", pool.max_age_secs);
    pool.acquire_timeout_secs =
        parse_env(env, "QUERENT_ACQUIRE_TIMEOUT_SECS", pool.acquire_timeout_secs);

    config.session.ttl_secs = parse_env(env, "QUERENT_SESSION_TTL_SECS", config.session.ttl_secs);
}

fn env_or<F>(env: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    env(key).unwrap_or_else(|| default.to_owned())
}

fn parse_env<T, F>(env: &F, key: &str, default: T) -> T
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    env(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}
