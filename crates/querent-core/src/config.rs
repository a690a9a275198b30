//! Configuration model.
//!
//! Every field has a default so Querent works out of the box with no config
//! file. Loading and environment overrides live in the infrastructure crate;
//! this module only describes the shape and the invariants.

use crate::error::{QuerentError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::{Display, EnumString};

/// Root configuration (`config.toml`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerentConfig {
    pub model: ModelConfig,
    pub limits: LimitsConfig,
    pub pool: PoolConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

impl QuerentConfig {
    /// Checks invariants that serde defaults cannot express.
    ///
    /// # Errors
    ///
    /// Returns `QuerentError::Config` naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        let checks: [(&str, u64); 8] = [
            ("pool.max_connections", u64::from(self.pool.max_connections)),
            ("pool.acquire_timeout_secs", self.pool.acquire_timeout_secs),
            ("pool.max_age_secs", self.pool.max_age_secs),
            ("limits.max_result_rows", self.limits.max_result_rows as u64),
            ("limits.query_timeout_secs", self.limits.query_timeout_secs),
            ("limits.max_fragment_len", self.limits.max_fragment_len as u64),
            ("limits.max_nesting_depth", self.limits.max_nesting_depth as u64),
            ("model.request_timeout_secs", self.model.request_timeout_secs),
        ];

        for (key, value) in checks {
            if value == 0 {
                return Err(QuerentError::config(format!("{key} must be greater than zero")));
            }
        }

        if self.model.provider.is_remote() && self.model.api_key.is_none() {
            return Err(QuerentError::config(format!(
                "model.provider = \"{}\" requires an API key",
                self.model.provider
            )));
        }

        Ok(())
    }

    /// Returns a copy that is safe to print (API key redacted).
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.model.api_key.is_some() {
            copy.model.api_key = Some("***".to_string());
        }
        copy
    }
}

/// Which agent variant proposes fragments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ModelProvider {
    /// Rule-based local evaluator; never leaves the process.
    #[default]
    Local,
    /// OpenAI-compatible chat completions API.
    #[strum(serialize = "openai")]
    #[serde(rename = "openai")]
    OpenAi,
    /// Anthropic messages API.
    Claude,
}

impl ModelProvider {
    pub fn is_remote(&self) -> bool {
        !matches!(self, Self::Local)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub provider: ModelProvider,
    /// Provider model name; `None` uses the adapter's default.
    pub model_name: Option<String>,
    /// Never written back out; comes from `secret.json` or the environment.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Overrides the provider endpoint (OpenAI-compatible gateways).
    pub base_url: Option<String>,
    pub request_timeout_secs: u64,
    pub max_tokens: u32,
    /// Answer with the local rule agent when a remote provider fails with a
    /// non-retryable error. Timeouts and retryable errors still fail.
    pub local_fallback: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: ModelProvider::Local,
            model_name: None,
            api_key: None,
            base_url: None,
            request_timeout_secs: 60,
            max_tokens: 1024,
            local_fallback: false,
        }
    }
}

impl ModelConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Query-path limits shared by the validator, planner and executors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Sample rows captured per table at bind time.
    pub preview_rows: usize,
    /// Result rows returned to the caller; extra rows are dropped and flagged.
    pub max_result_rows: usize,
    pub query_timeout_secs: u64,
    pub max_fragment_len: usize,
    /// Maximum depth of nested queries (the outer query counts as 1).
    pub max_nesting_depth: usize,
    pub max_question_len: usize,
    /// Regenerations requested after a rejected fragment. 0 disables.
    pub regeneration_retries: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            preview_rows: 5,
            max_result_rows: 100,
            query_timeout_secs: 30,
            max_fragment_len: 2000,
            max_nesting_depth: 3,
            max_question_len: 1000,
            regeneration_retries: 1,
        }
    }
}

impl LimitsConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

/// Connection pool settings for relational sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_connections: u32,
    /// Physical connections are recycled after this age regardless of use.
    pub max_age_secs: u64,
    pub acquire_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            max_age_secs: 3600,
            acquire_timeout_secs: 30,
        }
    }
}

impl PoolConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle sessions older than this are evicted.
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            sweep_interval_secs: 60,
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter string, e.g. `"info"` or `"debug,sqlx=warn"`.
    pub level: String,
    /// Emit newline-delimited JSON instead of text.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
