//! Agent/model adapters for Querent.
//!
//! Every adapter implements [`querent_core::agent::FragmentAgent`]. Output is
//! untrusted; the planner validates each fragment before running it.
//!
//! - [`LocalRuleAgent`]: deterministic keyword rules, no network
//! - [`OpenAiApiAgent`]: OpenAI-compatible Chat Completions
//! - [`ClaudeApiAgent`]: Anthropic Messages API

pub mod claude_api_agent;
mod http;
pub mod local_agent;
pub mod openai_api_agent;
pub mod prompt;
pub mod response;

pub use claude_api_agent::ClaudeApiAgent;
pub use local_agent::LocalRuleAgent;
pub use openai_api_agent::OpenAiApiAgent;

use querent_core::agent::FragmentAgent;
use querent_core::config::{ModelConfig, ModelProvider};
use querent_core::error::{QuerentError, Result};
use std::sync::Arc;

/// Builds the agent selected by `config.provider`.
///
/// # Errors
///
/// Returns `QuerentError::Config` when a remote provider has no API key or
/// its HTTP client cannot be built.
pub fn build_agent(config: &ModelConfig) -> Result<Arc<dyn FragmentAgent>> {
    let api_key = || {
        config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                QuerentError::config(format!("provider '{}' requires an API key", config.provider))
            })
    };
    let to_config_error = |err: querent_core::agent::AgentError| QuerentError::config(err.to_string());

    let agent: Arc<dyn FragmentAgent> = match config.provider {
        ModelProvider::Local => Arc::new(LocalRuleAgent::new()),
        ModelProvider::OpenAi => {
            let model = config
                .model_name
                .clone()
                .unwrap_or_else(|| openai_api_agent::DEFAULT_OPENAI_MODEL.to_string());
            let mut agent = OpenAiApiAgent::new(&api_key()?, model, config.request_timeout())
                .map_err(to_config_error)?
                .with_max_tokens(config.max_tokens);
            if let Some(base_url) = &config.base_url {
                agent = agent.with_base_url(base_url.clone());
            }
            Arc::new(agent)
        }
        ModelProvider::Claude => {
            let model = config
                .model_name
                .clone()
                .unwrap_or_else(|| claude_api_agent::DEFAULT_CLAUDE_MODEL.to_string());
            let mut agent = ClaudeApiAgent::new(&api_key()?, model, config.request_timeout())
                .map_err(to_config_error)?
                .with_max_tokens(config.max_tokens);
            if let Some(base_url) = &config.base_url {
                agent = agent.with_base_url(base_url.clone());
            }
            Arc::new(agent)
        }
    };

    tracing::info!("[Interaction] Using '{}' agent", agent.name());
    Ok(agent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_is_default() {
        let agent = build_agent(&ModelConfig::default()).unwrap();
        assert_eq!(agent.name(), "local");
    }

    #[test]
    fn test_remote_requires_key() {
        let mut config = ModelConfig {
            provider: ModelProvider::Claude,
            ..ModelConfig::default()
        };
        assert!(build_agent(&config).err().unwrap().is_config());

        config.api_key = Some("sk-ant-test".into());
        assert_eq!(build_agent(&config).unwrap().name(), "claude");

        config.provider = ModelProvider::OpenAi;
        config.api_key = Some("   ".into());
        assert!(build_agent(&config).is_err());
    }
}
