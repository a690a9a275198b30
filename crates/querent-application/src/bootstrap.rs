//! Application wiring.

use crate::query_usecase::QueryEngine;
use crate::session_service::SessionService;
use anyhow::{Context, Result};
use querent_core::agent::FragmentAgent;
use querent_core::config::QuerentConfig;
use querent_infrastructure::InMemorySessionRepository;
use querent_interaction::{LocalRuleAgent, build_agent};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The assembled application: session service plus planner.
pub struct QueryApp {
    pub config: QuerentConfig,
    pub sessions: Arc<SessionService>,
    pub engine: Arc<QueryEngine>,
}

impl QueryApp {
    /// Builds the application with the agent selected in `config.model`.
    pub fn from_config(config: QuerentConfig) -> Result<Self> {
        config.validate().context("invalid configuration")?;
        let agent = build_agent(&config.model).context("failed to build model agent")?;
        Ok(Self::with_agent(config, agent))
    }

    /// Builds the application around an explicit agent.
    ///
    /// With `model.local_fallback` set, a non-local agent is backed by the
    /// local rule agent.
    pub fn with_agent(config: QuerentConfig, agent: Arc<dyn FragmentAgent>) -> Self {
        let repository = Arc::new(InMemorySessionRepository::new(config.session.ttl()));
        let sessions = Arc::new(SessionService::new(repository, &config));
        let fallback = config.model.local_fallback && agent.name() != "local";
        let mut engine = QueryEngine::new(Arc::clone(&sessions), agent, &config);
        if fallback {
            engine = engine.with_fallback(Arc::new(LocalRuleAgent::new()));
        }
        let engine = Arc::new(engine);

        tracing::debug!(
            "[QueryApp] Ready (agent={}, max_result_rows={}, query_timeout={}s)",
            engine.agent_name(),
            config.limits.max_result_rows,
            config.limits.query_timeout_secs
        );

        Self {
            config,
            sessions,
            engine,
        }
    }

    /// Starts the idle-session sweeper; it stops when `cancel` fires.
    pub fn spawn_sweeper(&self, cancel: CancellationToken) -> JoinHandle<()> {
        self.sessions
            .spawn_sweeper(self.config.session.sweep_interval(), cancel)
    }
}
