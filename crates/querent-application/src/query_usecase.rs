//! Query use case: the planner.
//!
//! `QueryEngine::run_query` drives one question through the pipeline:
//!
//! 1. screen the question
//! 2. resolve the session and snapshot its binding
//! 3. ask the agent for a fragment (bounded by the request timeout and the
//!    caller's cancellation token)
//! 4. validate it, asking for a regeneration with feedback on rejection
//! 5. execute the accepted fragment in the sandbox
//! 6. format the answer and append the interaction to history
//!
//! Every failure is converted to a [`QueryError`] here; nothing below the
//! planner reaches the caller unstructured. Each attempt is written to the
//! audit trail.

use crate::answer::format_answer;
use crate::metrics::{PerformanceSummary, QueryMetrics};
use crate::session_service::SessionService;
use querent_core::agent::{AgentError, Fragment, FragmentAgent, ProposalRequest, RegenerationFeedback};
use querent_core::config::QuerentConfig;
use querent_core::error::{QueryError, QuerentError};
use querent_core::security::{
    RejectionRule, SecurityValidator, ValidationPolicy, ValidationVerdict, screen_question,
};
use querent_core::session::{FragmentKind, Interaction, Session};
use querent_execution::{AuditRecord, ExecutionError, SandboxExecutor, SandboxLimits};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Outcome name recorded for successful queries.
const OUTCOME_OK: &str = "ok";
/// Outcome recorded for a rejected attempt that triggers a regeneration.
const OUTCOME_REGENERATE: &str = "regenerate";

/// Planner for natural-language questions.
pub struct QueryEngine {
    sessions: Arc<SessionService>,
    agent: Arc<dyn FragmentAgent>,
    fallback: Option<Arc<dyn FragmentAgent>>,
    validator: SecurityValidator,
    sandbox: SandboxExecutor,
    request_timeout: Duration,
    max_question_len: usize,
    regeneration_retries: usize,
    metrics: QueryMetrics,
}

impl QueryEngine {
    pub fn new(
        sessions: Arc<SessionService>,
        agent: Arc<dyn FragmentAgent>,
        config: &QuerentConfig,
    ) -> Self {
        Self {
            sessions,
            agent,
            fallback: None,
            validator: SecurityValidator::new(ValidationPolicy::from(&config.limits)),
            sandbox: SandboxExecutor::new(SandboxLimits::from(&config.limits)),
            request_timeout: config.model.request_timeout(),
            max_question_len: config.limits.max_question_len,
            regeneration_retries: config.limits.regeneration_retries,
            metrics: QueryMetrics::new(),
        }
    }

    /// Agent asked when the primary one fails with a non-retryable error.
    pub fn with_fallback(mut self, fallback: Arc<dyn FragmentAgent>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn agent_name(&self) -> &str {
        self.agent.name()
    }

    /// Rolling summary over the most recent queries.
    pub fn performance_summary(&self) -> PerformanceSummary {
        self.metrics.summary()
    }

    /// Answers `question` against the session's bound source.
    ///
    /// On success the returned interaction has already been appended to the
    /// session history.
    ///
    /// # Errors
    ///
    /// - `ValidationRejected`: the question or every proposed fragment broke policy
    /// - `GenerationFailure`: the agent failed or timed out
    /// - `ConnectionTimeout` / `ExecutionTimeout`: a resource budget ran out
    /// - `SchemaMismatch`: the session was rebound while the query ran
    /// - `SessionNotFound`, `Cancelled`, `InternalFault`
    pub async fn run_query(
        &self,
        session_id: &str,
        question: &str,
        cancel: &CancellationToken,
    ) -> Result<Interaction, QueryError> {
        let started = Instant::now();
        let result = self.plan_and_run(session_id, question, cancel, started).await;

        let outcome = match &result {
            Ok(_) => OUTCOME_OK,
            Err(err) => err.kind(),
        };
        self.metrics.record(outcome, started.elapsed());

        match &result {
            Ok(interaction) => tracing::info!(
                "[QueryEngine] Session {} answered in {}ms ({} row(s))",
                session_id,
                interaction.elapsed_ms,
                interaction.row_count
            ),
            Err(err) => tracing::info!(
                "[QueryEngine] Session {} failed after {}ms: {}",
                session_id,
                started.elapsed().as_millis(),
                err.kind()
            ),
        }
        result
    }

    /// Runs the validator alone against the session's schema.
    pub async fn validate_fragment(
        &self,
        session_id: &str,
        fragment: &Fragment,
    ) -> Result<ValidationVerdict, QueryError> {
        let session = self.resolve_session(session_id).await?;
        let snapshot = session.snapshot().await;
        Ok(self.verdict_for(fragment, snapshot.binding.mode.fragment_kind(), &snapshot.binding.schema))
    }

    async fn plan_and_run(
        &self,
        session_id: &str,
        question: &str,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<Interaction, QueryError> {
        if let Some(verdict) = screen_question(question, self.max_question_len) {
            self.audit(session_id, 0, None, false, verdict.rule, started, "validation_rejected");
            return Err(rejection(&verdict));
        }

        let session = self.resolve_session(session_id).await?;
        let snapshot = session.snapshot().await;
        let binding = Arc::clone(&snapshot.binding);
        let expected_kind = binding.mode.fragment_kind();

        let mut request = ProposalRequest::new(
            question.trim(),
            binding.mode,
            Arc::clone(&binding.schema),
            binding.preview.clone(),
        );

        let mut attempt = 0;
        let accepted = loop {
            attempt += 1;
            let fragment = match self.propose(&request, cancel).await {
                Ok(fragment) => fragment,
                Err(err) => {
                    self.audit(session_id, attempt, None, false, None, started, err.kind());
                    return Err(err);
                }
            };

            let verdict = self.verdict_for(&fragment, expected_kind, &binding.schema);
            if verdict.allowed {
                break Fragment::new(fragment.kind, verdict.executable(&fragment.text));
            }

            let retry = attempt <= self.regeneration_retries;
            let outcome = if retry { OUTCOME_REGENERATE } else { "validation_rejected" };
            self.audit(session_id, attempt, Some(&fragment), false, verdict.rule, started, outcome);
            tracing::warn!(
                "[QueryEngine] Session {} attempt {} rejected: {}",
                session_id,
                attempt,
                verdict.rule.map(|rule| rule.to_string()).unwrap_or_default()
            );

            if !retry {
                return Err(rejection(&verdict));
            }
            request = request.with_feedback(feedback_for(&fragment, &verdict));
        };

        let executed = self.sandbox.execute(&binding.source, &accepted, cancel).await;
        let rows = match executed {
            Ok(rows) => rows,
            Err(err) => {
                let err = execution_failure(session_id, err);
                self.audit(session_id, attempt, Some(&accepted), true, None, started, err.kind());
                return Err(err);
            }
        };

        let mut interaction = Interaction::new(
            question.trim(),
            accepted.text.clone(),
            accepted.kind,
            format_answer(&rows),
        );
        interaction.row_count = rows.row_count();
        interaction.truncated = rows.truncated;
        interaction.elapsed_ms = elapsed_ms(started);

        if let Err(err) = session.append(interaction.clone(), snapshot.generation).await {
            self.audit(session_id, attempt, Some(&accepted), true, None, started, err.kind());
            return Err(err);
        }

        self.audit(session_id, attempt, Some(&accepted), true, None, started, OUTCOME_OK);
        Ok(interaction)
    }

    async fn resolve_session(&self, session_id: &str) -> Result<Arc<Session>, QueryError> {
        self.sessions
            .session(session_id)
            .await
            .map_err(|err| session_failure(session_id, err))
    }

    /// Asks the agent for a fragment, bounded by the request timeout and `cancel`.
    ///
    /// A non-retryable failure of the primary agent is handed to the fallback
    /// agent when one is configured.
    async fn propose(
        &self,
        request: &ProposalRequest,
        cancel: &CancellationToken,
    ) -> Result<Fragment, QueryError> {
        let err = match self.ask(self.agent.as_ref(), request, cancel).await? {
            Ok(fragment) => return Ok(fragment),
            Err(err) => err,
        };
        match &self.fallback {
            Some(fallback) if !err.is_retryable() => {
                tracing::warn!(
                    "[QueryEngine] Agent '{}' failed ({}); falling back to '{}'",
                    self.agent.name(),
                    err,
                    fallback.name()
                );
                self.ask(fallback.as_ref(), request, cancel)
                    .await?
                    .map_err(|err| generation_failure(fallback.name(), err))
            }
            _ => Err(generation_failure(self.agent.name(), err)),
        }
    }

    /// The outer `Result` carries cancellation; the inner one the agent outcome.
    async fn ask(
        &self,
        agent: &dyn FragmentAgent,
        request: &ProposalRequest,
        cancel: &CancellationToken,
    ) -> Result<Result<Fragment, AgentError>, QueryError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(QueryError::Cancelled),
            outcome = tokio::time::timeout(self.request_timeout, agent.propose(request)) => {
                Ok(outcome.unwrap_or(Err(AgentError::Timeout(self.request_timeout))))
            }
        }
    }

    fn verdict_for(
        &self,
        fragment: &Fragment,
        expected_kind: FragmentKind,
        schema: &querent_core::schema::SourceSchema,
    ) -> ValidationVerdict {
        if fragment.kind != expected_kind {
            return ValidationVerdict::reject(
                RejectionRule::KindMismatch,
                format!("expected a {expected_kind} fragment, got {}", fragment.kind),
            );
        }
        self.validator.validate(&fragment.text, fragment.kind, schema)
    }

    #[allow(clippy::too_many_arguments)]
    fn audit(
        &self,
        session_id: &str,
        attempt: usize,
        fragment: Option<&Fragment>,
        allowed: bool,
        rule: Option<RejectionRule>,
        started: Instant,
        outcome: &str,
    ) {
        AuditRecord {
            session_id,
            attempt,
            fragment_kind: fragment.map(|fragment| fragment.kind),
            fragment: fragment.map(|fragment| fragment.text.as_str()),
            allowed,
            rule,
            elapsed_ms: elapsed_ms(started),
            outcome,
        }
        .emit();
    }
}

// ============================================================================
// Error conversion at the planner boundary
// ============================================================================

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn rejection(verdict: &ValidationVerdict) -> QueryError {
    let reason = verdict
        .rule
        .map(|rule| rule.reason())
        .unwrap_or("the query was rejected");
    QueryError::rejected(reason)
}

/// Feedback for the agent: the rule plus the validator's internal detail.
fn feedback_for(fragment: &Fragment, verdict: &ValidationVerdict) -> RegenerationFeedback {
    let rule = verdict.rule.map(|rule| rule.reason()).unwrap_or("rejected");
    let reason = match &verdict.detail {
        Some(detail) => format!("{rule} ({detail})"),
        None => rule.to_string(),
    };
    RegenerationFeedback {
        rejected_fragment: fragment.text.clone(),
        reason,
    }
}

fn session_failure(session_id: &str, err: QuerentError) -> QueryError {
    if err.is_not_found() {
        return QueryError::SessionNotFound {
            session_id: session_id.to_string(),
        };
    }
    let fault = QueryError::internal_fault();
    if let QueryError::InternalFault { incident } = &fault {
        tracing::error!(
            "[QueryEngine] Incident {}: session lookup for {} failed: {}",
            incident,
            session_id,
            err
        );
    }
    fault
}

/// Provider details stay in the logs; the caller gets a fixed message.
fn generation_failure(agent: &str, err: AgentError) -> QueryError {
    tracing::warn!("[QueryEngine] Agent '{}' failed: {}", agent, err);
    let message = match &err {
        AgentError::Timeout(limit) => {
            format!("the model did not answer within {}s", limit.as_secs())
        }
        AgentError::ProcessError {
            status_code: Some(status),
            ..
        } => format!("the model provider returned status {status}"),
        AgentError::ProcessError { .. } => "the model provider could not be reached".to_string(),
        AgentError::MalformedResponse(_) => "the model returned an unusable response".to_string(),
        AgentError::ExecutionFailed(_) => "the model could not produce a query".to_string(),
    };
    QueryError::GenerationFailure {
        message,
        retryable: err.is_retryable(),
    }
}

fn execution_failure(session_id: &str, err: ExecutionError) -> QueryError {
    match err {
        ExecutionError::Timeout(budget) => QueryError::ExecutionTimeout { budget },
        ExecutionError::ConnectionTimeout(waited) => QueryError::ConnectionTimeout { waited },
        ExecutionError::Cancelled => QueryError::Cancelled,
        ExecutionError::KindMismatch { .. } => QueryError::rejected(RejectionRule::KindMismatch.reason()),
        ExecutionError::Database(message) if is_stale_schema(&message) => {
            tracing::warn!(
                "[QueryEngine] Session {} database no longer matches its schema: {}",
                session_id,
                message
            );
            QueryError::schema_mismatch("the bound database no longer matches its schema; bind it again")
        }
        other => {
            let fault = QueryError::internal_fault();
            if let QueryError::InternalFault { incident } = &fault {
                tracing::error!(
                    "[QueryEngine] Incident {}: execution failed for session {}: {}",
                    incident,
                    session_id,
                    other
                );
            }
            fault
        }
    }
}

fn is_stale_schema(message: &str) -> bool {
    message.contains("no such table") || message.contains("no such column")
}
