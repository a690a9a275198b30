//! End-to-end planner behaviour with scripted agents and executors.

use async_trait::async_trait;
use querent_application::{DataSource, QueryApp};
use querent_core::agent::{AgentError, Fragment, FragmentAgent, ProposalRequest, RegenerationFeedback};
use querent_core::config::QuerentConfig;
use querent_core::error::QueryError;
use querent_core::relational::{ExecutionLimits, RelationalError, RelationalExecutor};
use querent_core::schema::{ColumnSchema, ColumnType, SourceSchema, TableSchema};
use querent_core::table::{ResultSet, Table, Value};
use querent_execution::AuditEventLayer;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;

// ============================================================================
// Test doubles
// ============================================================================

/// Replays canned replies in order; the last one repeats.
struct ScriptedAgent {
    replies: Mutex<VecDeque<Result<Fragment, AgentError>>>,
    delay: Duration,
    feedback: Mutex<Vec<Option<RegenerationFeedback>>>,
}

impl ScriptedAgent {
    fn new(replies: Vec<Result<Fragment, AgentError>>) -> Arc<Self> {
        Self::slow(replies, Duration::ZERO)
    }

    fn slow(replies: Vec<Result<Fragment, AgentError>>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            delay,
            feedback: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.feedback.lock().unwrap().len()
    }
}

#[async_trait]
impl FragmentAgent for ScriptedAgent {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn propose(&self, request: &ProposalRequest) -> Result<Fragment, AgentError> {
        self.feedback.lock().unwrap().push(request.feedback.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut replies = self.replies.lock().unwrap();
        if replies.len() > 1 {
            replies.pop_front().unwrap()
        } else {
            replies.front().cloned().unwrap()
        }
    }
}

/// Counts statements; returns one row per call.
#[derive(Default)]
struct CountingExecutor {
    calls: AtomicUsize,
}

#[async_trait]
impl RelationalExecutor for CountingExecutor {
    fn label(&self) -> &str {
        "counting.db"
    }

    async fn execute_select(
        &self,
        _sql: &str,
        _limits: &ExecutionLimits,
    ) -> Result<ResultSet, RelationalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ResultSet::new(
            vec!["name".into()],
            vec![vec![Value::Text("ada".into())]],
        ))
    }
}

// ============================================================================
// Fixtures
// ============================================================================

fn people(rows: usize) -> Table {
    let rows = (1..=rows)
        .map(|i| vec![Value::Text(format!("p{i}")), Value::Int(20 + i as i64)])
        .collect();
    Table::from_rows("people", vec!["name".into(), "age".into()], rows).unwrap()
}

fn users_schema() -> SourceSchema {
    SourceSchema::new(vec![TableSchema::new(
        "users",
        vec![
            ColumnSchema::new("id", ColumnType::Integer),
            ColumnSchema::new("name", ColumnType::Text),
        ],
    )])
}

fn app(agent: Arc<dyn FragmentAgent>, config: QuerentConfig) -> QueryApp {
    QueryApp::with_agent(config, agent)
}

async fn relational_session(app: &QueryApp, executor: Arc<CountingExecutor>) -> String {
    app.sessions
        .create_session(DataSource::Database {
            executor,
            schema: users_schema(),
            preview: Vec::new(),
        })
        .await
        .unwrap()
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn counts_rows_of_a_small_table() {
    let app = QueryApp::from_config(QuerentConfig::default()).unwrap();
    let table = Table::from_rows(
        "pets",
        vec!["name".into(), "kind".into()],
        vec![
            vec![Value::Text("rex".into()), Value::Text("dog".into())],
            vec![Value::Text("tom".into()), Value::Text("cat".into())],
            vec![Value::Text("nemo".into()), Value::Text("fish".into())],
        ],
    )
    .unwrap();
    let id = app.sessions.create_session(DataSource::Table(table)).await.unwrap();

    let interaction = app
        .engine
        .run_query(&id, "how many rows?", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(interaction.generated_fragment, "len(df)");
    assert!(interaction.answer.contains('3'), "{}", interaction.answer);
    assert_eq!(app.sessions.get_history(&id).await.unwrap(), vec![interaction]);
}

#[tokio::test]
async fn stacked_statement_is_rejected_without_execution() {
    let agent = ScriptedAgent::new(vec![Ok(Fragment::sql(
        "SELECT * FROM users; DROP TABLE users;",
    ))]);
    let app = app(agent.clone(), QuerentConfig::default());
    let executor = Arc::new(CountingExecutor::default());
    let id = relational_session(&app, Arc::clone(&executor)).await;

    let err = app
        .engine
        .run_query(&id, "show users", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, QueryError::ValidationRejected { .. }));
    assert!(!err.to_string().contains("DROP"));
    // One regeneration by default.
    assert_eq!(agent.calls(), 2);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    assert!(app.sessions.get_history(&id).await.unwrap().is_empty());
}

#[tokio::test]
async fn regeneration_receives_feedback() {
    let agent = ScriptedAgent::new(vec![
        Ok(Fragment::sql("SELECT password FROM users")),
        Ok(Fragment::sql("SELECT name FROM users")),
    ]);
    let app = app(agent.clone(), QuerentConfig::default());
    let executor = Arc::new(CountingExecutor::default());
    let id = relational_session(&app, Arc::clone(&executor)).await;

    let interaction = app
        .engine
        .run_query(&id, "list user names", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(interaction.answer, "The result is ada.");
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);

    let feedback = agent.feedback.lock().unwrap().clone();
    assert!(feedback[0].is_none());
    let second = feedback[1].as_ref().unwrap();
    assert_eq!(second.rejected_fragment, "SELECT password FROM users");
    assert!(second.reason.contains("password"));
}

#[tokio::test]
async fn regeneration_can_be_disabled() {
    let agent = ScriptedAgent::new(vec![
        Ok(Fragment::sql("SELECT password FROM users")),
        Ok(Fragment::sql("SELECT name FROM users")),
    ]);
    let mut config = QuerentConfig::default();
    config.limits.regeneration_retries = 0;
    let app = app(agent.clone(), config);
    let id = relational_session(&app, Arc::new(CountingExecutor::default())).await;

    let err = app
        .engine
        .run_query(&id, "list user names", &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation_rejected");
    assert_eq!(agent.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_agent_is_a_generation_failure() {
    let agent = ScriptedAgent::slow(
        vec![Ok(Fragment::sql("SELECT name FROM users"))],
        Duration::from_secs(30),
    );
    let mut config = QuerentConfig::default();
    config.model.request_timeout_secs = 1;
    let app = app(agent, config);
    let executor = Arc::new(CountingExecutor::default());
    let id = relational_session(&app, Arc::clone(&executor)).await;

    let err = app
        .engine
        .run_query(&id, "list user names", &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        QueryError::GenerationFailure { retryable, .. } => assert!(retryable),
        other => panic!("expected GenerationFailure, got {other:?}"),
    }
    assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn provider_error_is_a_generation_failure() {
    let agent = ScriptedAgent::new(vec![Err(AgentError::MalformedResponse(
        "garbage from provider".into(),
    ))]);
    let app = app(agent, QuerentConfig::default());
    let id = app
        .sessions
        .create_session(DataSource::Table(people(3)))
        .await
        .unwrap();

    let err = app
        .engine
        .run_query(&id, "how many?", &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "generation_failure");
    assert!(!err.is_retryable());
    assert!(!err.to_string().contains("garbage"));
}

#[tokio::test]
async fn local_fallback_answers_after_a_final_provider_error() {
    let agent = ScriptedAgent::new(vec![Err(AgentError::ProcessError {
        status_code: Some(401),
        message: "invalid x-api-key".into(),
        is_retryable: false,
        retry_after: None,
    })]);
    let mut config = QuerentConfig::default();
    config.model.local_fallback = true;
    let app = app(agent.clone(), config);
    let id = app
        .sessions
        .create_session(DataSource::Table(people(3)))
        .await
        .unwrap();

    let interaction = app
        .engine
        .run_query(&id, "how many rows?", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(interaction.generated_fragment, "len(df)");
    assert!(interaction.answer.contains('3'), "{}", interaction.answer);
    assert_eq!(agent.calls(), 1);
}

#[tokio::test]
async fn local_fallback_skips_retryable_errors() {
    let agent = ScriptedAgent::new(vec![Err(AgentError::ProcessError {
        status_code: Some(429),
        message: "slow down".into(),
        is_retryable: true,
        retry_after: None,
    })]);
    let mut config = QuerentConfig::default();
    config.model.local_fallback = true;
    let app = app(agent, config);
    let id = app
        .sessions
        .create_session(DataSource::Table(people(3)))
        .await
        .unwrap();

    let err = app
        .engine
        .run_query(&id, "how many rows?", &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "generation_failure");
    assert!(err.is_retryable());
    assert!(app.sessions.get_history(&id).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn local_fallback_skips_timeouts() {
    let agent = ScriptedAgent::slow(
        vec![Ok(Fragment::code("len(df)"))],
        Duration::from_secs(30),
    );
    let mut config = QuerentConfig::default();
    config.model.request_timeout_secs = 1;
    config.model.local_fallback = true;
    let app = app(agent, config);
    let id = app
        .sessions
        .create_session(DataSource::Table(people(3)))
        .await
        .unwrap();

    let err = app
        .engine
        .run_query(&id, "how many rows?", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::GenerationFailure { retryable: true, .. }));
}

#[tokio::test]
async fn same_question_twice_gives_two_entries() {
    let app = QueryApp::from_config(QuerentConfig::default()).unwrap();
    let id = app
        .sessions
        .create_session(DataSource::Table(people(4)))
        .await
        .unwrap();
    let cancel = CancellationToken::new();

    let first = app.engine.run_query(&id, "average age", &cancel).await.unwrap();
    let second = app.engine.run_query(&id, "average age", &cancel).await.unwrap();

    assert_eq!(first.answer, second.answer);
    assert_eq!(first.generated_fragment, second.generated_fragment);
    assert_ne!(first.id, second.id);
    assert_eq!(app.sessions.get_history(&id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn history_keeps_call_order() {
    let app = QueryApp::from_config(QuerentConfig::default()).unwrap();
    let id = app
        .sessions
        .create_session(DataSource::Table(people(5)))
        .await
        .unwrap();
    let cancel = CancellationToken::new();
    let questions = ["how many rows?", "maximum age", "minimum age"];

    let mut ids = Vec::new();
    for question in questions {
        ids.push(app.engine.run_query(&id, question, &cancel).await.unwrap().id);
    }

    let history = app.sessions.get_history(&id).await.unwrap();
    assert_eq!(history.len(), questions.len());
    for (entry, (question, interaction_id)) in history.iter().zip(questions.iter().zip(&ids)) {
        assert_eq!(&entry.question, question);
        assert_eq!(&entry.id, interaction_id);
    }

    let single = app.sessions.get_interaction(&id, &ids[1]).await.unwrap();
    assert_eq!(single.question, "maximum age");
}

#[tokio::test]
async fn large_results_are_truncated_to_the_cap() {
    let agent = ScriptedAgent::new(vec![Ok(Fragment::code("df"))]);
    let mut config = QuerentConfig::default();
    config.limits.max_result_rows = 4;
    let app = app(agent, config);
    let id = app
        .sessions
        .create_session(DataSource::Table(people(10)))
        .await
        .unwrap();

    let interaction = app
        .engine
        .run_query(&id, "show everyone", &CancellationToken::new())
        .await
        .unwrap();

    assert!(interaction.truncated);
    assert_eq!(interaction.row_count, 4);
    assert!(interaction.answer.contains("p4"));
    assert!(!interaction.answer.contains("p5"));
    assert!(interaction.answer.contains("first 4 rows"));
}

#[tokio::test]
async fn unknown_session_and_cancellation() {
    let app = QueryApp::from_config(QuerentConfig::default()).unwrap();
    let err = app
        .engine
        .run_query("missing", "how many rows?", &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        QueryError::SessionNotFound {
            session_id: "missing".into()
        }
    );

    let id = app
        .sessions
        .create_session(DataSource::Table(people(3)))
        .await
        .unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = app.engine.run_query(&id, "how many rows?", &cancel).await.unwrap_err();
    assert_eq!(err, QueryError::Cancelled);
    assert!(app.sessions.get_history(&id).await.unwrap().is_empty());
}

#[tokio::test]
async fn suspicious_question_never_reaches_the_agent() {
    let agent = ScriptedAgent::new(vec![Ok(Fragment::code("len(df)"))]);
    let app = app(agent.clone(), QuerentConfig::default());
    let id = app
        .sessions
        .create_session(DataSource::Table(people(3)))
        .await
        .unwrap();

    let err = app
        .engine
        .run_query(&id, "<script>alert(1)</script>", &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation_rejected");
    assert_eq!(agent.calls(), 0);
}

#[tokio::test]
async fn metrics_and_audit_cover_every_attempt() {
    let (layer, mut events) = AuditEventLayer::channel();
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(layer));

    let agent = ScriptedAgent::new(vec![
        Ok(Fragment::code("df.to_csv('out.csv')")),
        Ok(Fragment::code("len(df)")),
    ]);
    let app = app(agent, QuerentConfig::default());
    let id = app
        .sessions
        .create_session(DataSource::Table(people(3)))
        .await
        .unwrap();

    app.engine
        .run_query(&id, "how many?", &CancellationToken::new())
        .await
        .unwrap();
    app.engine
        .run_query("missing", "how many?", &CancellationToken::new())
        .await
        .unwrap_err();

    let first = events.try_recv().unwrap();
    assert_eq!(first.field_str("outcome"), Some("regenerate"));
    assert_eq!(first.field_bool("allowed"), Some(false));
    assert_eq!(first.field_u64("attempt"), Some(1));

    let second = events.try_recv().unwrap();
    assert_eq!(second.field_str("outcome"), Some("ok"));
    assert_eq!(second.field_str("fragment"), Some("len(df)"));
    assert_eq!(second.field_u64("attempt"), Some(2));

    let summary = app.engine.performance_summary();
    assert_eq!(summary.total_queries, 2);
    assert_eq!(summary.success_rate, 0.5);
    assert_eq!(summary.outcomes["session_not_found"], 1);
}
