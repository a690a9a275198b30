pub mod ask;
pub mod config;
pub mod repl;
pub mod validate;

use querent_application::QueryApp;
use querent_core::error::QueryError;
use querent_core::session::Interaction;
use tokio_util::sync::CancellationToken;

/// Runs one question; Ctrl-C cancels it instead of killing the process.
pub async fn run_interruptible(
    app: &QueryApp,
    session_id: &str,
    question: &str,
) -> Result<Interaction, QueryError> {
    let cancel = CancellationToken::new();
    let query = app.engine.run_query(session_id, question, &cancel);
    tokio::pin!(query);

    tokio::select! {
        result = &mut query => result,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            query.await
        }
    }
}
