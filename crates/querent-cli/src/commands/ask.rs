use super::run_interruptible;
use crate::output::{print_interaction, print_query_error};
use crate::source::SourceArgs;
use anyhow::Result;
use querent_application::QueryApp;
use querent_core::config::QuerentConfig;
use std::process::ExitCode;

pub async fn run(config: QuerentConfig, source: SourceArgs, question: &str) -> Result<ExitCode> {
    let app = QueryApp::from_config(config)?;
    let session_id = source.bind(&app).await?;

    match run_interruptible(&app, &session_id, question).await {
        Ok(interaction) => {
            print_interaction(&interaction);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            print_query_error(&err);
            Ok(ExitCode::FAILURE)
        }
    }
}
