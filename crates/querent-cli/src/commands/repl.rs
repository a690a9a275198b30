//! Interactive question loop.

use super::run_interruptible;
use crate::output::{print_history, print_interaction, print_preview, print_query_error, print_summary};
use crate::source::SourceArgs;
use anyhow::Result;
use colored::Colorize;
use querent_application::QueryApp;
use querent_core::config::QuerentConfig;
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Context, Editor, Helper};
use std::borrow::Cow::{self, Borrowed, Owned};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

const COMMANDS: &[&str] = &[":help", ":history", ":preview", ":stats", ":quit"];

/// Completion, highlighting and hints for `:` commands.
#[derive(Clone)]
struct ReplHelper;

impl Helper for ReplHelper {}

impl Completer for ReplHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let line = &line[..pos];
        if !line.starts_with(':') {
            return Ok((0, vec![]));
        }
        let candidates = COMMANDS
            .iter()
            .filter(|cmd| cmd.starts_with(line))
            .map(|cmd| Pair {
                display: cmd.to_string(),
                replacement: cmd.to_string(),
            })
            .collect();
        Ok((0, candidates))
    }
}

impl Highlighter for ReplHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if line.starts_with(':') {
            Owned(line.bright_cyan().to_string())
        } else {
            Borrowed(line)
        }
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

impl Hinter for ReplHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> Option<String> {
        let line = &line[..pos];
        if !line.starts_with(':') || line.contains(' ') {
            return None;
        }
        COMMANDS
            .iter()
            .find(|cmd| cmd.starts_with(line) && cmd.len() > line.len())
            .map(|cmd| cmd[line.len()..].to_string())
    }
}

impl Validator for ReplHelper {}

pub async fn run(config: QuerentConfig, source: SourceArgs) -> Result<ExitCode> {
    let label = source.label();
    let app = QueryApp::from_config(config)?;
    let session_id = source.bind(&app).await?;

    let sweeper_cancel = CancellationToken::new();
    let sweeper = app.spawn_sweeper(sweeper_cancel.clone());

    let mut rl: Editor<ReplHelper, DefaultHistory> = Editor::new()?;
    rl.set_helper(Some(ReplHelper));

    println!("{}", "=== Querent ===".bright_magenta().bold());
    println!(
        "{}",
        format!(
            "Bound {} ({} agent). Ask a question, or type :help.",
            label,
            app.engine.agent_name()
        )
        .bright_black()
    );
    println!();

    loop {
        let line = match rl.readline("?> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!("{}", "CTRL-C detected. Type :quit to exit.".yellow());
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("{}", format!("Error: {err:?}").red());
                break;
            }
        };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(input);

        match input {
            ":quit" | ":q" | ":exit" => break,
            ":help" => {
                println!(":history  questions asked in this session");
                println!(":preview  sample rows of the bound source");
                println!(":stats    answer rate and latency of recent queries");
                println!(":quit     leave");
            }
            ":history" => match app.sessions.get_history(&session_id).await {
                Ok(history) => print_history(&history),
                Err(err) => eprintln!("{}", err.to_string().red()),
            },
            ":preview" => match app.sessions.preview(&session_id).await {
                Ok(previews) => print_preview(&previews),
                Err(err) => eprintln!("{}", err.to_string().red()),
            },
            ":stats" => print_summary(&app.engine.performance_summary()),
            command if command.starts_with(':') => {
                println!("{}", format!("Unknown command {command}").bright_black());
            }
            question => match run_interruptible(&app, &session_id, question).await {
                Ok(interaction) => print_interaction(&interaction),
                Err(err) => print_query_error(&err),
            },
        }
        println!();
    }

    sweeper_cancel.cancel();
    let _ = sweeper.await;
    let _ = app.sessions.close_session(&session_id).await;
    println!("{}", "Goodbye!".bright_green());
    Ok(ExitCode::SUCCESS)
}
