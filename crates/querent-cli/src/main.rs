use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use querent_execution::{AuditEventLayer, init_tracing};
use querent_infrastructure::ConfigService;
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;
mod output;
mod source;

use source::SourceArgs;

#[derive(Parser)]
#[command(name = "querent")]
#[command(about = "Querent - ask questions of tables and SQLite databases in plain language", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print one audit record per query attempt to stderr
    #[arg(long, global = true)]
    audit: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a single question and exit
    Ask {
        #[command(flatten)]
        source: SourceArgs,

        /// The question, in plain language
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
    },
    /// Interactive session over one source
    Repl {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Run only the security validator on a fragment
    Validate {
        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        fragment: commands::validate::FragmentArgs,

        /// Also print the internal rejection detail
        #[arg(long)]
        detail: bool,
    },
    /// Print the effective configuration (API key redacted)
    Config,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config_service = ConfigService::new();
    if let Some(path) = &cli.config {
        config_service = config_service.with_config_file(path);
    }
    let config = config_service
        .get_config()
        .context("failed to load configuration")?;

    if cli.audit {
        let (layer, events) = AuditEventLayer::channel();
        init_tracing(&config.logging, Some(layer))?;
        tokio::spawn(output::print_audit_events(events));
    } else {
        init_tracing(&config.logging, None)?;
    }

    match cli.command {
        Commands::Ask { source, question } => {
            commands::ask::run(config, source, &question.join(" ")).await
        }
        Commands::Repl { source } => commands::repl::run(config, source).await,
        Commands::Validate {
            source,
            fragment,
            detail,
        } => commands::validate::run(config, source, fragment, detail).await,
        Commands::Config => commands::config::show(&config, &config_service),
    }
}
