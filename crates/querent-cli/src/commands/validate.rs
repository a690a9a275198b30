use crate::source::SourceArgs;
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use querent_application::QueryApp;
use querent_core::agent::Fragment;
use querent_core::config::QuerentConfig;
use std::process::ExitCode;

#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct FragmentArgs {
    /// SQL statement to check against a database source
    #[arg(long, value_name = "TEXT")]
    pub sql: Option<String>,

    /// Frame expression to check against a JSON source
    #[arg(long, value_name = "TEXT")]
    pub code: Option<String>,
}

impl FragmentArgs {
    fn into_fragment(self) -> Fragment {
        match (self.sql, self.code) {
            (Some(sql), _) => Fragment::sql(sql),
            (None, Some(code)) => Fragment::code(code),
            (None, None) => Fragment::code(""),
        }
    }
}

pub async fn run(
    config: QuerentConfig,
    source: SourceArgs,
    fragment: FragmentArgs,
    detail: bool,
) -> Result<ExitCode> {
    let app = QueryApp::from_config(config)?;
    let session_id = source.bind(&app).await?;
    let fragment = fragment.into_fragment();

    let verdict = app.engine.validate_fragment(&session_id, &fragment).await?;
    if verdict.allowed {
        println!("{}", "ACCEPTED".green().bold());
        println!("{}", verdict.executable(&fragment.text));
        return Ok(ExitCode::SUCCESS);
    }

    let rule = verdict.rule.map(|rule| rule.to_string()).unwrap_or_default();
    println!("{} {}", "REJECTED".red().bold(), format!("({rule})").bright_black());
    if let Some(reason) = &verdict.reason {
        println!("{reason}");
    }
    if detail {
        if let Some(internal) = &verdict.detail {
            println!("{}", internal.bright_black());
        }
    }
    Ok(ExitCode::from(2))
}
