use anyhow::{Context, Result};
use colored::Colorize;
use querent_core::config::QuerentConfig;
use querent_infrastructure::ConfigService;
use std::process::ExitCode;

pub fn show(config: &QuerentConfig, service: &ConfigService) -> Result<ExitCode> {
    let path = service.config_path()?;
    let rendered = toml::to_string_pretty(&config.redacted()).context("failed to render configuration")?;

    println!("{}", format!("# {}", path.display()).bright_black());
    println!(
        "{}",
        format!(
            "# api_key: {}",
            if config.model.api_key.is_some() { "set" } else { "not set" }
        )
        .bright_black()
    );
    println!("{rendered}");
    Ok(ExitCode::SUCCESS)
}
