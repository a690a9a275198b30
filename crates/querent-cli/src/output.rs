//! Terminal rendering.

use colored::Colorize;
use querent_application::PerformanceSummary;
use querent_core::error::QueryError;
use querent_core::session::{Interaction, TablePreview};
use querent_execution::AuditEvent;
use tokio::sync::mpsc;

pub fn print_interaction(interaction: &Interaction) {
    for line in interaction.answer.lines() {
        println!("{}", line.bright_blue());
    }
    println!(
        "{}",
        format!("[{}] {}", interaction.fragment_kind, interaction.generated_fragment).bright_black()
    );
    println!(
        "{}",
        format!(
            "{} row(s){} in {}ms",
            interaction.row_count,
            if interaction.truncated { ", truncated" } else { "" },
            interaction.elapsed_ms
        )
        .bright_black()
    );
}

pub fn print_query_error(err: &QueryError) {
    eprintln!("{}", format!("{err}").red());
    if err.is_retryable() {
        eprintln!("{}", "This error is temporary; try again.".yellow());
    }
    if let QueryError::SchemaMismatch { .. } = err {
        eprintln!("{}", "Bind the source again to refresh its schema.".yellow());
    }
}

pub fn print_history(history: &[Interaction]) {
    if history.is_empty() {
        println!("{}", "No questions asked yet.".bright_black());
        return;
    }
    for (index, interaction) in history.iter().enumerate() {
        println!(
            "{} {}",
            format!("{:>3}.", index + 1).bright_black(),
            interaction.question.green()
        );
        println!("     {}", interaction.generated_fragment.bright_black());
    }
}

pub fn print_preview(previews: &[TablePreview]) {
    for preview in previews {
        println!("{}", format!("== {} ==", preview.table).bright_magenta());
        println!("{}", preview.rows.columns.join(" | ").bold());
        for row in &preview.rows.rows {
            let cells: Vec<String> = row.iter().map(ToString::to_string).collect();
            println!("{}", cells.join(" | "));
        }
        if preview.rows.truncated {
            println!("{}", "...".bright_black());
        }
    }
}

pub fn print_summary(summary: &PerformanceSummary) {
    println!(
        "{} queries, {:.0}% answered, {:.1}ms average",
        summary.total_queries,
        summary.success_rate * 100.0,
        summary.avg_latency_ms
    );
    for (outcome, count) in &summary.outcomes {
        println!("  {outcome}: {count}");
    }
}

/// Prints audit events as JSON lines on stderr until the channel closes.
pub async fn print_audit_events(mut events: mpsc::UnboundedReceiver<AuditEvent>) {
    while let Some(event) = events.recv().await {
        match serde_json::to_string(&event) {
            Ok(line) => eprintln!("{}", format!("[audit] {line}").bright_black()),
            Err(e) => tracing::warn!("[Cli] Could not render audit event: {}", e),
        }
    }
}
