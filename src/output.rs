//! Terminal rendering for the CLI.
//!
//! Everything user-facing goes through [`OutputFormatter`] so styling stays
//! consistent. Diagnostics go through `tracing` instead.

use crate::audit::{AuditEntry, EntryStatus, Insights};
use crate::orchestrator::{OrganizeOutcome, Status};
use crate::undo::UndoOutcome;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a success message in green with a checkmark.
    ///
    /// ```no_run
    /// use silent_organizer::output::OutputFormatter;
    /// OutputFormatter::success("Undo completed");
    /// ```
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    pub fn info(message: &str) {
        println!("{}", message.cyan());
    }

    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    /// Spinner shown while the watcher runs.
    pub fn watch_spinner(directory: &Path) -> ProgressBar {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            spinner.set_style(style);
        }
        spinner.set_message(format!(
            "Watching {} (Ctrl-C to stop)",
            directory.display()
        ));
        spinner.enable_steady_tick(Duration::from_millis(120));
        spinner
    }

    pub fn organize_outcome(file: &Path, outcome: &OrganizeOutcome) {
        match outcome {
            OrganizeOutcome::Moved { destination, .. } => Self::success(&format!(
                "{} → {}",
                file.display(),
                destination.display()
            )),
            OrganizeOutcome::Skipped { reason, .. } => {
                Self::warning(&format!("Skipped {} ({reason})", file.display()))
            }
            OrganizeOutcome::Failed { error, .. } => {
                Self::error(&format!("Could not move {}: {error}", file.display()))
            }
        }
    }

    pub fn undo_outcome(outcome: &UndoOutcome) {
        match outcome {
            UndoOutcome::Restored { .. } => Self::success(&outcome.message()),
            UndoOutcome::NothingToUndo => Self::info(&outcome.message()),
            UndoOutcome::Failed { reason, .. } => {
                Self::error(&format!("{} [{}]", outcome.message(), reason.as_str()))
            }
        }
    }

    pub fn status(status: &Status) {
        Self::header("STATUS");
        let running = if status.watcher_running {
            "running".green()
        } else {
            "stopped".yellow()
        };
        println!("  Watching:    {}", status.downloads_dir.display());
        println!("  Watcher:     {running}");
        println!("  Rules:       {} (version {})", status.rules_path.display(), status.rules_version);
        println!("  Log:         {}", status.log_path.display());
        match status.last_event_timestamp_utc {
            Some(at) => println!("  Last event:  {}", at.to_rfc3339()),
            None => println!("  Last event:  {}", "none".dimmed()),
        }
    }

    pub fn insights(insights: &Insights) {
        Self::header("INSIGHTS");
        println!(
            "  Files organized today: {}",
            insights.files_organized.daily.to_string().green()
        );
        println!(
            "  Files organized total: {}",
            insights.files_organized.total.to_string().green().bold()
        );
        println!(
            "  Estimated time saved:  {}",
            format_duration(insights.estimated_time_saved_seconds)
        );
        println!(
            "  Clutter reduction:     {:.2}%",
            insights.downloads_clutter_reduction_percent
        );
        println!("  Skipped:               {}", insights.skipped_total);
        println!("  Errors logged:         {}", insights.errors_logged);

        if insights.file_type_distribution.is_empty() {
            return;
        }

        let width = insights
            .file_type_distribution
            .iter()
            .map(|e| e.extension.len())
            .max()
            .unwrap_or(0)
            .max(9);
        println!();
        println!("  {:<width$} | {}", "Extension".bold(), "Files".bold());
        println!("  {}", "-".repeat(width + 10));
        for entry in &insights.file_type_distribution {
            println!("  {:<width$} | {}", entry.extension, entry.count.to_string().green());
        }
    }

    pub fn log_entries(entries: &[AuditEntry]) {
        if entries.is_empty() {
            Self::info("The activity log is empty.");
            return;
        }

        for entry in entries {
            let status = match entry.status {
                EntryStatus::Completed => entry.status.to_string().green(),
                EntryStatus::Failed => entry.status.to_string().red(),
                EntryStatus::Planned => entry.status.to_string().yellow(),
            };
            let mut line = format!(
                "{} {:<9} {:<6}",
                entry.timestamp_utc.format("%Y-%m-%d %H:%M:%S"),
                status,
                entry.action_type.to_string().bold()
            );
            if let Some(src) = &entry.source {
                line.push_str(&format!(" {src}"));
            }
            if let Some(dest) = &entry.destination {
                line.push_str(&format!(" → {dest}"));
            }
            if let Some(detail) = entry
                .reason
                .as_deref()
                .or(entry.error.as_deref())
                .or(entry.message.as_deref())
            {
                line.push_str(&format!(" ({})", detail.dimmed()));
            }
            if entry.undone {
                line.push_str(&format!(" {}", "[undone]".cyan()));
            }
            println!("{line}");
        }
    }
}

/// `95` → `1m 35s`, `7260` → `2h 1m`.
fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {secs}s")
    } else {
        format!("{secs}s")
    }
}
