//! Command-line control surface.
//!
//! Each subcommand builds an [`Organizer`] from the resolved paths and calls
//! one of its operations. `--json` switches the read-only commands to
//! machine-readable output.

use crate::audit::AuditError;
use crate::config::{ConfigError, RuleSet, config_dir};
use crate::orchestrator::{DEFAULT_LOG_LIMIT, Organizer};
use crate::output::OutputFormatter;
use crate::paths::default_downloads_dir;
use crate::watcher::WatcherError;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[cfg(unix)]
use signal_hook::consts::{SIGINT, SIGTERM};
#[cfg(unix)]
use signal_hook::iterator::Signals;

/// Signals that end `watch` after the watcher has been stopped.
#[cfg(unix)]
pub const SHUTDOWN_SIGNALS: [i32; 2] = [SIGINT, SIGTERM];

#[derive(Debug, Parser)]
#[command(name = "silent-organizer", version, about = "Quietly files away new downloads, reversibly")]
pub struct Cli {
    /// Directory to watch and organize.
    #[arg(long, env = "SO_DOWNLOADS_DIR", global = true)]
    pub downloads_dir: Option<PathBuf>,

    /// Rule document (TOML).
    #[arg(long, env = "SO_RULES_PATH", global = true)]
    pub rules: Option<PathBuf>,

    /// Activity log (JSON).
    #[arg(long, env = "SO_LOG_PATH", global = true)]
    pub log_path: Option<PathBuf>,

    /// Print JSON instead of formatted text.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Watch the downloads directory and organize files as they settle.
    Watch,
    /// Organize a single file now.
    Organize { file: PathBuf },
    /// Reverse the most recent move from the last 24 hours.
    Undo,
    /// Show what is being watched and with which rules.
    Status,
    /// Summarize the activity log.
    Insights,
    /// Show recent activity log entries.
    Logs {
        #[arg(long, default_value_t = DEFAULT_LOG_LIMIT)]
        limit: usize,
    },
    /// Re-read the rule document and report problems.
    Reload,
    /// Write a starter rule document if none exists.
    InitRules,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Audit(#[from] AuditError),
    #[error(transparent)]
    Watcher(#[from] WatcherError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to listen for shutdown: {0}")]
    Shutdown(#[source] io::Error),
    #[error("Failed to encode output: {0}")]
    Json(#[from] serde_json::Error),
}

/// Paths every command needs, after flags, environment and defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPaths {
    pub downloads_dir: PathBuf,
    pub rules_path: PathBuf,
    pub log_path: PathBuf,
}

impl Cli {
    pub fn resolved_paths(&self) -> ResolvedPaths {
        ResolvedPaths {
            downloads_dir: self.downloads_dir.clone().unwrap_or_else(default_downloads_dir),
            rules_path: RuleSet::locate(self.rules.as_deref()),
            log_path: self
                .log_path
                .clone()
                .unwrap_or_else(|| config_dir().join("activity_log.json")),
        }
    }
}

/// Runs one command. `Ok(false)` means the command ran but did not succeed.
pub fn run(cli: Cli) -> Result<bool, CliError> {
    let paths = cli.resolved_paths();

    if let Command::InitRules = cli.command {
        return init_rules(&paths);
    }

    let organizer = Organizer::new(&paths.downloads_dir, &paths.rules_path, &paths.log_path)?;

    match cli.command {
        Command::Watch => watch(Arc::new(organizer)),
        Command::Organize { file } => {
            let outcome = organizer.organize_file(&file)?;
            if cli.json {
                print_json(&outcome)?;
            } else {
                OutputFormatter::organize_outcome(&file, &outcome);
            }
            Ok(outcome.is_success())
        }
        Command::Undo => {
            let outcome = organizer.undo()?;
            if cli.json {
                print_json(&outcome)?;
            } else {
                OutputFormatter::undo_outcome(&outcome);
            }
            Ok(!matches!(outcome, crate::undo::UndoOutcome::Failed { .. }))
        }
        Command::Status => {
            let status = organizer.status();
            if cli.json {
                print_json(&status)?;
            } else {
                OutputFormatter::status(&status);
            }
            Ok(true)
        }
        Command::Insights => {
            let insights = organizer.insights()?;
            if cli.json {
                print_json(&insights)?;
            } else {
                OutputFormatter::insights(&insights);
            }
            Ok(true)
        }
        Command::Logs { limit } => {
            let entries = organizer.logs(limit)?;
            if cli.json {
                print_json(&entries)?;
            } else {
                OutputFormatter::log_entries(&entries);
            }
            Ok(true)
        }
        Command::Reload => match organizer.reload_rules() {
            Ok(()) => {
                OutputFormatter::success(&format!(
                    "Rules loaded from {} (version {})",
                    paths.rules_path.display(),
                    organizer.rules().version
                ));
                Ok(true)
            }
            Err(e) => {
                OutputFormatter::error(&format!("{e}; using default rules"));
                Ok(false)
            }
        },
        Command::InitRules => init_rules(&paths),
    }
}

fn init_rules(paths: &ResolvedPaths) -> Result<bool, CliError> {
    if RuleSet::starter().write_if_absent(&paths.rules_path)? {
        OutputFormatter::success(&format!("Wrote starter rules to {}", paths.rules_path.display()));
        Ok(true)
    } else {
        OutputFormatter::warning(&format!(
            "{} already exists; left unchanged",
            paths.rules_path.display()
        ));
        Ok(false)
    }
}

/// Runs the watcher until SIGINT or SIGTERM.
#[cfg(unix)]
fn watch(organizer: Arc<Organizer>) -> Result<bool, CliError> {
    let signals = Signals::new(SHUTDOWN_SIGNALS).map_err(CliError::Shutdown)?;
    watch_until_signalled(&organizer, signals)
}

/// Runs the watcher until standard input closes.
#[cfg(not(unix))]
fn watch(organizer: Arc<Organizer>) -> Result<bool, CliError> {
    let handle = organizer.watch()?;
    let spinner = OutputFormatter::watch_spinner(organizer.downloads_dir());

    let mut line = String::new();
    while io::stdin().read_line(&mut line).map_err(CliError::Shutdown)? > 0 {
        line.clear();
    }

    spinner.finish_and_clear();
    Ok(report_stop(handle.stop()))
}

/// Stops the watcher once one of `signals` arrives. A move already under
/// way finishes before this returns.
#[cfg(unix)]
fn watch_until_signalled(organizer: &Arc<Organizer>, mut signals: Signals) -> Result<bool, CliError> {
    let handle = organizer.watch()?;
    let spinner = OutputFormatter::watch_spinner(organizer.downloads_dir());

    let received = signals.forever().next();
    spinner.finish_and_clear();
    info!(signal = ?received, "shutdown requested");

    Ok(report_stop(handle.stop()))
}

fn report_stop(stopped: bool) -> bool {
    if stopped {
        OutputFormatter::success("Watcher stopped");
    } else {
        OutputFormatter::warning("Watcher did not stop cleanly");
    }
    stopped
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
