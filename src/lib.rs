//! silent-organizer - reversible, unattended organization of a downloads folder
//!
//! A [`watcher::FileWatcher`] reports files once they stop growing, the
//! [`orchestrator::Organizer`] classifies them against a TOML rule set and
//! moves them without ever overwriting anything, and every step is recorded
//! in an [`audit::AuditLog`] from which moves of the last 24 hours can be
//! undone one at a time.

pub mod audit;
pub mod classifier;
pub mod cli;
pub mod collaborators;
pub mod config;
pub mod mover;
pub mod orchestrator;
pub mod output;
pub mod paths;
pub mod rename;
pub mod undo;
pub mod watcher;

pub use audit::{ActionType, AuditEntry, AuditError, AuditLog, EntryStatus, Insights};
pub use classifier::{ClassificationDecision, Classifier};
pub use collaborators::{DuplicateDetector, DuplicateVerdict, RenameSuggester, RenameSuggestion};
pub use config::{ConfigError, RuleSet};
pub use mover::{MoveError, safe_move};
pub use orchestrator::{OrganizeOutcome, Organizer, Status, WatchHandle};
pub use undo::{UndoFailure, UndoOutcome};
pub use watcher::{FileEvent, FileEventKind, FileWatcher, StableFileHandler, WatcherSettings};
