//! Durable, append-only activity log.
//!
//! The log is one JSON array rewritten in full on every mutation: the new
//! document goes to a temporary sibling, is synced, and then renamed over the
//! original, so a crash mid-write leaves the previous version intact.
//!
//! Entries are only ever appended. The two permitted in-place updates are a
//! `planned` entry moving to `completed` or `failed` (once), and a completed
//! `move` entry being flagged `undone` (once, see [`crate::undo`]).
//!
//! Every operation runs under one mutex, which is what serializes the
//! watcher thread against control-surface calls such as undo.

use crate::classifier::ClassificationDecision;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

/// Estimated seconds a person spends filing one download by hand.
pub const SECONDS_SAVED_PER_MOVE: u64 = 30;
/// Extensions reported in the insight histogram.
pub const TOP_EXTENSIONS: usize = 20;
/// Maximum stored length of an error on a `failed` entry.
pub const MAX_FAILURE_MESSAGE: usize = 500;
/// Maximum stored length of the message on an `error` entry.
pub const MAX_ERROR_MESSAGE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Planned,
    Completed,
    Failed,
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntryStatus::Planned => "planned",
            EntryStatus::Completed => "completed",
            EntryStatus::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Move,
    Undo,
    Skip,
    Error,
    Event,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActionType::Move => "move",
            ActionType::Undo => "undo",
            ActionType::Skip => "skip",
            ActionType::Error => "error",
            ActionType::Event => "event",
        })
    }
}

/// What the rename collaborator contributed to a move.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenameRecord {
    pub applied: bool,
    pub confidence: Option<f64>,
    pub reasons: Vec<String>,
}

/// What the duplicate collaborator contributed to a move.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DuplicateRecord {
    pub is_duplicate: bool,
    pub duplicate_of_hash: Option<String>,
    pub hamming_distance: Option<u32>,
}

/// One record in the activity log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub timestamp_utc: DateTime<Utc>,
    pub status: EntryStatus,
    pub action_type: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    /// Why a `skip` happened, e.g. `missing` or `base_destination_not_allowed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Machine-readable cause on failed undo entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_note: Option<String>,
    /// Notification kind on `event` entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    /// Operation that raised an `error` entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<ClassificationDecision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename: Option<RenameRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate: Option<DuplicateRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perceptual_hash: Option<String>,
    #[serde(default)]
    pub undone: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub undo_action_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_action_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_timestamp_utc: Option<DateTime<Utc>>,
}

impl AuditEntry {
    /// A fresh `planned` entry with a new id and the current time.
    pub fn new(action_type: ActionType) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            timestamp_utc: Utc::now(),
            status: EntryStatus::Planned,
            action_type,
            source: None,
            destination: None,
            reason: None,
            status_note: None,
            event_type: None,
            context: None,
            message: None,
            extra: None,
            decision: None,
            rename: None,
            duplicate: None,
            perceptual_hash: None,
            undone: false,
            undo_action_id: None,
            original_action_id: None,
            error: None,
            completed_timestamp_utc: None,
        }
    }

    pub fn with_source(mut self, path: &Path) -> Self {
        self.source = Some(path.to_string_lossy().into_owned());
        self
    }

    pub fn with_destination(mut self, path: &Path) -> Self {
        self.destination = Some(path.to_string_lossy().into_owned());
        self
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    /// Source and destination paths, if both are present and non-empty.
    pub fn paths(&self) -> Option<(&str, &str)> {
        match (self.source.as_deref(), self.destination.as_deref()) {
            (Some(src), Some(dest)) if !src.is_empty() && !dest.is_empty() => Some((src, dest)),
            _ => None,
        }
    }

    /// True for a move that happened and has not been reversed.
    pub fn is_undoable_move(&self) -> bool {
        self.action_type == ActionType::Move
            && self.status == EntryStatus::Completed
            && !self.undone
            && self.paths().is_some()
    }
}

/// Errors from reading or mutating the activity log.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Failed to read activity log {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("Failed to write activity log {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("Failed to serialize activity log: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Activity log entry not found: {0}")]
    EntryNotFound(String),
    #[error("Activity log entry {id} is already {status}")]
    InvalidTransition { id: String, status: EntryStatus },
    #[error("Activity log entry {0} is not an undoable move")]
    NotUndoable(String),
}

pub type AuditResult<T> = Result<T, AuditError>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilesOrganized {
    pub daily: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtensionCount {
    pub extension: String,
    pub count: usize,
}

/// Aggregates over the whole log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insights {
    pub files_organized: FilesOrganized,
    pub estimated_time_saved_seconds: u64,
    /// Destination extensions of completed moves, most frequent first.
    pub file_type_distribution: Vec<ExtensionCount>,
    /// Completed moves as a share of completed moves plus skips.
    pub downloads_clutter_reduction_percent: f64,
    pub errors_logged: usize,
    pub skipped_total: usize,
}

/// The activity log store.
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl AuditLog {
    /// Opens (without reading) the log at `path`, creating its directory.
    pub fn open(path: &Path) -> AuditResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| AuditError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The last `limit` entries in log order; `0` means all of them.
    pub fn list(&self, limit: usize) -> AuditResult<Vec<AuditEntry>> {
        let mut entries = self.session()?.entries;
        if limit > 0 && entries.len() > limit {
            entries.drain(..entries.len() - limit);
        }
        Ok(entries)
    }

    /// Appends `entry` as `planned` and returns its id.
    pub fn append_planned(&self, mut entry: AuditEntry) -> AuditResult<String> {
        entry.status = EntryStatus::Planned;
        entry.completed_timestamp_utc = None;
        self.session()?.append(entry)
    }

    /// Appends `entry` as already `completed`; for records with no mutation.
    pub fn append_completed(&self, mut entry: AuditEntry) -> AuditResult<String> {
        entry.status = EntryStatus::Completed;
        entry.completed_timestamp_utc = Some(Utc::now());
        self.session()?.append(entry)
    }

    pub fn mark_completed(&self, id: &str) -> AuditResult<()> {
        self.session()?.transition(id, EntryStatus::Completed, None)
    }

    pub fn mark_failed(&self, id: &str, error: &str) -> AuditResult<()> {
        self.session()?.transition(id, EntryStatus::Failed, Some(error))
    }

    /// Records an `error` entry for a failure that did not abort anything.
    pub fn log_error(&self, context: &str, message: &str, extra: Option<Value>) -> AuditResult<String> {
        let mut entry = AuditEntry::new(ActionType::Error);
        entry.context = Some(context.to_string());
        entry.message = Some(truncate_chars(message, MAX_ERROR_MESSAGE));
        entry.extra = extra;
        self.append_completed(entry)
    }

    /// True if a completed undo put a file back at `path` at or after `since`.
    ///
    /// Reads the log from disk, so an undo run by another process counts.
    pub fn restored_since(&self, path: &Path, since: DateTime<Utc>) -> AuditResult<bool> {
        let target = path.to_string_lossy();
        let entries = self.session()?.entries;
        Ok(entries.iter().rev().any(|e| {
            e.action_type == ActionType::Undo
                && e.status == EntryStatus::Completed
                && e.destination.as_deref() == Some(target.as_ref())
                && e.completed_timestamp_utc.unwrap_or(e.timestamp_utc) >= since
        }))
    }

    /// Perceptual hashes of completed moves, newest first.
    pub fn recent_image_hashes(&self, limit: usize) -> AuditResult<Vec<String>> {
        let entries = self.session()?.entries;
        Ok(entries
            .iter()
            .rev()
            .filter(|e| e.action_type == ActionType::Move && e.status == EntryStatus::Completed)
            .filter_map(|e| e.perceptual_hash.clone())
            .filter(|h| !h.is_empty())
            .take(limit)
            .collect())
    }

    pub fn compute_insights(&self) -> AuditResult<Insights> {
        self.compute_insights_at(Utc::now())
    }

    /// Insights with "today" measured from the UTC midnight before `now`.
    pub fn compute_insights_at(&self, now: DateTime<Utc>) -> AuditResult<Insights> {
        let entries = self.session()?.entries;
        let start_of_day = now.date_naive().and_time(NaiveTime::MIN).and_utc();

        let mut moved_total = 0usize;
        let mut moved_today = 0usize;
        let mut skipped_total = 0usize;
        let mut errors_total = 0usize;
        let mut extensions: HashMap<String, usize> = HashMap::new();

        for entry in &entries {
            match (entry.action_type, entry.status) {
                (ActionType::Error, _) => errors_total += 1,
                (ActionType::Skip, _) => skipped_total += 1,
                (ActionType::Move, EntryStatus::Completed) => {
                    moved_total += 1;
                    if entry.timestamp_utc >= start_of_day {
                        moved_today += 1;
                    }
                    let extension = entry
                        .destination
                        .as_deref()
                        .and_then(|d| Path::new(d).extension())
                        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()));
                    if let Some(ext) = extension {
                        *extensions.entry(ext).or_insert(0) += 1;
                    }
                }
                _ => {}
            }
        }

        let mut distribution: Vec<ExtensionCount> = extensions
            .into_iter()
            .map(|(extension, count)| ExtensionCount { extension, count })
            .collect();
        distribution.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.extension.cmp(&b.extension)));
        distribution.truncate(TOP_EXTENSIONS);

        let total_events = moved_total + skipped_total;
        let clutter_reduction = if total_events == 0 {
            0.0
        } else {
            moved_total as f64 / total_events as f64 * 100.0
        };

        Ok(Insights {
            files_organized: FilesOrganized {
                daily: moved_today,
                total: moved_total,
            },
            estimated_time_saved_seconds: moved_total as u64 * SECONDS_SAVED_PER_MOVE,
            file_type_distribution: distribution,
            downloads_clutter_reduction_percent: (clutter_reduction * 100.0).round() / 100.0,
            errors_logged: errors_total,
            skipped_total,
        })
    }

    /// Takes the lock and loads the current entries.
    pub(crate) fn session(&self) -> AuditResult<LogSession<'_>> {
        // The guarded value is `()`, so a poisoned lock carries no bad state.
        let guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let entries = self.read_entries_locked()?;
        Ok(LogSession {
            log: self,
            _guard: guard,
            entries,
        })
    }

    fn read_entries_locked(&self) -> AuditResult<Vec<AuditEntry>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(AuditError::Read {
                    path: self.path.clone(),
                    source: e,
                });
            }
        };

        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }

        match serde_json::from_str(&raw) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                self.quarantine_corrupt(&e)?;
                Ok(Vec::new())
            }
        }
    }

    /// Moves an unreadable log aside so it is never overwritten.
    fn quarantine_corrupt(&self, cause: &serde_json::Error) -> AuditResult<()> {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "activity_log.json".to_string());
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let aside = self.path.with_file_name(format!("{file_name}.corrupt-{stamp}"));

        error!(
            path = %self.path.display(),
            preserved_as = %aside.display(),
            error = %cause,
            "activity log is unreadable; starting a new one"
        );
        fs::rename(&self.path, &aside).map_err(|e| AuditError::Write {
            path: aside,
            source: e,
        })
    }

    fn write_entries_locked(&self, entries: &[AuditEntry]) -> AuditResult<()> {
        let payload = serde_json::to_vec_pretty(entries)?;
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "activity_log.json".to_string());
        let tmp_path = self
            .path
            .with_file_name(format!("{file_name}.{}.tmp", std::process::id()));

        let result = File::create(&tmp_path)
            .and_then(|mut file| {
                file.write_all(&payload)?;
                file.sync_all()
            })
            .and_then(|()| fs::rename(&tmp_path, &self.path));

        result.map_err(|e| {
            if let Err(cleanup) = fs::remove_file(&tmp_path)
                && cleanup.kind() != io::ErrorKind::NotFound
            {
                warn!(path = %tmp_path.display(), error = %cleanup, "could not remove temporary log file");
            }
            AuditError::Write {
                path: self.path.clone(),
                source: e,
            }
        })
    }
}

/// Exclusive access to the log for a sequence of dependent updates.
///
/// Each mutation is persisted before the method returns.
pub(crate) struct LogSession<'a> {
    log: &'a AuditLog,
    _guard: MutexGuard<'a, ()>,
    pub(crate) entries: Vec<AuditEntry>,
}

impl LogSession<'_> {
    pub(crate) fn append(&mut self, entry: AuditEntry) -> AuditResult<String> {
        let id = entry.id.clone();
        self.entries.push(entry);
        if let Err(e) = self.log.write_entries_locked(&self.entries) {
            self.entries.pop();
            return Err(e);
        }
        Ok(id)
    }

    /// Moves a `planned` entry to its final status.
    pub(crate) fn transition(&mut self, id: &str, status: EntryStatus, error: Option<&str>) -> AuditResult<()> {
        let entry = self
            .entries
            .iter_mut()
            .rev()
            .find(|e| e.id == id)
            .ok_or_else(|| AuditError::EntryNotFound(id.to_string()))?;

        if entry.status != EntryStatus::Planned {
            return Err(AuditError::InvalidTransition {
                id: id.to_string(),
                status: entry.status,
            });
        }

        entry.status = status;
        entry.completed_timestamp_utc = Some(Utc::now());
        if let Some(message) = error {
            entry.error = Some(truncate_chars(message, MAX_FAILURE_MESSAGE));
        }
        self.log.write_entries_locked(&self.entries)
    }

    /// Flags a completed move as reversed by `undo_id`.
    pub(crate) fn mark_undone(&mut self, original_id: &str, undo_id: &str) -> AuditResult<()> {
        let entry = self
            .entries
            .iter_mut()
            .rev()
            .find(|e| e.id == original_id)
            .ok_or_else(|| AuditError::EntryNotFound(original_id.to_string()))?;

        if !entry.is_undoable_move() {
            return Err(AuditError::NotUndoable(original_id.to_string()));
        }

        entry.undone = true;
        entry.undo_action_id = Some(undo_id.to_string());
        self.log.write_entries_locked(&self.entries)
    }
}

/// Cuts `text` to at most `max` characters.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Start of the undo window relative to `now`.
pub(crate) fn undo_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::hours(24)
}
