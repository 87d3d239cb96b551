//! Reversal of recent moves.
//!
//! Each call reverses at most one move: the newest completed move from the
//! last 24 hours that has not been undone yet. The restore never overwrites;
//! if something now occupies the original path, the file comes back under a
//! numbered sibling name instead.

use crate::audit::{ActionType, AuditEntry, AuditLog, AuditResult, EntryStatus, undo_cutoff};
use crate::mover::safe_move;
use crate::paths::{exists_no_follow, non_overwriting_path, resolve_path, validate_destination};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Why an undo step did not restore anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UndoFailure {
    /// The moved file is no longer where it was put.
    DestinationMissing,
    /// Source or destination falls outside the allow-list.
    PathValidationFailed,
    /// The reverse move itself failed.
    MoveFailed,
}

impl UndoFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            UndoFailure::DestinationMissing => "destination_missing",
            UndoFailure::PathValidationFailed => "path_validation_failed",
            UndoFailure::MoveFailed => "move_failed",
        }
    }
}

/// Result of one undo step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UndoOutcome {
    Restored {
        undo_id: String,
        original_id: String,
        restored_to: PathBuf,
    },
    NothingToUndo,
    /// The original entry is left undoable so a later retry can succeed.
    Failed {
        undo_id: String,
        original_id: String,
        reason: UndoFailure,
        message: String,
    },
}

impl UndoOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UndoOutcome::Restored { .. })
    }

    pub fn message(&self) -> String {
        match self {
            UndoOutcome::Restored { restored_to, .. } => {
                format!("Undo completed; restored to {}.", restored_to.display())
            }
            UndoOutcome::NothingToUndo => "No undoable actions in the last 24 hours.".to_string(),
            UndoOutcome::Failed { message, .. } => message.clone(),
        }
    }
}

impl AuditLog {
    /// Reverses the newest eligible move from the last 24 hours.
    ///
    /// `allowed_roots` bounds both the file being moved back and the place it
    /// is moved to. The whole step runs under the log lock.
    ///
    /// # Errors
    ///
    /// Only log I/O errors are returned; filesystem problems with the files
    /// themselves are reported as [`UndoOutcome::Failed`] and recorded.
    pub fn undo_last_24h(&self, allowed_roots: &[PathBuf]) -> AuditResult<UndoOutcome> {
        self.undo_last_24h_at(allowed_roots, Utc::now())
    }

    pub fn undo_last_24h_at(&self, allowed_roots: &[PathBuf], now: DateTime<Utc>) -> AuditResult<UndoOutcome> {
        let mut session = self.session()?;
        let cutoff = undo_cutoff(now);

        // Linear scan from the newest entry; fine for a personal log.
        let target = session
            .entries
            .iter()
            .rev()
            .find(|e| e.is_undoable_move() && e.timestamp_utc >= cutoff)
            .and_then(|e| {
                e.paths()
                    .map(|(src, dest)| (e.id.clone(), PathBuf::from(src), PathBuf::from(dest)))
            });

        let Some((original_id, source, destination)) = target else {
            return Ok(UndoOutcome::NothingToUndo);
        };

        let source = resolve_path(&source);
        let destination = resolve_path(&destination);

        let precheck = if !exists_no_follow(&destination) {
            Some((UndoFailure::DestinationMissing, "Destination file no longer exists."))
        } else if !validate_destination(&source, allowed_roots)
            || !validate_destination(&destination, allowed_roots)
        {
            Some((UndoFailure::PathValidationFailed, "Path validation failed."))
        } else {
            None
        };

        if let Some((reason, message)) = precheck {
            let mut entry = undo_entry(&original_id, &destination, &source);
            entry.status_note = Some(reason.as_str().to_string());
            let undo_id = session.append(entry)?;
            session.transition(&undo_id, EntryStatus::Failed, Some(message))?;
            warn!(original_id = %original_id, reason = reason.as_str(), "undo blocked");
            return Ok(UndoOutcome::Failed {
                undo_id,
                original_id,
                reason,
                message: message.to_string(),
            });
        }

        let restore_target = non_overwriting_path(&source);
        let undo_id = session.append(undo_entry(&original_id, &destination, &restore_target))?;

        if let Err(e) = safe_move(&destination, &restore_target) {
            let message = e.to_string();
            session.transition(&undo_id, EntryStatus::Failed, Some(&message))?;
            warn!(original_id = %original_id, error = %message, "undo move failed");
            return Ok(UndoOutcome::Failed {
                undo_id,
                original_id,
                reason: UndoFailure::MoveFailed,
                message: format!("Undo failed: {message}"),
            });
        }

        session.transition(&undo_id, EntryStatus::Completed, None)?;
        session.mark_undone(&original_id, &undo_id)?;
        info!(
            original_id = %original_id,
            restored_to = %restore_target.display(),
            "undo completed"
        );

        Ok(UndoOutcome::Restored {
            undo_id,
            original_id,
            restored_to: restore_target,
        })
    }
}

fn undo_entry(original_id: &str, from: &Path, to: &Path) -> AuditEntry {
    let mut entry = AuditEntry::new(ActionType::Undo)
        .with_source(from)
        .with_destination(to);
    entry.original_action_id = Some(original_id.to_string());
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::fs;
    use tempfile::TempDir;

    struct Setup {
        _temp_dir: TempDir,
        root: PathBuf,
        log: AuditLog,
    }

    fn setup() -> Setup {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = resolve_path(temp_dir.path());
        let log = AuditLog::open(&root.join("activity_log.json")).expect("Failed to open log");
        Setup {
            _temp_dir: temp_dir,
            root,
            log,
        }
    }

    /// Moves `name` from the root into `Sorted/` and records it as completed.
    fn record_move(setup: &Setup, name: &str, at: DateTime<Utc>) -> (PathBuf, PathBuf, String) {
        let src = setup.root.join(name);
        let dest = setup.root.join("Sorted").join(name);
        fs::write(&src, name).expect("Failed to write source");
        safe_move(&src, &dest).expect("Failed to move");

        let mut entry = AuditEntry::new(ActionType::Move)
            .with_source(&src)
            .with_destination(&dest);
        entry.timestamp_utc = at;
        entry.status = EntryStatus::Completed;
        let id = setup
            .log
            .session()
            .and_then(|mut s| s.append(entry))
            .expect("Failed to append");
        (src, dest, id)
    }

    fn find(log: &AuditLog, id: &str) -> AuditEntry {
        log.list(0)
            .expect("list failed")
            .into_iter()
            .find(|e| e.id == id)
            .expect("entry missing")
    }

    #[test]
    fn test_failed_reverse_move_is_recorded_and_retryable() {
        let setup = setup();
        fs::create_dir(setup.root.join("inbox")).expect("Failed to create dir");
        let (src, dest, id) = record_move(&setup, "inbox/form.pdf", Utc::now());

        // The original folder is now a plain file, so nothing can be restored into it.
        fs::remove_dir(setup.root.join("inbox")).expect("Failed to remove dir");
        fs::write(setup.root.join("inbox"), "blocker").expect("Failed to write blocker");

        let outcome = setup.log.undo_last_24h(&[setup.root.clone()]).expect("undo failed");
        let UndoOutcome::Failed {
            undo_id,
            original_id,
            reason,
            message,
        } = outcome
        else {
            panic!("expected a failure, got {outcome:?}");
        };
        assert_eq!(reason, UndoFailure::MoveFailed);
        assert_eq!(original_id, id);
        assert!(message.starts_with("Undo failed:"));
        assert!(dest.exists());
        assert!(!src.exists());

        let undo = find(&setup.log, &undo_id);
        assert_eq!(undo.status, EntryStatus::Failed);
        assert!(undo.error.is_some());
        assert!(!find(&setup.log, &id).undone);

        fs::remove_file(setup.root.join("inbox")).expect("Failed to remove blocker");
        let retry = setup.log.undo_last_24h(&[setup.root.clone()]).expect("undo failed");
        assert!(retry.is_success());
        assert!(src.exists());
    }

    #[test]
    fn test_undo_empty_log() {
        let setup = setup();
        let outcome = setup.log.undo_last_24h(&[setup.root.clone()]).expect("undo failed");
        assert_eq!(outcome, UndoOutcome::NothingToUndo);
        assert!(!outcome.is_success());
    }

    #[test]
    fn test_undo_restores_and_flags_once() {
        let setup = setup();
        let (src, dest, id) = record_move(&setup, "notes.pdf", Utc::now());

        let outcome = setup.log.undo_last_24h(&[setup.root.clone()]).expect("undo failed");
        let UndoOutcome::Restored {
            undo_id,
            restored_to,
            ..
        } = outcome
        else {
            panic!("expected a restore, got {outcome:?}");
        };
        assert_eq!(restored_to, src);
        assert!(src.exists());
        assert!(!dest.exists());

        let original = find(&setup.log, &id);
        assert!(original.undone);
        assert_eq!(original.undo_action_id.as_deref(), Some(undo_id.as_str()));

        let undo = find(&setup.log, &undo_id);
        assert_eq!(undo.action_type, ActionType::Undo);
        assert_eq!(undo.status, EntryStatus::Completed);
        assert_eq!(undo.original_action_id.as_deref(), Some(id.as_str()));

        let again = setup.log.undo_last_24h(&[setup.root.clone()]).expect("undo failed");
        assert_eq!(again, UndoOutcome::NothingToUndo);
    }

    #[test]
    fn test_undo_walks_backwards() {
        let setup = setup();
        let (first_src, _, first_id) = record_move(&setup, "a.txt", Utc::now() - Duration::minutes(5));
        let (second_src, _, second_id) = record_move(&setup, "b.txt", Utc::now());
        let roots = [setup.root.clone()];

        setup.log.undo_last_24h(&roots).expect("undo failed");
        assert!(second_src.exists());
        assert!(!first_src.exists());
        assert!(find(&setup.log, &second_id).undone);
        assert!(!find(&setup.log, &first_id).undone);

        setup.log.undo_last_24h(&roots).expect("undo failed");
        assert!(first_src.exists());
        assert!(find(&setup.log, &first_id).undone);
    }

    #[test]
    fn test_undo_ignores_moves_older_than_a_day() {
        let setup = setup();
        let (src, dest, id) = record_move(&setup, "old.txt", Utc::now() - Duration::hours(25));

        let outcome = setup.log.undo_last_24h(&[setup.root.clone()]).expect("undo failed");
        assert_eq!(outcome, UndoOutcome::NothingToUndo);
        assert!(dest.exists());
        assert!(!src.exists());
        assert!(!find(&setup.log, &id).undone);
    }

    #[test]
    fn test_undo_into_occupied_path_uses_numbered_name() {
        let setup = setup();
        let (src, _, _) = record_move(&setup, "report.pdf", Utc::now());
        fs::write(&src, "a new file with the same name").expect("Failed to write");

        let outcome = setup.log.undo_last_24h(&[setup.root.clone()]).expect("undo failed");
        let UndoOutcome::Restored { restored_to, .. } = outcome else {
            panic!("expected a restore");
        };

        assert_eq!(restored_to, setup.root.join("report (1).pdf"));
        assert_eq!(
            fs::read_to_string(&src).expect("Failed to read"),
            "a new file with the same name"
        );
        assert_eq!(fs::read_to_string(&restored_to).expect("Failed to read"), "report.pdf");
    }

    #[test]
    fn test_undo_missing_destination_is_recorded_and_retryable() {
        let setup = setup();
        let (_, dest, id) = record_move(&setup, "gone.txt", Utc::now());
        fs::rename(&dest, setup.root.join("elsewhere.txt")).expect("Failed to rename");

        let outcome = setup.log.undo_last_24h(&[setup.root.clone()]).expect("undo failed");
        let UndoOutcome::Failed { undo_id, reason, .. } = outcome else {
            panic!("expected a failure");
        };
        assert_eq!(reason, UndoFailure::DestinationMissing);
        assert!(!find(&setup.log, &id).undone);
        let undo = find(&setup.log, &undo_id);
        assert_eq!(undo.status, EntryStatus::Failed);
        assert_eq!(undo.status_note.as_deref(), Some("destination_missing"));

        // Put the file back and retry.
        fs::rename(setup.root.join("elsewhere.txt"), &dest).expect("Failed to rename");
        let retry = setup.log.undo_last_24h(&[setup.root.clone()]).expect("undo failed");
        assert!(retry.is_success());
        assert!(find(&setup.log, &id).undone);
    }

    #[test]
    fn test_undo_outside_allow_list_is_blocked() {
        let setup = setup();
        let (src, dest, id) = record_move(&setup, "secret.txt", Utc::now());
        let other = TempDir::new().expect("Failed to create temp directory");

        let outcome = setup
            .log
            .undo_last_24h(&[other.path().to_path_buf()])
            .expect("undo failed");
        assert!(matches!(
            outcome,
            UndoOutcome::Failed {
                reason: UndoFailure::PathValidationFailed,
                ..
            }
        ));
        assert!(dest.exists());
        assert!(!src.exists());
        assert!(!find(&setup.log, &id).undone);
    }

    #[test]
    fn test_undo_skips_failed_and_planned_moves() {
        let setup = setup();
        for status in [EntryStatus::Failed, EntryStatus::Planned] {
            let mut entry = AuditEntry::new(ActionType::Move)
                .with_source(&setup.root.join("x"))
                .with_destination(&setup.root.join("y"));
            entry.status = status;
            setup
                .log
                .session()
                .and_then(|mut s| s.append(entry))
                .expect("Failed to append");
        }

        let outcome = setup.log.undo_last_24h(&[setup.root.clone()]).expect("undo failed");
        assert_eq!(outcome, UndoOutcome::NothingToUndo);
    }
}
