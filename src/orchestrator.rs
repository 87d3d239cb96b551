//! The organizer: classify, consult collaborators, validate, log, move.
//!
//! Every filesystem mutation is preceded by a `planned` log entry and
//! followed by exactly one `completed` or `failed` transition. Validation
//! problems become `skip` entries; collaborator problems become `error`
//! entries and are otherwise ignored.

use crate::audit::{
    ActionType, AuditEntry, AuditLog, AuditResult, DuplicateRecord, Insights, RenameRecord,
    truncate_chars, MAX_FAILURE_MESSAGE,
};
use crate::classifier::{ClassificationDecision, Classifier, FALLBACK_CATEGORY};
use crate::collaborators::{DuplicateDetector, RenameSuggester};
use crate::config::{ConfigError, DuplicateSettings, RenameSettings, RuleSet};
use crate::mover::safe_move;
use crate::paths::{ensure_directory, home_dir, non_overwriting_path, resolve_path, sanitize_filename, validate_destination};
use crate::rename::HeuristicRenamer;
use crate::undo::UndoOutcome;
use crate::watcher::{FileEvent, FileWatcher, StableFileHandler, WatcherError, WatcherSettings};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};

/// Bound on `prior_hashes` handed to the duplicate detector.
pub const RECENT_HASH_LIMIT: usize = 2500;
pub const DEFAULT_LOG_LIMIT: usize = 200;
pub const MAX_LOG_LIMIT: usize = 2000;
/// How long the watcher leaves a file alone after undo puts it back.
pub const RESTORE_GRACE_SECONDS: i64 = 300;

/// Result of one `organize_file` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OrganizeOutcome {
    Moved {
        action_id: String,
        destination: PathBuf,
    },
    /// Nothing was attempted; a `skip` entry records why.
    Skipped { action_id: String, reason: String },
    /// A move was planned but did not happen; the file is where it was.
    Failed { action_id: String, error: String },
}

impl OrganizeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, OrganizeOutcome::Moved { .. })
    }

    pub fn action_id(&self) -> &str {
        match self {
            OrganizeOutcome::Moved { action_id, .. }
            | OrganizeOutcome::Skipped { action_id, .. }
            | OrganizeOutcome::Failed { action_id, .. } => action_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
    pub downloads_dir: PathBuf,
    pub rules_path: PathBuf,
    pub rules_version: u32,
    pub log_path: PathBuf,
    pub last_event_timestamp_utc: Option<DateTime<Utc>>,
    pub watcher_running: bool,
}

struct ActiveRules {
    rules: RuleSet,
    classifier: Classifier,
}

impl ActiveRules {
    fn new(rules: RuleSet) -> Self {
        let classifier = Classifier::new(&rules);
        Self { rules, classifier }
    }
}

/// What a single file needs from the rule set, copied out of the lock.
struct FilePlan {
    decision: ClassificationDecision,
    base_destination: PathBuf,
    rename: RenameSettings,
    duplicates: DuplicateSettings,
}

pub struct Organizer {
    downloads_dir: PathBuf,
    rules_path: PathBuf,
    home_dir: Option<PathBuf>,
    active: RwLock<ActiveRules>,
    log: AuditLog,
    duplicate_detector: Option<Arc<dyn DuplicateDetector>>,
    rename_suggester: Arc<dyn RenameSuggester>,
    last_event: RwLock<Option<DateTime<Utc>>>,
    watcher_running: AtomicBool,
}

impl Organizer {
    /// Opens the log and loads the rules at `rules_path`.
    ///
    /// An unreadable rule document is recorded as an `error` entry and
    /// replaced by the minimal default.
    pub fn new(downloads_dir: &Path, rules_path: &Path, log_path: &Path) -> AuditResult<Self> {
        let organizer = Self {
            downloads_dir: resolve_path(downloads_dir),
            rules_path: resolve_path(rules_path),
            home_dir: home_dir().map(|h| resolve_path(&h)),
            active: RwLock::new(ActiveRules::new(RuleSet::default())),
            log: AuditLog::open(&resolve_path(log_path))?,
            duplicate_detector: None,
            rename_suggester: Arc::new(HeuristicRenamer::new()),
            last_event: RwLock::new(None),
            watcher_running: AtomicBool::new(false),
        };
        // Failure is already recorded in the log.
        let _ = organizer.reload_rules();
        Ok(organizer)
    }

    /// Replaces the home directory used as the second allow-list root.
    pub fn with_home_dir(mut self, home: &Path) -> Self {
        self.home_dir = Some(resolve_path(home));
        self
    }

    pub fn with_duplicate_detector(mut self, detector: Arc<dyn DuplicateDetector>) -> Self {
        self.duplicate_detector = Some(detector);
        self
    }

    pub fn with_rename_suggester(mut self, suggester: Arc<dyn RenameSuggester>) -> Self {
        self.rename_suggester = suggester;
        self
    }

    pub fn downloads_dir(&self) -> &Path {
        &self.downloads_dir
    }

    pub fn log(&self) -> &AuditLog {
        &self.log
    }

    pub fn rules(&self) -> RuleSet {
        self.active.read().unwrap_or_else(|e| e.into_inner()).rules.clone()
    }

    /// Re-reads the rule document and swaps in a fresh classifier.
    ///
    /// A missing document means the default rules. A malformed one also
    /// means the default rules; the error is logged and returned.
    pub fn reload_rules(&self) -> Result<(), ConfigError> {
        let (rules, problem) = RuleSet::load_or_default(&self.rules_path);
        let version = rules.version;
        *self.active.write().unwrap_or_else(|e| e.into_inner()) = ActiveRules::new(rules);

        match problem {
            None => {
                info!(rules_path = %self.rules_path.display(), version, "rules loaded");
                Ok(())
            }
            Some(e) => {
                warn!(rules_path = %self.rules_path.display(), error = %e, "rules unreadable; using defaults");
                self.record_error("reload_rules", &e.to_string(), Some(json!({ "path": self.rules_path })));
                Err(e)
            }
        }
    }

    /// Watched directory first, then the home directory.
    pub fn allowed_roots(&self) -> Vec<PathBuf> {
        let mut roots = vec![self.downloads_dir.clone()];
        if let Some(home) = &self.home_dir
            && !roots.contains(home)
        {
            roots.push(home.clone());
        }
        roots
    }

    /// Classifies and moves one file.
    ///
    /// # Errors
    ///
    /// Only activity-log failures are returned. When the log cannot record
    /// the plan, nothing is moved.
    pub fn organize_file(&self, path: &Path) -> AuditResult<OrganizeOutcome> {
        let path = resolve_path(path);

        if !path.exists() {
            return self.skip(&path, None, "missing");
        }
        if path.is_dir() {
            return self.skip(&path, None, "directory");
        }

        let plan = self.plan_for(&path);
        let roots = self.allowed_roots();

        if !validate_destination(&plan.base_destination, &roots) {
            warn!(
                base_destination = %plan.base_destination.display(),
                "base destination outside allowed roots"
            );
            return self.skip(&path, Some(plan.base_destination.as_path()), "base_destination_not_allowed");
        }

        let mut destination_relative = plan.decision.destination.clone();
        let mut duplicate = DuplicateRecord::default();
        let mut perceptual_hash = None;

        if plan.duplicates.enabled {
            match &self.duplicate_detector {
                Some(detector) => {
                    let verdict = self
                        .log
                        .recent_image_hashes(RECENT_HASH_LIMIT)
                        .map_err(|e| e.to_string())
                        .and_then(|prior| {
                            detector
                                .analyze(&path, &prior, plan.duplicates.max_hamming_distance)
                                .map_err(|e| e.to_string())
                        });
                    match verdict {
                        Ok(verdict) => {
                            perceptual_hash = verdict.perceptual_hash;
                            duplicate = DuplicateRecord {
                                is_duplicate: verdict.is_duplicate,
                                duplicate_of_hash: verdict.matched_hash,
                                hamming_distance: verdict.distance,
                            };
                            if verdict.is_image && verdict.is_duplicate {
                                destination_relative = plan.duplicates.duplicates_destination.clone();
                            }
                        }
                        Err(message) => self.record_error(
                            "duplicate_detection",
                            &message,
                            Some(json!({ "path": path })),
                        ),
                    }
                }
                None => debug!("duplicate detection enabled but no detector configured"),
            }
        }

        let mut file_name = sanitize_filename(
            &path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );
        let mut rename = RenameRecord::default();

        if plan.rename.enabled {
            match self.rename_suggester.suggest(&path, &plan.decision.category_name) {
                Ok(Some(suggestion)) if suggestion.confidence >= plan.rename.confidence_threshold => {
                    file_name = sanitize_filename(&suggestion.suggested_name);
                    rename = RenameRecord {
                        applied: true,
                        confidence: Some(suggestion.confidence),
                        reasons: suggestion.reasons,
                    };
                }
                Ok(_) => {}
                Err(e) => self.record_error("rename_suggestion", &e.to_string(), Some(json!({ "path": path }))),
            }
        }

        let destination_dir = resolve_path(&plan.base_destination.join(&destination_relative));
        if !validate_destination(&destination_dir, &roots) {
            return self.skip(&path, Some(destination_dir.as_path()), "destination_not_allowed");
        }
        if let Err(e) = ensure_directory(&destination_dir) {
            warn!(dir = %destination_dir.display(), error = %e, "could not create destination directory");
            return self.skip(&path, Some(destination_dir.as_path()), "mkdir_failed");
        }
        let destination = non_overwriting_path(&destination_dir.join(&file_name));

        let mut entry = AuditEntry::new(ActionType::Move)
            .with_source(&path)
            .with_destination(&destination);
        entry.decision = Some(plan.decision);
        entry.rename = Some(rename);
        entry.duplicate = Some(duplicate);
        entry.perceptual_hash = perceptual_hash;
        let action_id = self.log.append_planned(entry)?;

        if !path.exists() {
            return self.fail(action_id, "Source file disappeared before move.");
        }
        if !validate_destination(&destination, &roots) {
            return self.fail(action_id, "Destination path validation failed.");
        }

        if let Err(e) = safe_move(&path, &destination) {
            warn!(source = %path.display(), destination = %destination.display(), error = %e, "move failed");
            return self.fail(action_id, &e.to_string());
        }

        self.log.mark_completed(&action_id)?;
        info!(source = %path.display(), destination = %destination.display(), "file organized");
        Ok(OrganizeOutcome::Moved {
            action_id,
            destination,
        })
    }

    /// Entry point for the watcher; never propagates a failure.
    ///
    /// A file that undo restored within the grace window is skipped with
    /// reason `recently_restored` instead of being filed again.
    pub fn handle_stable_file(&self, path: &Path, event: &FileEvent) {
        *self.last_event.write().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());

        let mut entry = AuditEntry::new(ActionType::Event).with_source(path);
        entry.event_type = Some(event.event_type.to_string());
        if let Some(dest) = &event.dest_path {
            entry = entry.with_destination(dest);
        }
        if let Err(e) = self.log.append_completed(entry) {
            warn!(path = %path.display(), error = %e, "could not record event");
        }

        let resolved = resolve_path(path);
        let since = Utc::now() - chrono::Duration::seconds(RESTORE_GRACE_SECONDS);
        let result = match self.log.restored_since(&resolved, since) {
            Ok(true) => self.skip(&resolved, None, "recently_restored"),
            Ok(false) => self.organize_file(&resolved),
            Err(e) => Err(e),
        };

        match result {
            Ok(outcome) => debug!(
                path = %path.display(),
                action_id = outcome.action_id(),
                moved = outcome.is_success(),
                "stable file handled"
            ),
            Err(e) => {
                error!(path = %path.display(), error = %e, "organize failed");
                self.record_error("organize_file", &e.to_string(), Some(json!({ "path": path })));
            }
        }
    }

    pub fn status(&self) -> Status {
        Status {
            downloads_dir: self.downloads_dir.clone(),
            rules_path: self.rules_path.clone(),
            rules_version: self.active.read().unwrap_or_else(|e| e.into_inner()).rules.version,
            log_path: self.log.path().to_path_buf(),
            last_event_timestamp_utc: *self.last_event.read().unwrap_or_else(|e| e.into_inner()),
            watcher_running: self.watcher_running.load(Ordering::SeqCst),
        }
    }

    pub fn insights(&self) -> AuditResult<Insights> {
        self.log.compute_insights()
    }

    /// Most recent entries, `limit` clamped to `1..=2000`.
    pub fn logs(&self, limit: usize) -> AuditResult<Vec<AuditEntry>> {
        self.log.list(limit.clamp(1, MAX_LOG_LIMIT))
    }

    pub fn undo(&self) -> AuditResult<UndoOutcome> {
        let result = self.log.undo_last_24h(&self.allowed_roots());
        if let Err(e) = &result {
            self.record_error("undo", &e.to_string(), None);
        }
        result
    }

    /// A watcher for the downloads directory, configured from the rules but
    /// not yet started.
    pub fn watcher(self: &Arc<Self>, settings: Option<WatcherSettings>) -> FileWatcher {
        let rules = self.rules();
        let (filter, problems) = rules.watcher.ignore.compile();
        for problem in problems {
            warn!(error = %problem, "ignoring invalid watch pattern");
        }
        FileWatcher::new(
            &self.downloads_dir,
            Arc::clone(self) as Arc<dyn StableFileHandler>,
            settings.unwrap_or_else(|| WatcherSettings::from(&rules.watcher)),
            filter,
        )
    }

    /// Starts watching the downloads directory until the handle is stopped.
    pub fn watch(self: &Arc<Self>) -> Result<WatchHandle, WatcherError> {
        let watcher = self.watcher(None);
        watcher.start()?;
        self.watcher_running.store(true, Ordering::SeqCst);
        Ok(WatchHandle {
            watcher,
            organizer: Arc::clone(self),
        })
    }

    fn plan_for(&self, path: &Path) -> FilePlan {
        let active = self.active.read().unwrap_or_else(|e| e.into_inner());
        let decision = panic::catch_unwind(AssertUnwindSafe(|| active.classifier.decide(path)))
            .unwrap_or_else(|_| {
                self.record_error("rule_decision", "classifier panicked", Some(json!({ "path": path })));
                ClassificationDecision {
                    category_name: FALLBACK_CATEGORY.to_string(),
                    destination: "Misc".to_string(),
                    confidence: 0.0,
                    reasons: vec!["error".to_string()],
                }
            });

        FilePlan {
            decision,
            base_destination: active.rules.base_destination_path(),
            rename: active.rules.rename.clone(),
            duplicates: active.rules.duplicate_detection.clone(),
        }
    }

    fn skip(&self, path: &Path, destination: Option<&Path>, reason: &str) -> AuditResult<OrganizeOutcome> {
        let mut entry = AuditEntry::new(ActionType::Skip)
            .with_source(path)
            .with_reason(reason);
        if let Some(dest) = destination {
            entry = entry.with_destination(dest);
        }
        let action_id = self.log.append_completed(entry)?;
        debug!(path = %path.display(), reason, "skipped");
        Ok(OrganizeOutcome::Skipped {
            action_id,
            reason: reason.to_string(),
        })
    }

    fn fail(&self, action_id: String, error: &str) -> AuditResult<OrganizeOutcome> {
        self.log.mark_failed(&action_id, error)?;
        Ok(OrganizeOutcome::Failed {
            action_id,
            error: truncate_chars(error, MAX_FAILURE_MESSAGE),
        })
    }

    /// Best effort; a log that cannot take the error only gets a trace line.
    fn record_error(&self, context: &str, message: &str, extra: Option<serde_json::Value>) {
        if let Err(e) = self.log.log_error(context, message, extra) {
            error!(context, message, error = %e, "could not record error entry");
        }
    }
}

impl StableFileHandler for Organizer {
    fn on_stable_file(&self, path: &Path, event: &FileEvent) {
        self.handle_stable_file(path, event);
    }
}

/// A running watch; stops the watcher when dropped.
pub struct WatchHandle {
    watcher: FileWatcher,
    organizer: Arc<Organizer>,
}

impl WatchHandle {
    pub fn watcher(&self) -> &FileWatcher {
        &self.watcher
    }

    pub fn stop(&self) -> bool {
        let stopped = self.watcher.stop();
        self.organizer.watcher_running.store(false, Ordering::SeqCst);
        stopped
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::EntryStatus;
    use crate::collaborators::{CollaboratorError, DuplicateVerdict, RenameSuggestion};
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct Setup {
        _temp_dir: TempDir,
        downloads: PathBuf,
        sorted: PathBuf,
        rules_path: PathBuf,
        log_path: PathBuf,
    }

    fn setup(extra_rules: &str) -> Setup {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = resolve_path(temp_dir.path());
        let downloads = root.join("Downloads");
        let sorted = downloads.join("Sorted");
        fs::create_dir_all(&downloads).expect("Failed to create downloads");

        let rules_path = root.join("rules.toml");
        let document = format!(
            "base_destination = {:?}\n{extra_rules}\n\n[[categories]]\nname = \"Images\"\ndestination = \"Images\"\nextensions = [\".png\"]\n",
            sorted.to_string_lossy()
        );
        fs::write(&rules_path, document).expect("Failed to write rules");

        Setup {
            log_path: root.join("log").join("activity_log.json"),
            _temp_dir: temp_dir,
            downloads,
            sorted,
            rules_path,
        }
    }

    fn organizer(setup: &Setup) -> Organizer {
        Organizer::new(&setup.downloads, &setup.rules_path, &setup.log_path)
            .expect("Failed to create organizer")
            .with_home_dir(&setup.downloads)
    }

    struct FixedVerdict(DuplicateVerdict, Mutex<Vec<usize>>);

    impl DuplicateDetector for FixedVerdict {
        fn analyze(&self, _file: &Path, prior: &[String], _max: u32) -> Result<DuplicateVerdict, CollaboratorError> {
            self.1.lock().expect("poisoned").push(prior.len());
            Ok(self.0.clone())
        }
    }

    struct Broken;

    impl DuplicateDetector for Broken {
        fn analyze(&self, _: &Path, _: &[String], _: u32) -> Result<DuplicateVerdict, CollaboratorError> {
            Err(CollaboratorError::Duplicate("decoder crashed".to_string()))
        }
    }

    impl RenameSuggester for Broken {
        fn suggest(&self, _: &Path, _: &str) -> Result<Option<RenameSuggestion>, CollaboratorError> {
            Err(CollaboratorError::Rename("model offline".to_string()))
        }
    }

    struct Suggest(&'static str, f64);

    impl RenameSuggester for Suggest {
        fn suggest(&self, _: &Path, _: &str) -> Result<Option<RenameSuggestion>, CollaboratorError> {
            Ok(Some(RenameSuggestion {
                suggested_name: self.0.to_string(),
                confidence: self.1,
                reasons: vec!["test".to_string()],
            }))
        }
    }

    #[test]
    fn test_missing_and_directory_are_skipped() {
        let setup = setup("");
        let organizer = organizer(&setup);
        fs::create_dir(setup.downloads.join("folder")).expect("Failed to create dir");

        let missing = organizer.organize_file(&setup.downloads.join("nope.txt")).expect("organize failed");
        assert!(matches!(missing, OrganizeOutcome::Skipped { ref reason, .. } if reason == "missing"));

        let dir = organizer.organize_file(&setup.downloads.join("folder")).expect("organize failed");
        assert!(matches!(dir, OrganizeOutcome::Skipped { ref reason, .. } if reason == "directory"));
        assert!(setup.downloads.join("folder").is_dir());
    }

    #[test]
    fn test_move_entry_records_decision() {
        let setup = setup("");
        let organizer = organizer(&setup);
        let file = setup.downloads.join("shot.png");
        fs::write(&file, "png").expect("Failed to write file");

        let outcome = organizer.organize_file(&file).expect("organize failed");
        let OrganizeOutcome::Moved { action_id, destination } = outcome else {
            panic!("expected a move");
        };
        assert_eq!(destination, setup.sorted.join("Images").join("shot.png"));

        let entry = organizer
            .logs(10)
            .expect("logs failed")
            .into_iter()
            .find(|e| e.id == action_id)
            .expect("entry missing");
        assert_eq!(entry.status, EntryStatus::Completed);
        assert_eq!(entry.decision.map(|d| d.category_name), Some("Images".to_string()));
        assert_eq!(entry.rename.map(|r| r.applied), Some(false));
    }

    #[test]
    fn test_duplicate_verdict_overrides_destination() {
        let setup = setup("[duplicate_detection]\nenabled = true\nduplicates_destination = \"Dupes\"");
        let detector = Arc::new(FixedVerdict(
            DuplicateVerdict {
                is_image: true,
                perceptual_hash: Some("ff00".to_string()),
                is_duplicate: true,
                matched_hash: Some("ff01".to_string()),
                distance: Some(1),
            },
            Mutex::new(Vec::new()),
        ));
        let organizer = organizer(&setup).with_duplicate_detector(detector.clone());
        let file = setup.downloads.join("copy.png");
        fs::write(&file, "png").expect("Failed to write file");

        let outcome = organizer.organize_file(&file).expect("organize failed");
        assert!(matches!(
            outcome,
            OrganizeOutcome::Moved { ref destination, .. } if *destination == setup.sorted.join("Dupes").join("copy.png")
        ));
        assert_eq!(*detector.1.lock().expect("poisoned"), vec![0]);

        let entry = organizer.logs(1).expect("logs failed").remove(0);
        assert_eq!(entry.perceptual_hash.as_deref(), Some("ff00"));
        assert_eq!(entry.duplicate.and_then(|d| d.hamming_distance), Some(1));
        assert_eq!(organizer.log().recent_image_hashes(10).expect("hashes failed"), vec!["ff00"]);
    }

    #[test]
    fn test_collaborator_errors_do_not_block_the_move() {
        let setup = setup("[duplicate_detection]\nenabled = true\n\n[rename]\nenabled = true");
        let organizer = organizer(&setup)
            .with_duplicate_detector(Arc::new(Broken))
            .with_rename_suggester(Arc::new(Broken));
        let file = setup.downloads.join("photo.png");
        fs::write(&file, "png").expect("Failed to write file");

        let outcome = organizer.organize_file(&file).expect("organize failed");
        assert!(outcome.is_success());

        let contexts: Vec<String> = organizer
            .logs(MAX_LOG_LIMIT)
            .expect("logs failed")
            .into_iter()
            .filter(|e| e.action_type == ActionType::Error)
            .filter_map(|e| e.context)
            .collect();
        assert_eq!(contexts, vec!["duplicate_detection", "rename_suggestion"]);
    }

    #[test]
    fn test_rename_needs_threshold_confidence() {
        let setup = setup("[rename]\nenabled = true\nconfidence_threshold = 0.9");
        let low = organizer(&setup).with_rename_suggester(Arc::new(Suggest("renamed.png", 0.5)));
        let file = setup.downloads.join("a.png");
        fs::write(&file, "png").expect("Failed to write file");
        let outcome = low.organize_file(&file).expect("organize failed");
        assert!(matches!(outcome, OrganizeOutcome::Moved { ref destination, .. } if destination.ends_with("a.png")));

        let high = organizer(&setup).with_rename_suggester(Arc::new(Suggest("../x:y.png", 0.95)));
        let file = setup.downloads.join("b.png");
        fs::write(&file, "png").expect("Failed to write file");
        let outcome = high.organize_file(&file).expect("organize failed");
        assert!(matches!(
            outcome,
            OrganizeOutcome::Moved { ref destination, .. } if *destination == setup.sorted.join("Images").join(".._x_y.png")
        ));
    }

    #[test]
    fn test_escaping_category_destination_is_skipped() {
        let setup = setup("fallback_destination = \"../../../outside\"");
        let organizer = organizer(&setup);
        let file = setup.downloads.join("unknown.xyz");
        fs::write(&file, "data").expect("Failed to write file");

        let outcome = organizer.organize_file(&file).expect("organize failed");
        assert!(matches!(outcome, OrganizeOutcome::Skipped { ref reason, .. } if reason == "destination_not_allowed"));
        assert!(file.exists());
    }

    #[test]
    fn test_malformed_rules_fall_back_and_are_logged() {
        let setup = setup("");
        fs::write(&setup.rules_path, "this is = = not toml").expect("Failed to write rules");
        let organizer = organizer(&setup);

        assert_eq!(organizer.rules(), RuleSet::default());
        let errors: Vec<_> = organizer
            .logs(MAX_LOG_LIMIT)
            .expect("logs failed")
            .into_iter()
            .filter(|e| e.action_type == ActionType::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].context.as_deref(), Some("reload_rules"));
    }

    #[test]
    fn test_status_reports_last_event() {
        let setup = setup("version = 3");
        let organizer = organizer(&setup);
        let before = organizer.status();
        assert_eq!(before.rules_version, 3);
        assert!(before.last_event_timestamp_utc.is_none());
        assert!(!before.watcher_running);

        let file = setup.downloads.join("x.png");
        fs::write(&file, "png").expect("Failed to write file");
        organizer.handle_stable_file(
            &file,
            &FileEvent::new(crate::watcher::FileEventKind::Created, file.clone(), None),
        );

        assert!(organizer.status().last_event_timestamp_utc.is_some());
        let kinds: Vec<ActionType> = organizer
            .logs(MAX_LOG_LIMIT)
            .expect("logs failed")
            .iter()
            .map(|e| e.action_type)
            .collect();
        assert_eq!(kinds, vec![ActionType::Event, ActionType::Move]);
    }

    #[test]
    fn test_restored_file_is_not_refiled_by_watcher() {
        let setup = setup("");
        let organizer = organizer(&setup);
        let file = setup.downloads.join("keep.png");
        fs::write(&file, "png").expect("Failed to write file");

        assert!(organizer.organize_file(&file).expect("organize failed").is_success());
        assert!(organizer.undo().expect("undo failed").is_success());
        assert!(file.exists());

        organizer.handle_stable_file(&file, &FileEvent::new(crate::watcher::FileEventKind::Created, file.clone(), None));
        assert!(file.exists());
        let last = organizer.logs(1).expect("logs failed").remove(0);
        assert_eq!(last.action_type, ActionType::Skip);
        assert_eq!(last.reason.as_deref(), Some("recently_restored"));

        // An explicit request still files it.
        assert!(organizer.organize_file(&file).expect("organize failed").is_success());
    }

    #[test]
    fn test_watch_handle_drives_running_flag() {
        let setup = setup("");
        let organizer = Arc::new(organizer(&setup));
        assert!(!organizer.status().watcher_running);

        let handle = organizer.watch().expect("Failed to watch");
        assert!(organizer.status().watcher_running);
        assert!(handle.watcher().is_running());
        assert!(handle.stop());
        assert!(!organizer.status().watcher_running);

        let handle = organizer.watch().expect("Failed to watch again");
        assert!(organizer.status().watcher_running);
        drop(handle);
        assert!(!organizer.status().watcher_running);
    }

    #[test]
    fn test_logs_limit_is_clamped() {
        let setup = setup("");
        let organizer = organizer(&setup);
        for _ in 0..3 {
            organizer.organize_file(&setup.downloads.join("gone")).expect("organize failed");
        }
        assert_eq!(organizer.logs(0).expect("logs failed").len(), 1);
        assert_eq!(organizer.logs(100_000).expect("logs failed").len(), 3);
    }
}
