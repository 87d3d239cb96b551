//! Rule document loading and watcher ignore filters.
//!
//! Rules are stored as TOML and every field is optional:
//!
//! ```toml
//! version = 1
//! domain_mode = true
//! base_destination = "~/Downloads/SilentOrganizer"
//! fallback_destination = "Misc"
//!
//! [rename]
//! enabled = false
//! confidence_threshold = 0.9
//!
//! [duplicate_detection]
//! enabled = false
//! max_hamming_distance = 2
//! duplicates_destination = "Duplicates"
//!
//! [watcher]
//! stability_seconds = 1.5
//! max_wait_seconds = 60.0
//! debounce_seconds = 1.0
//!
//! [watcher.ignore]
//! patterns = ["*.torrent"]
//! regex = []
//!
//! [[categories]]
//! name = "Lectures"
//! destination = "Education/Lectures"
//! keywords = ["lecture"]
//! extensions = [".pdf"]
//! ```

use crate::paths::{home_dir, is_temporary_file, resolve_path};
use glob::Pattern;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the rule document looked up in the current directory.
pub const LOCAL_RULES_FILE: &str = ".silent-organizer.toml";

/// Errors that can occur while loading rules or compiling filters.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Rule document not found at the specified path.
    #[error("Configuration file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),
    /// Invalid TOML syntax or structure.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),
    /// Invalid glob pattern in the ignore list.
    #[error("Invalid glob pattern '{0}'")]
    InvalidGlobPattern(String),
    /// Invalid regex pattern in the ignore list.
    #[error("Invalid regex pattern '{pattern}': {reason}")]
    InvalidRegexPattern {
        /// The regex pattern that failed to compile.
        pattern: String,
        /// The reason why the pattern is invalid.
        reason: String,
    },
    /// IO error while reading or writing the rule document.
    #[error("IO error reading configuration: {0}")]
    IoError(String),
}

/// The complete rule document.
///
/// Order of `categories` matters: on equal scores the first one wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSet {
    pub version: u32,
    /// Enables the academic-vocabulary boost in the classifier.
    #[serde(alias = "education_mode")]
    pub domain_mode: bool,
    pub base_destination: String,
    pub fallback_destination: String,
    pub rename: RenameSettings,
    pub duplicate_detection: DuplicateSettings,
    pub watcher: WatcherConfig,
    pub categories: Vec<CategoryRule>,
}

/// One destination bucket and the signals that select it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryRule {
    pub name: String,
    /// Path relative to the base destination.
    pub destination: String,
    pub keywords: Vec<String>,
    /// Extensions with or without a leading dot, any case.
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenameSettings {
    pub enabled: bool,
    /// Minimum suggestion confidence before a rename is applied.
    pub confidence_threshold: f64,
}

impl Default for RenameSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            confidence_threshold: 0.9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplicateSettings {
    pub enabled: bool,
    pub max_hamming_distance: u32,
    /// Bucket (relative to the base destination) for near-duplicate images.
    pub duplicates_destination: String,
}

impl Default for DuplicateSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_hamming_distance: 2,
            duplicates_destination: "Duplicates".to_string(),
        }
    }
}

/// Timing knobs for the directory watcher, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub stability_seconds: f64,
    pub max_wait_seconds: f64,
    pub debounce_seconds: f64,
    pub ignore: IgnoreRules,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            stability_seconds: 1.5,
            max_wait_seconds: 60.0,
            debounce_seconds: 1.0,
            ignore: IgnoreRules::default(),
        }
    }
}

/// Extra filenames the watcher should never pick up.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IgnoreRules {
    /// Glob patterns matched against the file name.
    pub patterns: Vec<String>,
    /// Regex patterns matched against the file name.
    pub regex: Vec<String>,
}

impl Default for RuleSet {
    /// The minimal safe rule set: no categories, everything goes to `Misc`.
    fn default() -> Self {
        Self {
            version: 1,
            domain_mode: true,
            base_destination: default_base_destination(),
            fallback_destination: "Misc".to_string(),
            rename: RenameSettings::default(),
            duplicate_detection: DuplicateSettings::default(),
            watcher: WatcherConfig::default(),
            categories: Vec::new(),
        }
    }
}

fn default_base_destination() -> String {
    "~/Downloads/SilentOrganizer".to_string()
}

impl RuleSet {
    /// Picks the rule document to use.
    ///
    /// 1. `config_path`, if provided
    /// 2. `.silent-organizer.toml` in the current directory, if present
    /// 3. `~/.config/silent-organizer/rules.toml`
    pub fn locate(config_path: Option<&Path>) -> PathBuf {
        if let Some(path) = config_path {
            return path.to_path_buf();
        }

        let local_config = PathBuf::from(LOCAL_RULES_FILE);
        if local_config.exists() {
            return local_config;
        }

        config_dir().join("rules.toml")
    }

    /// Loads the rule document at `path`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ConfigNotFound` if the file does not exist,
    /// `ConfigError::ConfigInvalid` if TOML parsing fails and
    /// `ConfigError::IoError` if the file cannot be read.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::ConfigNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Loads `path`, degrading to [`RuleSet::default`] when it cannot be used.
    ///
    /// A missing document is normal and yields no error. A document that
    /// exists but does not parse yields the default together with the error
    /// so the caller can record it.
    pub fn load_or_default(path: &Path) -> (Self, Option<ConfigError>) {
        match Self::load_from_file(path) {
            Ok(rules) => (rules, None),
            Err(ConfigError::ConfigNotFound(_)) => (Self::default(), None),
            Err(e) => (Self::default(), Some(e)),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))
    }

    /// Writes this rule set to `path` unless a file is already there.
    ///
    /// Returns `false` if the file existed and was left alone.
    pub fn write_if_absent(&self, path: &Path) -> Result<bool, ConfigError> {
        if path.exists() {
            return Ok(false);
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }
        let content = self.to_toml_string()?;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        std::io::Write::write_all(&mut file, content.as_bytes())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(true)
    }

    /// The resolved root under which all category destinations live.
    pub fn base_destination_path(&self) -> PathBuf {
        let raw = self.base_destination.trim();
        if raw.is_empty() {
            resolve_path(Path::new(&default_base_destination()))
        } else {
            resolve_path(Path::new(raw))
        }
    }

    /// Fallback bucket, never empty.
    pub fn fallback_destination(&self) -> &str {
        let raw = self.fallback_destination.trim();
        if raw.is_empty() { "Misc" } else { raw }
    }

    /// A ready-to-edit rule set with common download categories.
    pub fn starter() -> Self {
        fn category(name: &str, destination: &str, keywords: &[&str], extensions: &[&str]) -> CategoryRule {
            CategoryRule {
                name: name.to_string(),
                destination: destination.to_string(),
                keywords: keywords.iter().map(|k| k.to_string()).collect(),
                extensions: extensions.iter().map(|e| e.to_string()).collect(),
            }
        }

        Self {
            categories: vec![
                category(
                    "Lectures",
                    "Education/Lectures",
                    &["lecture", "slides", "syllabus"],
                    &[".pdf", ".pptx", ".key"],
                ),
                category(
                    "Assignments",
                    "Education/Assignments",
                    &["assignment", "homework", "hw", "problem set"],
                    &[".pdf", ".docx", ".zip"],
                ),
                category(
                    "Invoices",
                    "Finance/Invoices",
                    &["invoice", "receipt", "statement"],
                    &[".pdf"],
                ),
                category(
                    "Documents",
                    "Documents",
                    &[],
                    &[".pdf", ".doc", ".docx", ".odt", ".rtf", ".txt", ".md", ".epub"],
                ),
                category(
                    "Spreadsheets",
                    "Documents/Spreadsheets",
                    &[],
                    &[".xlsx", ".xls", ".ods", ".csv"],
                ),
                category(
                    "Presentations",
                    "Documents/Presentations",
                    &[],
                    &[".pptx", ".ppt", ".odp", ".key"],
                ),
                category(
                    "Images",
                    "Images",
                    &["screenshot", "screen shot"],
                    &[".png", ".jpg", ".jpeg", ".gif", ".webp", ".heic", ".svg", ".bmp", ".tiff"],
                ),
                category(
                    "Audio",
                    "Audio",
                    &[],
                    &[".mp3", ".wav", ".flac", ".aac", ".ogg", ".m4a"],
                ),
                category(
                    "Video",
                    "Video",
                    &[],
                    &[".mp4", ".mkv", ".mov", ".avi", ".webm"],
                ),
                category(
                    "Archives",
                    "Archives",
                    &[],
                    &[".zip", ".tar", ".gz", ".tgz", ".7z", ".rar", ".xz", ".bz2"],
                ),
                category(
                    "Installers",
                    "Installers",
                    &["setup", "installer"],
                    &[".dmg", ".pkg", ".exe", ".msi", ".deb", ".rpm", ".appimage"],
                ),
            ],
            ..Self::default()
        }
    }
}

/// `~/.config/silent-organizer`, or `./.silent-organizer` without a home.
pub fn config_dir() -> PathBuf {
    match home_dir() {
        Some(home) => home.join(".config").join("silent-organizer"),
        None => PathBuf::from(".silent-organizer"),
    }
}

impl IgnoreRules {
    /// Compiles the user patterns, skipping (and reporting) invalid ones.
    pub fn compile(&self) -> (IgnoreFilter, Vec<ConfigError>) {
        let mut errors = Vec::new();

        let patterns = self
            .patterns
            .iter()
            .filter_map(|pattern| match Pattern::new(pattern) {
                Ok(p) => Some(p),
                Err(_) => {
                    errors.push(ConfigError::InvalidGlobPattern(pattern.clone()));
                    None
                }
            })
            .collect();

        let regexes = self
            .regex
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(r) => Some(r),
                Err(e) => {
                    errors.push(ConfigError::InvalidRegexPattern {
                        pattern: pattern.clone(),
                        reason: e.to_string(),
                    });
                    None
                }
            })
            .collect();

        (IgnoreFilter { patterns, regexes }, errors)
    }
}

/// Compiled ignore rules used by the watcher before any other processing.
#[derive(Debug, Clone, Default)]
pub struct IgnoreFilter {
    patterns: Vec<Pattern>,
    regexes: Vec<Regex>,
}

impl IgnoreFilter {
    /// Returns true if a notification for `path` should be dropped.
    ///
    /// Built-in temporary-file detection runs first, then user globs, then
    /// user regexes, all against the file name.
    pub fn should_ignore(&self, path: &Path) -> bool {
        if is_temporary_file(path) {
            return true;
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();

        self.patterns.iter().any(|p| p.matches(&file_name))
            || self.regexes.iter().any(|r| r.is_match(&file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_document_yields_defaults() {
        let rules = RuleSet::from_toml_str("").expect("empty document should parse");
        assert_eq!(rules, RuleSet::default());
        assert!(rules.categories.is_empty());
        assert_eq!(rules.fallback_destination(), "Misc");
    }

    #[test]
    fn test_partial_document_fills_missing_fields() {
        let rules = RuleSet::from_toml_str(
            r#"
            fallback_destination = "Other"

            [watcher]
            stability_seconds = 3.0

            [[categories]]
            name = "Lectures"
            destination = "Education/Lectures"
            keywords = ["lecture"]
            "#,
        )
        .expect("document should parse");

        assert_eq!(rules.fallback_destination(), "Other");
        assert_eq!(rules.watcher.stability_seconds, 3.0);
        assert_eq!(rules.watcher.max_wait_seconds, 60.0);
        assert_eq!(rules.categories.len(), 1);
        assert!(rules.categories[0].extensions.is_empty());
        assert_eq!(rules.rename.confidence_threshold, 0.9);
    }

    #[test]
    fn test_education_mode_alias() {
        let rules = RuleSet::from_toml_str("education_mode = false").expect("should parse");
        assert!(!rules.domain_mode);
    }

    #[test]
    fn test_malformed_document_falls_back_with_error() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("rules.toml");
        fs::write(&path, "categories = \"not a list\"").expect("Failed to write rules");

        let (rules, error) = RuleSet::load_or_default(&path);
        assert_eq!(rules, RuleSet::default());
        assert!(matches!(error, Some(ConfigError::ConfigInvalid(_))));
    }

    #[test]
    fn test_missing_document_is_not_an_error() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let (rules, error) = RuleSet::load_or_default(&temp_dir.path().join("absent.toml"));
        assert_eq!(rules, RuleSet::default());
        assert!(error.is_none());
    }

    #[test]
    fn test_starter_round_trips_through_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("nested").join("rules.toml");

        let starter = RuleSet::starter();
        assert!(starter.write_if_absent(&path).expect("write should succeed"));
        assert!(!starter.write_if_absent(&path).expect("second write is a no-op"));

        let loaded = RuleSet::load_from_file(&path).expect("starter should load");
        assert_eq!(loaded, starter);
    }

    #[test]
    fn test_empty_base_destination_uses_default() {
        let rules = RuleSet {
            base_destination: "  ".to_string(),
            ..RuleSet::default()
        };
        assert!(rules.base_destination_path().ends_with("Downloads/SilentOrganizer"));
    }

    #[test]
    fn test_ignore_filter_builtin_and_user_rules() {
        let rules = IgnoreRules {
            patterns: vec!["*.torrent".to_string(), "[0-9]*.log".to_string()],
            regex: vec![r"^draft_.*\.txt$".to_string()],
        };
        let (filter, errors) = rules.compile();
        assert!(errors.is_empty());

        assert!(filter.should_ignore(Path::new("/d/video.mp4.crdownload")));
        assert!(filter.should_ignore(Path::new("/d/ubuntu.iso.torrent")));
        assert!(filter.should_ignore(Path::new("/d/1debug.log")));
        assert!(filter.should_ignore(Path::new("/d/draft_plan.txt")));

        assert!(!filter.should_ignore(Path::new("/d/debug.log")));
        assert!(!filter.should_ignore(Path::new("/d/plan.txt")));
        assert!(!filter.should_ignore(Path::new("/d/ubuntu.iso")));
    }

    #[test]
    fn test_invalid_ignore_patterns_are_skipped() {
        let rules = IgnoreRules {
            patterns: vec!["[invalid".to_string(), "*.bak".to_string()],
            regex: vec!["[invalid(".to_string()],
        };
        let (filter, errors) = rules.compile();

        assert_eq!(errors.len(), 2);
        assert!(filter.should_ignore(Path::new("old.bak")));
        assert!(!filter.should_ignore(Path::new("invalid")));
    }
}
