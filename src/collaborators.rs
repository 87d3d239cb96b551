//! Seams for the optional analyzers the organizer consults per file.
//!
//! Both are advisory: any error is recorded and the file is organized as if
//! the collaborator had said nothing.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("Duplicate analysis failed: {0}")]
    Duplicate(String),
    #[error("Rename suggestion failed: {0}")]
    Rename(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Outcome of comparing an incoming file against previously seen images.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DuplicateVerdict {
    pub is_image: bool,
    /// Hash of the incoming file, recorded so later files can match it.
    pub perceptual_hash: Option<String>,
    pub is_duplicate: bool,
    pub matched_hash: Option<String>,
    pub distance: Option<u32>,
}

/// Near-duplicate image detection.
pub trait DuplicateDetector: Send + Sync {
    /// Compares `file` with `prior_hashes` (newest first), treating anything
    /// within `max_distance` as a duplicate.
    fn analyze(
        &self,
        file: &Path,
        prior_hashes: &[String],
        max_distance: u32,
    ) -> Result<DuplicateVerdict, CollaboratorError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenameSuggestion {
    /// Bare filename including extension.
    pub suggested_name: String,
    pub confidence: f64,
    pub reasons: Vec<String>,
}

/// Filename suggestions. Returning `None` means "keep the current name".
pub trait RenameSuggester: Send + Sync {
    fn suggest(
        &self,
        file: &Path,
        category_name: &str,
    ) -> Result<Option<RenameSuggestion>, CollaboratorError>;
}
