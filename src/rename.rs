//! Built-in filename suggestions of the form `YYYY-MM-DD - Category - Title.ext`.

use crate::classifier::FALLBACK_CATEGORY;
use crate::collaborators::{CollaboratorError, RenameSuggester, RenameSuggestion};
use crate::paths::sanitize_filename;
use chrono::{DateTime, Local, NaiveDate};
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

const MAX_TITLE_TOKENS: usize = 8;
const MAX_CONFIDENCE: f64 = 0.95;

const TITLE_STOP_WORDS: &[&str] = &[
    "final",
    "midterm",
    "exam",
    "quiz",
    "lecture",
    "assignment",
    "homework",
    "slides",
    "notes",
];

struct DatePattern {
    regex: Regex,
    /// Capture group indices for year, month, day.
    order: [usize; 3],
}

static DATE_PATTERNS: LazyLock<Vec<DatePattern>> = LazyLock::new(|| {
    [
        (r"\b(20\d{2})[-_.](\d{2})[-_.](\d{2})\b", [1, 2, 3]),
        (r"\b(20\d{2})(\d{2})(\d{2})\b", [1, 2, 3]),
        (r"\b(\d{2})[-_.](\d{2})[-_.](20\d{2})\b", [3, 2, 1]),
    ]
    .into_iter()
    .filter_map(|(pattern, order)| Regex::new(pattern).ok().map(|regex| DatePattern { regex, order }))
    .collect()
});

static TITLE_TOKEN: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"[A-Za-z0-9]+").ok());

/// Conservative, offline rename heuristic.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicRenamer;

impl HeuristicRenamer {
    pub fn new() -> Self {
        Self
    }
}

impl RenameSuggester for HeuristicRenamer {
    fn suggest(
        &self,
        file: &Path,
        category_name: &str,
    ) -> Result<Option<RenameSuggestion>, CollaboratorError> {
        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = file
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        let mut reasons = Vec::new();
        let date = match extract_date(&stem) {
            Some(date) => {
                reasons.push("date_from_name".to_string());
                Some(date)
            }
            None => {
                let modified = fs::metadata(file).and_then(|m| m.modified()).ok();
                if modified.is_some() {
                    reasons.push("date_from_mtime".to_string());
                }
                modified.map(|m| DateTime::<Local>::from(m).date_naive())
            }
        };

        let title = match extract_title(&stem) {
            Some(title) => {
                reasons.push("title_tokens".to_string());
                title
            }
            None => stem.trim().to_string(),
        };

        let mut parts = Vec::new();
        let mut confidence = 0.55_f64;
        if let Some(date) = date {
            parts.push(date.format("%Y-%m-%d").to_string());
            confidence += 0.18;
        }
        if !category_name.is_empty() && category_name != FALLBACK_CATEGORY && category_name != "Unknown" {
            parts.push(category_name.to_string());
            confidence += 0.07;
        }
        if !title.is_empty() {
            parts.push(title);
            confidence += 0.15;
        }

        let candidate = parts.join(" - ");
        if candidate.trim().is_empty() {
            return Ok(None);
        }

        let suggested_name = format!("{}{extension}", sanitize_filename(&candidate));
        if file.file_name().is_some_and(|n| n.to_string_lossy() == suggested_name) {
            return Ok(None);
        }

        if reasons.len() >= 2 {
            confidence += 0.07;
        }

        Ok(Some(RenameSuggestion {
            suggested_name,
            confidence: confidence.clamp(0.0, MAX_CONFIDENCE),
            reasons,
        }))
    }
}

fn extract_date(text: &str) -> Option<NaiveDate> {
    DATE_PATTERNS.iter().find_map(|pattern| {
        let captures = pattern.regex.captures(text)?;
        let field = |i: usize| captures.get(pattern.order[i])?.as_str().parse::<u32>().ok();
        let year = i32::try_from(field(0)?).ok()?;
        NaiveDate::from_ymd_opt(year, field(1)?, field(2)?)
    })
}

fn extract_title(stem: &str) -> Option<String> {
    let token_re = TITLE_TOKEN.as_ref()?;
    let tokens: Vec<&str> = token_re
        .find_iter(stem)
        .map(|m| m.as_str())
        .filter(|t| t.len() >= 2)
        .collect();
    if tokens.is_empty() {
        return None;
    }

    let filtered: Vec<&str> = tokens
        .iter()
        .copied()
        .filter(|t| !TITLE_STOP_WORDS.contains(&t.to_lowercase().as_str()))
        .collect();
    let chosen = if filtered.is_empty() { &tokens } else { &filtered };

    Some(
        chosen
            .iter()
            .take(MAX_TITLE_TOKENS)
            .copied()
            .collect::<Vec<_>>()
            .join(" "),
    )
}
