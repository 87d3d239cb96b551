//! Rule-based destination scoring.
//!
//! The classifier never touches the filesystem; it only looks at the file
//! name. Each category is scored independently and the best one wins, with
//! declaration order breaking ties.
//!
//! # Examples
//!
//! ```
//! use silent_organizer::classifier::Classifier;
//! use silent_organizer::config::{CategoryRule, RuleSet};
//! use std::path::Path;
//!
//! let rules = RuleSet {
//!     domain_mode: false,
//!     categories: vec![CategoryRule {
//!         name: "Lectures".to_string(),
//!         destination: "Education/Lectures".to_string(),
//!         keywords: vec!["lecture".to_string()],
//!         extensions: vec![".pdf".to_string()],
//!     }],
//!     ..RuleSet::default()
//! };
//!
//! let decision = Classifier::new(&rules).decide(Path::new("OS lecture 01.pdf"));
//! assert_eq!(decision.destination, "Education/Lectures");
//! assert!((decision.confidence - 0.67).abs() < 1e-9);
//! ```

use crate::config::RuleSet;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

pub const EXTENSION_SCORE: f64 = 0.35;
pub const KEYWORD_BASE_SCORE: f64 = 0.20;
pub const KEYWORD_HIT_SCORE: f64 = 0.12;
pub const KEYWORD_MAX_SCORE: f64 = 0.55;
pub const DOMAIN_BOOST: f64 = 0.08;
/// Minimum winning score; anything lower goes to the fallback bucket.
pub const MATCH_THRESHOLD: f64 = 0.35;
pub const FALLBACK_CONFIDENCE: f64 = 0.25;
pub const MAX_CONFIDENCE: f64 = 0.99;

/// Category name reported for fallback decisions.
pub const FALLBACK_CATEGORY: &str = "Fallback";

const DOMAIN_VOCABULARY: &[&str] = &["lecture", "assignment", "exam", "quiz", "midterm", "final"];

/// Where a file should go and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationDecision {
    pub category_name: String,
    /// Destination relative to the base destination.
    pub destination: String,
    /// Always within `[0, 0.99]`.
    pub confidence: f64,
    pub reasons: Vec<String>,
}

impl ClassificationDecision {
    pub fn fallback(destination: &str, confidence: f64, reason: &str) -> Self {
        Self {
            category_name: FALLBACK_CATEGORY.to_string(),
            destination: destination.to_string(),
            confidence,
            reasons: vec![reason.to_string()],
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.category_name == FALLBACK_CATEGORY
    }
}

#[derive(Debug, Clone)]
struct CompiledCategory {
    name: String,
    destination: String,
    keywords: Vec<String>,
    extensions: HashSet<String>,
}

/// Scores file names against a [`RuleSet`].
#[derive(Debug, Clone)]
pub struct Classifier {
    domain_mode: bool,
    fallback_destination: String,
    categories: Vec<CompiledCategory>,
}

impl Classifier {
    /// Normalizes the rule set once so `decide` does no allocation-heavy work
    /// beyond the file name itself.
    pub fn new(rules: &RuleSet) -> Self {
        let categories = rules
            .categories
            .iter()
            .filter(|c| !c.destination.trim().is_empty())
            .map(|c| {
                let mut seen = HashSet::new();
                let keywords = c
                    .keywords
                    .iter()
                    .map(|k| k.trim().to_lowercase())
                    .filter(|k| !k.is_empty() && seen.insert(k.clone()))
                    .collect();

                let extensions = c
                    .extensions
                    .iter()
                    .map(|e| normalize_extension(e))
                    .filter(|e| e.len() > 1)
                    .collect();

                CompiledCategory {
                    name: if c.name.trim().is_empty() {
                        "Unknown".to_string()
                    } else {
                        c.name.clone()
                    },
                    destination: c.destination.trim().to_string(),
                    keywords,
                    extensions,
                }
            })
            .collect();

        Self {
            domain_mode: rules.domain_mode,
            fallback_destination: rules.fallback_destination().to_string(),
            categories,
        }
    }

    /// Picks a destination for `file`.
    pub fn decide(&self, file: &Path) -> ClassificationDecision {
        let filename = file
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let extension = file
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()));

        let domain_hit = self.domain_mode
            && tokenize(&stem).any(|token| DOMAIN_VOCABULARY.contains(&token));

        let mut best: Option<(&CompiledCategory, f64, Vec<String>)> = None;

        for category in &self.categories {
            let mut score = 0.0;
            let mut reasons = Vec::new();

            if let Some(ext) = extension.as_deref()
                && category.extensions.contains(ext)
            {
                score += EXTENSION_SCORE;
                reasons.push(format!("extension:{ext}"));
            }

            let mut hits = 0u32;
            for keyword in &category.keywords {
                if filename.contains(keyword.as_str()) {
                    hits += 1;
                    reasons.push(format!("keyword:{keyword}"));
                }
            }
            if hits > 0 {
                score += KEYWORD_MAX_SCORE.min(KEYWORD_BASE_SCORE + KEYWORD_HIT_SCORE * f64::from(hits));
            }

            if domain_hit {
                score += DOMAIN_BOOST;
                reasons.push("domain_mode_boost".to_string());
            }

            let best_score = best.as_ref().map_or(0.0, |(_, s, _)| *s);
            if score > best_score {
                best = Some((category, score, reasons));
            }
        }

        match best {
            Some((category, score, reasons)) if score >= MATCH_THRESHOLD => ClassificationDecision {
                category_name: category.name.clone(),
                destination: category.destination.clone(),
                confidence: score.clamp(0.0, MAX_CONFIDENCE),
                reasons,
            },
            _ => ClassificationDecision::fallback(
                &self.fallback_destination,
                FALLBACK_CONFIDENCE,
                "fallback",
            ),
        }
    }
}

fn normalize_extension(ext: &str) -> String {
    let trimmed = ext.trim().trim_start_matches('.').to_lowercase();
    format!(".{trimmed}")
}

fn tokenize(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
}
