//! Path safety helpers shared by the mover, the organizer and undo.
//!
//! All containment checks run on resolved paths: `~` expanded, made absolute,
//! `.`/`..` folded lexically, and the longest existing prefix canonicalized so
//! symlinked parents compare equal to their targets.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Upper bound on `" (n)"` disambiguators tried before falling back to the pid.
pub const MAX_DISAMBIGUATOR: u32 = 10_000;

/// Suffixes used by browsers and editors for files still being written.
const TEMPORARY_SUFFIXES: &[&str] = &[".tmp", ".part", ".crdownload", ".download", ".partial"];

/// OS metadata files that are never worth organizing.
const JUNK_FILENAMES: &[&str] = &[".ds_store", "thumbs.db", "desktop.ini"];

/// Returns the current user's home directory, if one is configured.
pub fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
}

/// Returns `$HOME/Downloads`, or `./Downloads` when no home is known.
pub fn default_downloads_dir() -> PathBuf {
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Downloads")
}

/// Expands a leading `~` to the home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(first)) if first == "~" => match home_dir() {
            Some(home) => home.join(components.as_path()),
            None => path.to_path_buf(),
        },
        _ => path.to_path_buf(),
    }
}

/// Resolves a path without requiring it to exist.
pub fn resolve_path(path: &Path) -> PathBuf {
    let expanded = expand_tilde(path);
    let absolute = std::path::absolute(&expanded).unwrap_or(expanded);
    canonicalize_existing_prefix(&normalize_lexically(&absolute))
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // Popping past the root is a no-op, so "/.." stays "/".
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn canonicalize_existing_prefix(path: &Path) -> PathBuf {
    let mut existing = path.to_path_buf();
    let mut missing: Vec<OsString> = Vec::new();

    loop {
        if let Ok(canonical) = existing.canonicalize() {
            let mut resolved = canonical;
            for name in missing.iter().rev() {
                resolved.push(name);
            }
            return resolved;
        }

        let name = existing.file_name().map(|n| n.to_os_string());
        match (name, existing.parent()) {
            (Some(name), Some(parent)) => {
                missing.push(name);
                existing = parent.to_path_buf();
            }
            _ => return path.to_path_buf(),
        }
    }
}

/// Returns true if `path` equals `base` or lies underneath it.
pub fn is_within_directory(path: &Path, base: &Path) -> bool {
    resolve_path(path).starts_with(resolve_path(base))
}

/// Returns true if `dest` resolves inside at least one allow-list root.
pub fn validate_destination(dest: &Path, allowed_roots: &[PathBuf]) -> bool {
    allowed_roots.iter().any(|root| is_within_directory(dest, root))
}

/// Makes a single path component safe to use as a filename.
///
/// Separators and characters invalid on common filesystems become `_`,
/// NUL bytes are dropped, and trailing dots and spaces are trimmed.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .filter(|c| *c != '\0')
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            other => other,
        })
        .collect();

    let cleaned = cleaned.trim_end_matches(['.', ' ']);
    if cleaned.is_empty() || cleaned == ".." {
        "untitled".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Returns true for temporary or incomplete-download artifacts.
pub fn is_temporary_file(path: &Path) -> bool {
    let Some(name) = path.file_name() else {
        return true;
    };
    let name = name.to_string_lossy().to_lowercase();

    if name.starts_with("~$") || name.starts_with('.') {
        return true;
    }
    if JUNK_FILENAMES.contains(&name.as_str()) {
        return true;
    }
    TEMPORARY_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Creates `dir` and its parents; succeeds if it already exists.
pub fn ensure_directory(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)
}

/// Returns `dest` if nothing exists there, otherwise the first free
/// `"stem (n).ext"` sibling. Falls back to the process id once
/// [`MAX_DISAMBIGUATOR`] candidates are taken.
pub fn non_overwriting_path(dest: &Path) -> PathBuf {
    if !exists_no_follow(dest) {
        return dest.to_path_buf();
    }

    let parent = dest.parent().unwrap_or_else(|| Path::new(""));
    let stem = dest
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = dest
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    for n in 1..MAX_DISAMBIGUATOR {
        let candidate = parent.join(format!("{stem} ({n}){extension}"));
        if !exists_no_follow(&candidate) {
            return candidate;
        }
    }

    parent.join(format!("{stem} ({}){extension}", std::process::id()))
}

/// Like `Path::exists`, but a dangling symlink still counts as occupied.
pub(crate) fn exists_no_follow(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_temporary_files_detected() {
        assert!(is_temporary_file(Path::new("/d/movie.mkv.crdownload")));
        assert!(is_temporary_file(Path::new("/d/setup.exe.part")));
        assert!(is_temporary_file(Path::new("/d/~$report.docx")));
        assert!(is_temporary_file(Path::new("/d/.DS_Store")));
        assert!(is_temporary_file(Path::new("/d/Thumbs.db")));
        assert!(is_temporary_file(Path::new("/d/.com.google.Chrome.a1b2")));
        assert!(is_temporary_file(Path::new("/d/data.TMP")));
        assert!(!is_temporary_file(Path::new("/d/report.pdf")));
        assert!(!is_temporary_file(Path::new("/d/partial results.xlsx")));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("a/b\\c.pdf"), "a_b_c.pdf");
        assert_eq!(sanitize_filename("  what?.txt. "), "what_.txt");
        assert_eq!(sanitize_filename("..."), "untitled");
        assert_eq!(sanitize_filename(".."), "untitled");
        assert_eq!(sanitize_filename("ok name.pdf"), "ok name.pdf");
    }

    #[test]
    fn test_parent_components_cannot_escape_root() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path().join("root");
        fs::create_dir(&root).expect("Failed to create root");

        let inside = root.join("a").join("..").join("b.txt");
        let escaping = root.join("..").join("..").join("etc").join("passwd");

        assert!(validate_destination(&inside, std::slice::from_ref(&root)));
        assert!(!validate_destination(&escaping, &[root]));
    }

    #[test]
    fn test_sibling_with_common_prefix_is_outside() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path().join("Downloads");
        let sibling = temp_dir.path().join("Downloads-old").join("x.txt");

        assert!(!is_within_directory(&sibling, &root));
        assert!(is_within_directory(&root.join("x.txt"), &root));
        assert!(is_within_directory(&root, &root));
    }

    #[test]
    fn test_non_overwriting_path_numbers_before_extension() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let dest = temp_dir.path().join("notes.pdf");
        assert_eq!(non_overwriting_path(&dest), dest);

        fs::write(&dest, "first").expect("Failed to write file");
        assert_eq!(
            non_overwriting_path(&dest),
            temp_dir.path().join("notes (1).pdf")
        );

        fs::write(temp_dir.path().join("notes (1).pdf"), "second").expect("Failed to write file");
        assert_eq!(
            non_overwriting_path(&dest),
            temp_dir.path().join("notes (2).pdf")
        );
    }

    #[test]
    fn test_non_overwriting_path_without_extension() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let dest = temp_dir.path().join("Makefile");
        fs::write(&dest, "all:").expect("Failed to write file");

        assert_eq!(
            non_overwriting_path(&dest),
            temp_dir.path().join("Makefile (1)")
        );
    }

    #[test]
    fn test_resolve_path_of_missing_file_keeps_name() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let missing = temp_dir.path().join("nope").join("file.txt");
        let resolved = resolve_path(&missing);

        assert!(resolved.ends_with("nope/file.txt"));
        assert!(resolved.is_absolute());
    }
}
