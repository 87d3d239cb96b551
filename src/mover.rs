//! Non-destructive file relocation.
//!
//! [`safe_move`] never replaces an existing file. It links the source into
//! place when both paths share a filesystem, and otherwise streams a copy into
//! a freshly created file, syncs it, and only then removes the source.

use crate::paths::{ensure_directory, exists_no_follow};
use std::fs::{self, File, FileTimes, Metadata, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

const COPY_BUFFER_SIZE: usize = 1024 * 1024;

/// Errors that can occur while moving a file.
#[derive(Debug, Error)]
pub enum MoveError {
    /// Something already occupies the destination; nothing was written.
    #[error("Destination already exists: {}", .0.display())]
    DestinationExists(PathBuf),
    #[error("Source file not found: {}", .0.display())]
    SourceMissing(PathBuf),
    #[error("Source is not a regular file: {}", .0.display())]
    NotAFile(PathBuf),
    #[error("Failed to create directory {}: {source}", .path.display())]
    DirectoryCreationFailed { path: PathBuf, source: io::Error },
    #[error("Failed to read source {}: {source}", .path.display())]
    SourceUnreadable { path: PathBuf, source: io::Error },
    /// The copy did not complete; any partial destination has been removed.
    #[error("Failed to copy {} to {}: {source}", .from.display(), .to.display())]
    CopyFailed {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },
    /// The source could not be removed; the destination copy was rolled back.
    #[error("Failed to remove source {}: {source}", .path.display())]
    SourceRemovalFailed { path: PathBuf, source: io::Error },
}

pub type MoveResult<T> = Result<T, MoveError>;

/// How a successful move was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveMethod {
    /// Hard link plus unlink of the source, atomic on one filesystem.
    Link,
    /// Streamed copy into an exclusively created file.
    Copy,
}

/// Moves `src` to `dest` without ever overwriting an existing file.
///
/// `dest` is expected to be free already (see
/// [`crate::paths::non_overwriting_path`]); it is checked again here, and the
/// final write uses exclusive creation, so of two racing movers exactly one
/// wins and the other gets [`MoveError::DestinationExists`].
///
/// On failure the source is left in place.
pub fn safe_move(src: &Path, dest: &Path) -> MoveResult<MoveMethod> {
    if exists_no_follow(dest) {
        return Err(MoveError::DestinationExists(dest.to_path_buf()));
    }

    let metadata = fs::metadata(src).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => MoveError::SourceMissing(src.to_path_buf()),
        _ => MoveError::SourceUnreadable {
            path: src.to_path_buf(),
            source: e,
        },
    })?;
    if !metadata.is_file() {
        return Err(MoveError::NotAFile(src.to_path_buf()));
    }

    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_directory(parent).map_err(|e| MoveError::DirectoryCreationFailed {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    match fs::hard_link(src, dest) {
        Ok(()) => {
            if let Err(e) = fs::remove_file(src) {
                let _ = fs::remove_file(dest);
                return Err(MoveError::SourceRemovalFailed {
                    path: src.to_path_buf(),
                    source: e,
                });
            }
            return Ok(MoveMethod::Link);
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(MoveError::DestinationExists(dest.to_path_buf()));
        }
        Err(e) => {
            debug!(
                src = %src.display(),
                dest = %dest.display(),
                error = %e,
                "hard link unavailable, copying instead"
            );
        }
    }

    copy_then_remove(src, dest, &metadata)
}

fn copy_then_remove(src: &Path, dest: &Path, metadata: &Metadata) -> MoveResult<MoveMethod> {
    let mut reader = File::open(src).map_err(|e| MoveError::SourceUnreadable {
        path: src.to_path_buf(),
        source: e,
    })?;

    // Exclusive create: losing a race here must not touch the winner's file.
    let writer = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dest)
        .map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => MoveError::DestinationExists(dest.to_path_buf()),
            _ => MoveError::CopyFailed {
                from: src.to_path_buf(),
                to: dest.to_path_buf(),
                source: e,
            },
        })?;

    if let Err(e) = stream_and_sync(&mut reader, writer, metadata) {
        let _ = fs::remove_file(dest);
        return Err(MoveError::CopyFailed {
            from: src.to_path_buf(),
            to: dest.to_path_buf(),
            source: e,
        });
    }

    if let Err(e) = fs::remove_file(src) {
        let _ = fs::remove_file(dest);
        return Err(MoveError::SourceRemovalFailed {
            path: src.to_path_buf(),
            source: e,
        });
    }

    Ok(MoveMethod::Copy)
}

fn stream_and_sync(reader: &mut File, writer: File, metadata: &Metadata) -> io::Result<()> {
    let mut buffered = BufWriter::with_capacity(COPY_BUFFER_SIZE, writer);
    io::copy(reader, &mut buffered)?;
    buffered.flush()?;
    let file = buffered.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;

    // Metadata is best-effort; the bytes are already durable.
    let _ = file.set_permissions(metadata.permissions());
    if let Ok(modified) = metadata.modified() {
        let _ = file.set_times(FileTimes::new().set_modified(modified));
    }
    Ok(())
}
