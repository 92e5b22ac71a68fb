//! Filesystem path helpers.
//!
//! Joining, filename sanitizing, and making sure a file's parent directory
//! exists before anything is written to it.

use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{SyncError, SyncResult};

/// Characters that are not allowed in generated file and directory names.
pub const BAD_FILENAME_CHARS: &[char] = &['"', '\\', '/', '?', '<', '>', ':', '*', '|', '!'];

/// Upper bound on suffix attempts in [`dir_name_from_string`].
const MAX_NAME_ATTEMPTS: u32 = 9000;

/// Join a path segment onto a base directory.
///
/// Unlike [`Path::join`], a leading separator on `segment` does not replace
/// `base`: `path_combine("/inst", "/version.json")` is `/inst/version.json`.
pub fn path_combine(base: impl AsRef<Path>, segment: &str) -> PathBuf {
    let trimmed = segment.trim_start_matches(&['/', '\\'][..]);
    base.as_ref().join(trimmed)
}

/// Replace every character from [`BAD_FILENAME_CHARS`] with `replace_with`.
pub fn remove_invalid_filename_chars(text: &str, replace_with: char) -> String {
    text.chars()
        .map(|c| {
            if BAD_FILENAME_CHARS.contains(&c) {
                replace_with
            } else {
                c
            }
        })
        .collect()
}

/// Derive a directory name from free text that does not collide with an
/// existing entry in `in_dir`.
///
/// Invalid characters become `-`. If the name is taken, an increasing
/// counter is appended. Returns `None` once the counter passes 9000.
pub fn dir_name_from_string(text: &str, in_dir: &Path) -> Option<String> {
    let base = remove_invalid_filename_chars(text, '-');
    let mut candidate = base.clone();
    let mut num = 0;

    while in_dir.join(&candidate).exists() {
        num += 1;
        if num > MAX_NAME_ATTEMPTS {
            return None;
        }
        candidate = format!("{}{}", base, num);
    }

    Some(candidate)
}

/// Validate a relative path that came from remote content.
///
/// Rejects empty, absolute, and parent-escaping (`..`) paths so the result
/// can be joined onto a local root without leaving it.
pub fn sanitize_relative_path(text: &str) -> SyncResult<PathBuf> {
    if text.is_empty() {
        return Err(SyncError::InvalidPath("empty path".to_string()));
    }

    let normalized = text.replace('\\', "/");
    let mut result = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => result.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(SyncError::InvalidPath(text.to_string()));
            }
        }
    }

    if result.as_os_str().is_empty() {
        return Err(SyncError::InvalidPath(text.to_string()));
    }
    Ok(result)
}

/// Create the parent directory of `path` (and its ancestors) if missing.
pub fn ensure_parent_exists(path: &Path) -> SyncResult<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| SyncError::CreateDirFailed {
                path: parent.to_path_buf(),
                source: e,
            })
        }
        _ => Ok(()),
    }
}

/// Async variant of [`ensure_parent_exists`].
pub async fn ensure_parent_exists_async(path: &Path) -> SyncResult<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SyncError::CreateDirFailed {
                path: parent.to_path_buf(),
                source: e,
            }),
        _ => Ok(()),
    }
}
