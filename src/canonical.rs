//! Path resolution for the target executable.

use crate::error::RequestError;
use std::path::{Path, PathBuf};

/// Resolve an executable path to its canonical form.
///
/// This function:
/// 1. Joins relative paths onto `base` (the request's cwd, or the current directory)
/// 2. Resolves all symlinks using `std::fs::canonicalize`
///
/// # Errors
///
/// - `NotFound` if the path doesn't exist
/// - `ResolveFailed` for other resolution failures
pub fn resolve_executable(path: &Path, base: Option<&Path>) -> Result<PathBuf, RequestError> {
    let joined = match base {
        Some(base) if path.is_relative() => base.join(path),
        _ => path.to_path_buf(),
    };

    std::fs::canonicalize(&joined).map_err(|e| {
        let path_str = path.display().to_string();
        match e.kind() {
            std::io::ErrorKind::NotFound => RequestError::NotFound { path: path_str },
            _ => RequestError::ResolveFailed {
                path: path_str,
                reason: e.to_string(),
            },
        }
    })
}
