//! File type and permission checks for the target executable.

use crate::error::RequestError;
use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Check that a resolved path points to something the shell can execute.
///
/// This function verifies:
/// 1. Path points to a regular file (not directory, device, socket, etc.)
/// 2. File is executable by the current user
///
/// # Errors
///
/// - `IsDirectory` if path is a directory
/// - `NotRegularFile` if path is not a regular file
/// - `NotExecutable` if file is not executable
pub fn check_executable(path: &Path) -> Result<(), RequestError> {
    let path_str = path.display().to_string();

    let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => RequestError::NotFound {
            path: path_str.clone(),
        },
        _ => RequestError::ResolveFailed {
            path: path_str.clone(),
            reason: e.to_string(),
        },
    })?;

    if metadata.is_dir() {
        return Err(RequestError::IsDirectory { path: path_str });
    }

    if !metadata.is_file() {
        return Err(RequestError::NotRegularFile { path: path_str });
    }

    if !is_executable(&metadata) {
        return Err(RequestError::NotExecutable { path: path_str });
    }

    Ok(())
}

/// Check if a file is executable by the current user.
fn is_executable(metadata: &Metadata) -> bool {
    let mode = metadata.permissions().mode();

    // SAFETY: getuid/getgid cannot fail and touch no memory.
    let uid = unsafe { libc::getuid() };
    let gid = unsafe { libc::getgid() };

    if uid == 0 {
        return (mode & 0o111) != 0;
    }

    if uid == metadata.uid() {
        return (mode & 0o100) != 0;
    }

    if gid == metadata.gid() {
        return (mode & 0o010) != 0;
    }

    (mode & 0o001) != 0
}
