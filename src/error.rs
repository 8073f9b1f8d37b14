//! Error types for proc_interact.
//!
//! This module defines two main error categories:
//! - [`RequestError`]: Problems detected while building a [`Supervisor`](crate::Supervisor) -
//!   no OS process has been created
//! - [`RunError`]: Problems during `start()` / `run()` / `wait_for_exit()`

use std::fmt;
use thiserror::Error;

/// Lifecycle state of a supervised run.
///
/// Moves strictly forward: `Created -> Started -> Exited`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    /// Process object built, not yet spawned.
    Created,
    /// Process spawned and being monitored.
    Started,
    /// Process terminated and all of its output drained.
    Exited,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Created => write!(f, "created"),
            RunState::Started => write!(f, "started"),
            RunState::Exited => write!(f, "exited"),
        }
    }
}

/// Problem with an [`ExecutionRequest`](crate::ExecutionRequest), detected at construction.
///
/// All error messages are safe to log (argument values are never included).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// Arguments were supplied without an escaping capability
    #[error("{arg_count} argument(s) given but no escaper configured")]
    MissingEscaper { arg_count: usize },

    /// The escaper refused the argument list
    #[error("failed to escape arguments: {reason}")]
    EscapeFailed { reason: String },

    /// Executable does not exist
    #[error("executable not found: {path}")]
    NotFound { path: String },

    /// Failed to resolve the executable path
    #[error("failed to resolve executable {path}: {reason}")]
    ResolveFailed { path: String, reason: String },

    /// Executable path points to a directory
    #[error("executable path is a directory: {path}")]
    IsDirectory { path: String },

    /// Executable is not a regular file
    #[error("executable is not a regular file: {path}")]
    NotRegularFile { path: String },

    /// Executable lacks execute permission for the current user
    #[error("file is not executable: {path}")]
    NotExecutable { path: String },
}

/// Error while starting or monitoring the supervised process.
#[derive(Debug, Error)]
pub enum RunError {
    /// Operation not permitted in the current lifecycle state
    #[error("cannot {operation} a process that has already {state}; a supervisor must not execute twice")]
    InvalidState {
        operation: &'static str,
        state: RunState,
    },

    /// The shell wrapper spawned more than one child
    #[error("shell {shell_pid} has {} children ({children:?}), expected exactly one", children.len())]
    InvariantViolation { shell_pid: u32, children: Vec<u32> },

    /// `start()` was called outside of a tokio runtime
    #[error("no tokio runtime available to drive the process")]
    NoRuntime,

    /// Failed to spawn the shell wrapper
    #[error("failed to spawn process: {reason}")]
    SpawnFailed { reason: String },

    /// Failed to observe or reap process termination
    #[error("failed to wait for process: {reason}")]
    Wait { reason: String },

    /// The input handler panicked; the process group was killed
    #[error("input handler panicked: {reason}")]
    HandlerPanicked { reason: String },

    /// The run was cancelled and the process group killed
    #[error("run cancelled; process was killed")]
    Cancelled,
}

/// Combined error type for the construct-and-run flow.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Run(#[from] RunError),
}
