//! Shell wrapping.
//!
//! The target never runs directly. It runs as the single child of a POSIX
//! interpreter so that standard error can be folded into standard output and
//! so that there is a distinct interactive child to inspect:
//!
//! ```text
//! /bin/sh -c 'exec 2>&1; "$0" <escaped args>; exit $?' /path/to/target
//! ```
//!
//! The executable travels as `$0`, so only the arguments pass through the
//! caller's escaper. The trailing `exit $?` keeps the shell from replacing
//! itself with the target and forwards the target's exit code.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Command interpreter used to launch the target.
///
/// Must understand POSIX `sh` syntax (`sh`, `dash`, `bash`, `zsh`, `ksh`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellWrapper {
    /// Interpreter binary.
    ///
    /// Default: `/bin/sh`.
    pub program: PathBuf,

    /// Arguments placed before the script text.
    ///
    /// Default: `["-c"]`.
    pub args: Vec<String>,
}

impl Default for ShellWrapper {
    fn default() -> Self {
        Self {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".to_string()],
        }
    }
}

impl ShellWrapper {
    /// Create a wrapper around another interpreter, using `-c`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Replace the interpreter arguments.
    pub fn with_args(mut self, args: &[&str]) -> Self {
        self.args = args.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Build the full argv (excluding the interpreter itself) for one run.
    pub(crate) fn argv(&self, executable: &Path, escaped_args: &str) -> Vec<OsString> {
        let mut argv: Vec<OsString> = self.args.iter().map(OsString::from).collect();
        argv.push(OsString::from(script(escaped_args)));
        argv.push(executable.as_os_str().to_os_string());
        argv
    }
}

/// Script text handed to the interpreter.
pub(crate) fn script(escaped_args: &str) -> String {
    if escaped_args.is_empty() {
        "exec 2>&1; \"$0\"; exit $?".to_string()
    } else {
        format!("exec 2>&1; \"$0\" {}; exit $?", escaped_args)
    }
}
