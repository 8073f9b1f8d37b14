//! Argument escaping capability.
//!
//! The supervisor always launches its target through a command interpreter, so the
//! argument list has to be flattened into one shell-safe string. How that is done is
//! a caller decision: there is no implicit default.

use thiserror::Error;

/// Error returned by an [`ArgEscaper`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct EscapeError {
    reason: String,
}

impl EscapeError {
    /// Create an error with a human-readable reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// The reason the arguments could not be escaped.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Strategy converting an argument list into one shell-safe command-line string.
///
/// Any `Fn(&[String]) -> String` closure is an escaper:
///
/// ```rust
/// use proc_interact::ArgEscaper;
///
/// let naive = |args: &[String]| args.join(" ");
/// assert_eq!(naive.escape(&["a".into(), "b".into()]).unwrap(), "a b");
/// ```
pub trait ArgEscaper: Send + Sync {
    /// Escape `args` so that the interpreter splits them back into the same words.
    fn escape(&self, args: &[String]) -> Result<String, EscapeError>;
}

impl<F> ArgEscaper for F
where
    F: Fn(&[String]) -> String + Send + Sync,
{
    fn escape(&self, args: &[String]) -> Result<String, EscapeError> {
        Ok(self(args))
    }
}

/// POSIX `sh` quoting.
///
/// Words that need it are wrapped in single quotes. Arguments containing NUL bytes
/// cannot be represented on a command line and are rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PosixEscaper;

impl ArgEscaper for PosixEscaper {
    fn escape(&self, args: &[String]) -> Result<String, EscapeError> {
        shlex::try_join(args.iter().map(String::as_str))
            .map_err(|e| EscapeError::new(e.to_string()))
    }
}
