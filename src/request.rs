//! Execution request.

use crate::escape::ArgEscaper;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// What the caller wants to run.
///
/// It is validated by [`Supervisor::new`](crate::Supervisor::new) before any
/// process is created.
#[derive(Clone, Default)]
pub struct ExecutionRequest {
    /// Path to the executable.
    ///
    /// Relative paths are resolved against `cwd` (or the current directory).
    pub executable: PathBuf,

    /// Arguments passed to the executable, in order.
    pub args: Vec<String>,

    /// Escaping capability for `args`.
    ///
    /// Required whenever `args` is non-empty.
    pub escaper: Option<Arc<dyn ArgEscaper>>,

    /// Working directory for the process.
    ///
    /// If `None`, the current directory is inherited.
    pub cwd: Option<PathBuf>,

    /// Extra environment variables, applied on top of the inherited environment.
    pub env: HashMap<String, String>,
}

impl ExecutionRequest {
    /// Create a request for an executable with no arguments.
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            ..Self::default()
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the escaping capability.
    pub fn escaper(mut self, escaper: impl ArgEscaper + 'static) -> Self {
        self.escaper = Some(Arc::new(escaper));
        self
    }

    /// Set the working directory.
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add a single environment variable.
    pub fn env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add several environment variables.
    pub fn envs(mut self, env: HashMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }
}

impl fmt::Debug for ExecutionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionRequest")
            .field("executable", &self.executable)
            .field("args", &self.args.len())
            .field("escaper", &self.escaper.is_some())
            .field("cwd", &self.cwd)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escape::PosixEscaper;

    #[test]
    fn test_builder_accumulates() {
        let request = ExecutionRequest::new("/bin/echo")
            .arg("a")
            .args(["b", "c"])
            .escaper(PosixEscaper)
            .cwd("/tmp")
            .env_var("K", "V");

        assert_eq!(request.args, vec!["a", "b", "c"]);
        assert!(request.escaper.is_some());
        assert_eq!(request.cwd, Some(PathBuf::from("/tmp")));
        assert_eq!(request.env.get("K"), Some(&"V".to_string()));
    }

    #[test]
    fn test_debug_hides_values() {
        let request = ExecutionRequest::new("/bin/echo")
            .arg("secret-token")
            .env_var("API_KEY", "hunter2");
        let debug = format!("{:?}", request);

        assert!(!debug.contains("secret-token"));
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("API_KEY"));
    }
}
