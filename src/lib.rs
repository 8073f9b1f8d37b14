//! # proc_interact
//!
//! Interactive process supervisor.
//!
//! `proc_interact` runs one executable, captures its standard output and
//! standard error as a single interleaved stream of lines, notices when the
//! process blocks waiting for console input and lets a caller-supplied handler
//! answer it, and returns an execution record with exit code, timestamps, CPU
//! times and peak memory.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use proc_interact::{ExecutionRequest, InputDisposition, InputSink, PosixEscaper, Supervisor};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let request = ExecutionRequest::new("/usr/bin/python3")
//!     .args(["-c", "print(input('Name? '))"])
//!     .escaper(PosixEscaper);
//!
//! let mut supervisor = Supervisor::new(request)?;
//! supervisor.on_input_requested(|_output: &str, input: &mut InputSink| {
//!     input.write_line("Ada");
//!     InputDisposition::Handled
//! })?;
//!
//! let result = supervisor.run().await?;
//! println!("{}", result.combined_output());
//! println!("exit {} after {:?}", result.exit_code(), result.elapsed());
//! # Ok(())
//! # }
//! ```
//!
//! ## How it works
//!
//! - The target runs as the only child of `/bin/sh`, which folds stderr into
//!   stdout so both streams share one pipe and keep their relative order.
//! - Arguments are escaped by a caller-chosen [`ArgEscaper`]; the executable
//!   path itself never passes through the shell parser.
//! - The shell is placed in its own process group so cancellation can kill
//!   everything it started.
//! - A poll loop inspects `/proc` for the child's blocked syscall to decide
//!   whether it is waiting on stdin.
//!
//! ## Platform Support
//!
//! Linux only. Input-wait detection and peak memory rely on procfs.

#[cfg(not(target_os = "linux"))]
compile_error!(
    "proc_interact only supports Linux. \
     Input-wait detection and memory accounting read /proc; \
     other systems need their own ProcessIntrospector."
);

mod buffer;
mod canonical;
mod detector;
mod error;
mod escape;
mod file_check;
mod introspect;
mod options;
mod output;
mod request;
mod sampler;
mod shell;
mod supervisor;

// Public API
pub use detector::{InputDisposition, InputHandler, InputSink};
pub use error::{RequestError, RunError, RunState, SupervisorError};
pub use escape::{ArgEscaper, EscapeError, PosixEscaper};
pub use introspect::{IntrospectError, LinuxIntrospector, ProcessIntrospector};
pub use options::SupervisorOptions;
pub use output::{CpuTimes, ExecutionResult, MemoryPeaks};
pub use request::ExecutionRequest;
pub use shell::ShellWrapper;
pub use supervisor::Supervisor;
pub use tokio_util::sync::CancellationToken;
