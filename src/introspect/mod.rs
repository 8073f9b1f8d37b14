//! Process introspection capability.
//!
//! The poll loop only needs four questions answered about a live process: who
//! are its direct children, is it blocked on console input, how much memory has
//! it peaked at, and how much CPU has it used. Each target OS answers them
//! differently, so they sit behind [`ProcessIntrospector`].

mod linux;

pub use linux::LinuxIntrospector;
pub(crate) use linux::{kill_group, peek_exit, unread_bytes};

use crate::output::{CpuTimes, MemoryPeaks};
use std::io;
use thiserror::Error;

/// Failure while inspecting a process.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IntrospectError {
    /// The process (or thread) disappeared; an expected race with exit.
    #[error("process {pid} no longer exists")]
    Gone { pid: u32 },

    /// Anything else
    #[error("failed to inspect process {pid}: {reason}")]
    Failed { pid: u32, reason: String },
}

impl IntrospectError {
    /// Classify an I/O error raised while inspecting `pid`.
    pub fn from_io(pid: u32, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound || err.raw_os_error() == Some(libc::ESRCH) {
            IntrospectError::Gone { pid }
        } else {
            IntrospectError::Failed {
                pid,
                reason: err.to_string(),
            }
        }
    }

    /// Check if this error only means the process has already exited.
    pub fn is_gone(&self) -> bool {
        matches!(self, IntrospectError::Gone { .. })
    }
}

/// OS-specific view of the process table.
pub trait ProcessIntrospector: Send {
    /// Pids whose parent is `pid`, in ascending order.
    ///
    /// Returns `Gone` if `pid` itself no longer exists.
    fn children_of(&mut self, pid: u32) -> Result<Vec<u32>, IntrospectError>;

    /// Check if any thread of `pid` is blocked waiting for console input.
    fn is_waiting_for_input(&mut self, pid: u32) -> Result<bool, IntrospectError>;

    /// Current peak memory counters of `pid`.
    fn memory_peaks(&mut self, pid: u32) -> Result<MemoryPeaks, IntrospectError>;

    /// CPU time used by `pid` and the children it has reaped.
    fn cpu_times(&mut self, pid: u32) -> Result<CpuTimes, IntrospectError>;
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scripted introspector for exercising the poll algorithms without real processes.

    use super::*;
    use std::collections::{HashMap, VecDeque};

    #[derive(Debug, Default)]
    pub(crate) struct FakeIntrospector {
        pub(crate) children: VecDeque<Result<Vec<u32>, IntrospectError>>,
        pub(crate) waiting: VecDeque<Result<bool, IntrospectError>>,
        pub(crate) memory: HashMap<u32, VecDeque<MemoryPeaks>>,
        pub(crate) cpu: CpuTimes,
        pub(crate) children_calls: usize,
        pub(crate) waiting_calls: usize,
    }

    impl ProcessIntrospector for FakeIntrospector {
        fn children_of(&mut self, pid: u32) -> Result<Vec<u32>, IntrospectError> {
            self.children_calls += 1;
            self.children.pop_front().unwrap_or(Err(IntrospectError::Gone { pid }))
        }

        fn is_waiting_for_input(&mut self, _pid: u32) -> Result<bool, IntrospectError> {
            self.waiting_calls += 1;
            self.waiting.pop_front().unwrap_or(Ok(false))
        }

        fn memory_peaks(&mut self, pid: u32) -> Result<MemoryPeaks, IntrospectError> {
            self.memory
                .get_mut(&pid)
                .and_then(|samples| samples.pop_front())
                .ok_or(IntrospectError::Gone { pid })
        }

        fn cpu_times(&mut self, _pid: u32) -> Result<CpuTimes, IntrospectError> {
            Ok(self.cpu)
        }
    }
}
