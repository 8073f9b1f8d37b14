//! Tuning knobs for a supervised run.

use crate::shell::ShellWrapper;
use std::time::Duration;

/// Options applied to a [`Supervisor`](crate::Supervisor).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorOptions {
    /// Idle wait between two poll cycles.
    ///
    /// Bounds the latency of input detection and the CPU spent polling.
    /// Default: 20 ms.
    pub poll_interval: Duration,

    /// Capacity, in lines, of the channel between the output reader and the buffer.
    ///
    /// When full, the reader stops pulling from the pipe until the buffer catches up.
    /// Default: 1024.
    pub output_capacity: usize,

    /// How long to wait for the output stream to close after the process exits.
    ///
    /// A grandchild that inherited the pipe can keep it open indefinitely.
    /// Default: 10 seconds.
    pub drain_timeout: Duration,

    /// Interpreter used to launch the target.
    pub shell: ShellWrapper,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(20),
            output_capacity: 1024,
            drain_timeout: Duration::from_secs(10),
            shell: ShellWrapper::default(),
        }
    }
}

impl SupervisorOptions {
    /// Set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the output channel capacity (at least one line).
    pub fn with_output_capacity(mut self, lines: usize) -> Self {
        self.output_capacity = lines.max(1);
        self
    }

    /// Set the drain timeout.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Set the shell wrapper.
    pub fn with_shell(mut self, shell: ShellWrapper) -> Self {
        self.shell = shell;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = SupervisorOptions::default();
        assert_eq!(options.poll_interval, Duration::from_millis(20));
        assert_eq!(options.output_capacity, 1024);
        assert_eq!(options.shell, ShellWrapper::default());
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let options = SupervisorOptions::default().with_output_capacity(0);
        assert_eq!(options.output_capacity, 1);
    }
}
