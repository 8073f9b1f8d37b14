//! Execution record produced once a supervised process has exited.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Processor time consumed by the process and the children it reaped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    /// Time spent in user mode.
    pub user: Duration,

    /// Time spent in kernel mode.
    pub kernel: Duration,
}

impl CpuTimes {
    /// User plus kernel time.
    pub fn total(&self) -> Duration {
        self.user + self.kernel
    }
}

/// Peak memory counters, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryPeaks {
    /// Largest `VmRSS + VmSwap` seen across poll samples.
    ///
    /// The kernel keeps no peak for this sum, so a spike between two polls
    /// is not captured. It is a lower bound on the true peak.
    pub paged: u64,

    /// Peak virtual address space size.
    pub virtual_memory: u64,

    /// Peak resident set ("working set").
    pub working_set: u64,
}

impl MemoryPeaks {
    /// Per-field maximum of two readings.
    pub fn max(self, other: MemoryPeaks) -> MemoryPeaks {
        MemoryPeaks {
            paged: self.paged.max(other.paged),
            virtual_memory: self.virtual_memory.max(other.virtual_memory),
            working_set: self.working_set.max(other.working_set),
        }
    }
}

/// Immutable snapshot of a finished run.
///
/// Carries no OS handles and can be cloned and shared freely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub(crate) output: String,
    pub(crate) exit_code: i32,
    pub(crate) start_time: DateTime<Utc>,
    pub(crate) exit_time: DateTime<Utc>,
    pub(crate) cpu: CpuTimes,
    pub(crate) memory: MemoryPeaks,
}

impl ExecutionResult {
    /// Interleaved stdout and stderr lines, joined with `\n`.
    pub fn combined_output(&self) -> &str {
        &self.output
    }

    /// Exit code of the process (`128 + signal` if it was killed by a signal).
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// Check if the process exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// When the process was spawned.
    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// When termination was observed.
    pub fn exit_time(&self) -> DateTime<Utc> {
        self.exit_time
    }

    /// Wall-clock time between start and exit.
    pub fn elapsed(&self) -> Duration {
        (self.exit_time - self.start_time)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Time spent in kernel mode.
    pub fn kernel_time(&self) -> Duration {
        self.cpu.kernel
    }

    /// Time spent in user mode.
    pub fn user_time(&self) -> Duration {
        self.cpu.user
    }

    /// Kernel plus user time.
    pub fn total_cpu_time(&self) -> Duration {
        self.cpu.total()
    }

    /// Peak pageable memory in bytes.
    pub fn peak_paged_memory(&self) -> u64 {
        self.memory.paged
    }

    /// Peak virtual memory in bytes.
    pub fn peak_virtual_memory(&self) -> u64 {
        self.memory.virtual_memory
    }

    /// Peak working set in bytes.
    pub fn peak_working_set(&self) -> u64 {
        self.memory.working_set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_max_is_per_field() {
        let a = MemoryPeaks {
            paged: 10,
            virtual_memory: 5,
            working_set: 7,
        };
        let b = MemoryPeaks {
            paged: 3,
            virtual_memory: 9,
            working_set: 7,
        };
        let m = a.max(b);
        assert_eq!(m.paged, 10);
        assert_eq!(m.virtual_memory, 9);
        assert_eq!(m.working_set, 7);
    }

    #[test]
    fn test_paged_keeps_largest_sample() {
        // rss + swap per poll; the drop after the spike must not lower the peak
        let samples = [(800, 0), (900, 300), (400, 100)];
        let peak = samples
            .iter()
            .fold(MemoryPeaks::default(), |acc, &(rss, swap)| {
                acc.max(MemoryPeaks {
                    paged: rss + swap,
                    ..MemoryPeaks::default()
                })
            });
        assert_eq!(peak.paged, 1200);
    }

    #[test]
    fn test_accessors() {
        let start = Utc::now();
        let result = ExecutionResult {
            output: "a\nb".to_string(),
            exit_code: 3,
            start_time: start,
            exit_time: start + chrono::Duration::milliseconds(250),
            cpu: CpuTimes {
                user: Duration::from_millis(30),
                kernel: Duration::from_millis(20),
            },
            memory: MemoryPeaks::default(),
        };

        assert_eq!(result.combined_output(), "a\nb");
        assert!(!result.success());
        assert_eq!(result.elapsed(), Duration::from_millis(250));
        assert_eq!(result.total_cpu_time(), Duration::from_millis(50));
    }
}
