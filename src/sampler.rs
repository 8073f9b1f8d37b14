//! Peak memory tracking.

use crate::introspect::ProcessIntrospector;
use crate::output::MemoryPeaks;

/// Running per-field maximum of memory readings across poll cycles.
#[derive(Debug, Default)]
pub(crate) struct ResourceSampler {
    peaks: MemoryPeaks,
    samples: usize,
}

impl ResourceSampler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Read each pid once and fold the readings into the running peaks.
    ///
    /// Processes that have already exited are skipped.
    pub(crate) fn sample(&mut self, introspector: &mut dyn ProcessIntrospector, pids: &[u32]) {
        for &pid in pids {
            match introspector.memory_peaks(pid) {
                Ok(reading) => {
                    self.peaks = self.peaks.max(reading);
                    self.samples += 1;
                    tracing::trace!(
                        pid,
                        paged = reading.paged,
                        virtual_memory = reading.virtual_memory,
                        working_set = reading.working_set,
                        "memory sample"
                    );
                }
                Err(e) if e.is_gone() => {}
                Err(e) => tracing::debug!(pid, error = %e, "memory sample failed"),
            }
        }
    }

    pub(crate) fn peaks(&self) -> MemoryPeaks {
        self.peaks
    }

    pub(crate) fn samples(&self) -> usize {
        self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspect::fake::FakeIntrospector;
    use std::collections::VecDeque;

    fn reading(paged: u64, virtual_memory: u64, working_set: u64) -> MemoryPeaks {
        MemoryPeaks {
            paged,
            virtual_memory,
            working_set,
        }
    }

    #[test]
    fn test_peak_dominates_every_sample() {
        let readings = vec![
            reading(100, 900, 50),
            reading(400, 300, 20),
            reading(10, 1000, 80),
        ];
        let mut fake = FakeIntrospector::default();
        fake.memory.insert(7, VecDeque::from(readings.clone()));

        let mut sampler = ResourceSampler::new();
        for _ in 0..readings.len() {
            sampler.sample(&mut fake, &[7]);
        }

        let peaks = sampler.peaks();
        for r in &readings {
            assert!(peaks.paged >= r.paged);
            assert!(peaks.virtual_memory >= r.virtual_memory);
            assert!(peaks.working_set >= r.working_set);
        }
        assert_eq!(peaks, reading(400, 1000, 80));
    }

    #[test]
    fn test_shell_and_child_combined() {
        let mut fake = FakeIntrospector::default();
        fake.memory.insert(1, VecDeque::from(vec![reading(5, 50, 5)]));
        fake.memory.insert(2, VecDeque::from(vec![reading(7, 20, 9)]));

        let mut sampler = ResourceSampler::new();
        sampler.sample(&mut fake, &[1, 2]);

        assert_eq!(sampler.peaks(), reading(7, 50, 9));
        assert_eq!(sampler.samples(), 2);
    }

    #[test]
    fn test_gone_process_is_skipped() {
        let mut fake = FakeIntrospector::default();
        fake.memory.insert(1, VecDeque::from(vec![reading(1, 2, 3)]));

        let mut sampler = ResourceSampler::new();
        sampler.sample(&mut fake, &[1]);
        sampler.sample(&mut fake, &[1, 99]);

        assert_eq!(sampler.peaks(), reading(1, 2, 3));
        assert_eq!(sampler.samples(), 1);
    }
}
