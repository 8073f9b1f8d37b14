//! Linux implementation backed by `sysinfo` and procfs.

use super::{IntrospectError, ProcessIntrospector};
use crate::output::{CpuTimes, MemoryPeaks};
use std::fs;
use std::io;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Kernel wait channels of a task sleeping in a read on a pipe or terminal.
///
/// Only consulted when `/proc/<pid>/task/<tid>/syscall` is not readable.
const READ_WAIT_CHANNELS: &[&str] = &["pipe_read", "anon_pipe_read", "pipe_wait", "n_tty_read"];

/// Process introspection for Linux.
///
/// Children are found through a `sysinfo` process-table refresh. Thread wait
/// states, memory peaks and CPU times come straight from procfs: a thread is
/// considered to be waiting for input when it sleeps inside `read(0, ...)`.
pub struct LinuxIntrospector {
    system: System,
    proc_root: PathBuf,
    clock_ticks: u64,
}

impl LinuxIntrospector {
    /// Create an introspector reading `/proc`.
    pub fn new() -> Self {
        Self::with_proc_root("/proc")
    }

    /// Create an introspector reading a procfs mounted elsewhere.
    pub fn with_proc_root(root: impl Into<PathBuf>) -> Self {
        // SAFETY: sysconf only reads a configuration value.
        let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        Self {
            system: System::new(),
            proc_root: root.into(),
            clock_ticks: if ticks > 0 { ticks as u64 } else { 100 },
        }
    }

    fn task_dir(&self, pid: u32) -> PathBuf {
        self.proc_root.join(pid.to_string()).join("task")
    }

    fn thread_waits_on_stdin(&self, task: &Path) -> io::Result<bool> {
        let stat = fs::read_to_string(task.join("stat"))?;
        let state = parse_stat(&stat).map(|s| s.state);
        if state != Some('S') {
            return Ok(false);
        }

        match fs::read_to_string(task.join("syscall")) {
            Ok(text) => Ok(parse_syscall(&text).is_some_and(|call| call.is_stdin_read())),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                let wchan = fs::read_to_string(task.join("wchan"))?;
                Ok(READ_WAIT_CHANNELS.contains(&wchan.trim()))
            }
            Err(e) => Err(e),
        }
    }

    fn ticks_to_duration(&self, ticks: u64) -> Duration {
        let nanos = u128::from(ticks) * 1_000_000_000 / u128::from(self.clock_ticks);
        Duration::from_nanos(nanos.min(u128::from(u64::MAX)) as u64)
    }
}

impl Default for LinuxIntrospector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LinuxIntrospector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinuxIntrospector")
            .field("proc_root", &self.proc_root)
            .field("clock_ticks", &self.clock_ticks)
            .finish()
    }
}

impl ProcessIntrospector for LinuxIntrospector {
    fn children_of(&mut self, pid: u32) -> Result<Vec<u32>, IntrospectError> {
        let parent = Pid::from_u32(pid);
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing(),
        );

        if self.system.process(parent).is_none() {
            return Err(IntrospectError::Gone { pid });
        }

        let mut children: Vec<u32> = self
            .system
            .processes()
            .iter()
            .filter(|(_, process)| process.parent() == Some(parent))
            .filter(|(_, process)| process.thread_kind().is_none())
            .map(|(child, _)| child.as_u32())
            .collect();
        children.sort_unstable();
        Ok(children)
    }

    fn is_waiting_for_input(&mut self, pid: u32) -> Result<bool, IntrospectError> {
        let tasks = fs::read_dir(self.task_dir(pid)).map_err(|e| IntrospectError::from_io(pid, e))?;

        for entry in tasks {
            let entry = entry.map_err(|e| IntrospectError::from_io(pid, e))?;
            match self.thread_waits_on_stdin(&entry.path()) {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                // Thread exited between listing and reading
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(IntrospectError::from_io(pid, e)),
            }
        }
        Ok(false)
    }

    fn memory_peaks(&mut self, pid: u32) -> Result<MemoryPeaks, IntrospectError> {
        let path = self.proc_root.join(pid.to_string()).join("status");
        let status = fs::read_to_string(path).map_err(|e| IntrospectError::from_io(pid, e))?;
        Ok(parse_status(&status))
    }

    fn cpu_times(&mut self, pid: u32) -> Result<CpuTimes, IntrospectError> {
        let path = self.proc_root.join(pid.to_string()).join("stat");
        let stat = fs::read_to_string(path).map_err(|e| IntrospectError::from_io(pid, e))?;
        let fields = parse_stat(&stat).ok_or_else(|| IntrospectError::Failed {
            pid,
            reason: "malformed stat line".to_string(),
        })?;

        Ok(CpuTimes {
            user: self.ticks_to_duration(fields.utime + fields.cutime),
            kernel: self.ticks_to_duration(fields.stime + fields.cstime),
        })
    }
}

/// Fields of `/proc/<pid>/stat` used here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StatFields {
    state: char,
    utime: u64,
    stime: u64,
    cutime: u64,
    cstime: u64,
}

/// Parse a stat line. The command name may contain spaces and parentheses,
/// so fields are counted from the last `)`.
fn parse_stat(line: &str) -> Option<StatFields> {
    let rest = &line[line.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();

    // fields[0] is field 3 (state); utime is field 14
    let num = |i: usize| -> Option<u64> {
        let raw = fields.get(i)?;
        // cutime/cstime are signed in the kernel ABI
        raw.parse::<i64>().ok().map(|v| v.max(0) as u64)
    };

    Some(StatFields {
        state: fields.first()?.chars().next()?,
        utime: num(11)?,
        stime: num(12)?,
        cutime: num(13)?,
        cstime: num(14)?,
    })
}

/// Syscall a sleeping task is blocked in, from `/proc/<pid>/task/<tid>/syscall`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BlockedSyscall {
    number: i64,
    first_arg: u64,
}

impl BlockedSyscall {
    fn is_stdin_read(&self) -> bool {
        self.number == libc::SYS_read as i64 && self.first_arg == 0
    }
}

/// Returns `None` for `running` and for tasks outside any syscall (`-1 ...`).
fn parse_syscall(text: &str) -> Option<BlockedSyscall> {
    let mut parts = text.split_whitespace();
    let number: i64 = parts.next()?.parse().ok()?;
    if number < 0 {
        return None;
    }
    let arg = parts.next()?;
    let first_arg = u64::from_str_radix(arg.trim_start_matches("0x"), 16).ok()?;
    Some(BlockedSyscall { number, first_arg })
}

/// Extract peak counters from `/proc/<pid>/status`.
///
/// A zombie has no `Vm*` lines and yields zeros.
fn parse_status(status: &str) -> MemoryPeaks {
    let mut peak_virtual = 0;
    let mut hwm = 0;
    let mut rss = 0;
    let mut swap = 0;

    for line in status.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let target = match key {
            "VmPeak" => &mut peak_virtual,
            "VmHWM" => &mut hwm,
            "VmRSS" => &mut rss,
            "VmSwap" => &mut swap,
            _ => continue,
        };
        *target = parse_kb(value).unwrap_or(0);
    }

    MemoryPeaks {
        paged: rss + swap,
        virtual_memory: peak_virtual,
        working_set: hwm,
    }
}

fn parse_kb(value: &str) -> Option<u64> {
    let number = value.split_whitespace().next()?;
    number.parse::<u64>().ok().map(|kb| kb * 1024)
}

/// Check, without reaping it, whether our child `pid` has terminated.
///
/// Leaves the zombie in place so its final CPU counters can still be read.
pub(crate) fn peek_exit(pid: u32) -> io::Result<bool> {
    loop {
        // SAFETY: siginfo_t is plain data; zeroed is a valid initial value.
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        // SAFETY: info is a valid, writable siginfo_t.
        let rc = unsafe {
            libc::waitid(
                libc::P_PID,
                pid as libc::id_t,
                &mut info,
                libc::WEXITED | libc::WNOHANG | libc::WNOWAIT,
            )
        };
        if rc == 0 {
            // SAFETY: waitid filled info (or left it zeroed when nothing changed).
            return Ok(unsafe { info.si_pid() } != 0);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Bytes written to a pipe that its reader has not consumed yet.
pub(crate) fn unread_bytes(fd: RawFd) -> io::Result<usize> {
    let mut pending: libc::c_int = 0;
    // SAFETY: FIONREAD writes one c_int through the pointer.
    let rc = unsafe { libc::ioctl(fd, libc::FIONREAD, &mut pending as *mut libc::c_int) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(pending.max(0) as usize)
}

/// Send SIGKILL to every process in group `pgid`.
pub(crate) fn kill_group(pgid: u32) -> io::Result<()> {
    // SAFETY: killpg has no memory-safety preconditions.
    let rc = unsafe { libc::killpg(pgid as libc::pid_t, libc::SIGKILL) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        return Err(err);
    }
    Ok(())
}
