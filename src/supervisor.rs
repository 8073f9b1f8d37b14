//! Supervised execution of one process.
//!
//! [`Supervisor`] is the only type that spawns processes. Construction validates
//! the request and builds the wrapped command; `start()` spawns it; the poll loop
//! in `wait_for_exit()` samples memory, detects input requests and watches for
//! termination until the process exits.

use crate::buffer::{OutputBuffer, OutputPipeline, SharedBuffer};
use crate::canonical::resolve_executable;
use crate::detector::{InputDetector, InputHandler, Observation};
use crate::error::{RequestError, RunError, RunState};
use crate::file_check::check_executable;
use crate::introspect::{self, LinuxIntrospector, ProcessIntrospector};
use crate::options::SupervisorOptions;
use crate::output::{CpuTimes, ExecutionResult, MemoryPeaks};
use crate::request::ExecutionRequest;
use crate::sampler::ResourceSampler;
use chrono::{DateTime, Utc};
use std::fmt;
use std::os::unix::io::AsRawFd;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, ChildStdin, Command};
use tokio::runtime::{Runtime, RuntimeFlavor};
use tokio_util::sync::CancellationToken;

/// Runs one executable under a shell wrapper and monitors it until exit.
///
/// A supervisor executes at most once: `Created -> Started -> Exited`.
///
/// # Example
///
/// ```rust,no_run
/// use proc_interact::{ExecutionRequest, InputDisposition, InputSink, PosixEscaper, Supervisor};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let request = ExecutionRequest::new("/usr/local/bin/ask-name")
///     .arg("--greeting")
///     .arg("Hello")
///     .escaper(PosixEscaper);
///
/// let mut supervisor = Supervisor::new(request)?;
/// supervisor.on_input_requested(|output: &str, input: &mut InputSink| {
///     if output.ends_with("Name?") {
///         input.write_line("Ada");
///         InputDisposition::Handled
///     } else {
///         InputDisposition::Ignored
///     }
/// })?;
///
/// let result = supervisor.run().await?;
/// println!("{} (exit {})", result.combined_output(), result.exit_code());
/// # Ok(())
/// # }
/// ```
pub struct Supervisor {
    executable: PathBuf,
    command: Command,
    options: SupervisorOptions,
    handler: Option<Box<dyn InputHandler>>,
    introspector: Option<Box<dyn ProcessIntrospector>>,
    cancel: CancellationToken,
    state: RunState,
    pid: Option<u32>,
    running: Option<Running>,
    result: Option<ExecutionResult>,
}

impl Supervisor {
    /// Validate `request` and build the process with default options.
    ///
    /// No OS process is created.
    ///
    /// # Errors
    ///
    /// - `RequestError::MissingEscaper` if arguments were given without an escaper
    /// - `RequestError::EscapeFailed` if the escaper rejected the arguments
    /// - `RequestError::NotFound` if the executable does not exist
    /// - `RequestError::IsDirectory`, `NotRegularFile`, `NotExecutable` if the
    ///   path cannot be executed
    pub fn new(request: ExecutionRequest) -> Result<Self, RequestError> {
        Self::with_options(request, SupervisorOptions::default())
    }

    /// Validate `request` and build the process with explicit options.
    ///
    /// # Errors
    ///
    /// Same as [`Supervisor::new`].
    pub fn with_options(
        request: ExecutionRequest,
        options: SupervisorOptions,
    ) -> Result<Self, RequestError> {
        let ExecutionRequest {
            executable,
            args,
            escaper,
            cwd,
            env,
        } = request;

        let escaped = match escaper {
            _ if args.is_empty() => String::new(),
            Some(escaper) => escaper
                .escape(&args)
                .map_err(|e| RequestError::EscapeFailed {
                    reason: e.reason().to_string(),
                })?,
            None => {
                return Err(RequestError::MissingEscaper {
                    arg_count: args.len(),
                })
            }
        };

        let executable = resolve_executable(&executable, cwd.as_deref())?;
        check_executable(&executable)?;

        let mut command = Command::new(&options.shell.program);
        command
            .args(options.shell.argv(&executable, &escaped))
            .envs(&env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            // The script redirects stderr onto stdout before anything runs
            .stderr(Stdio::null())
            .process_group(0);
        if let Some(cwd) = &cwd {
            command.current_dir(cwd);
        }

        tracing::debug!(
            executable = %executable.display(),
            args = args.len(),
            shell = %options.shell.program.display(),
            "process prepared"
        );

        Ok(Self {
            executable,
            command,
            options,
            handler: None,
            introspector: None,
            cancel: CancellationToken::new(),
            state: RunState::Created,
            pid: None,
            running: None,
            result: None,
        })
    }

    /// Replace the OS introspection capability (mainly useful for testing).
    pub fn with_introspector(mut self, introspector: impl ProcessIntrospector + 'static) -> Self {
        self.introspector = Some(Box::new(introspector));
        self
    }

    /// Register the callback invoked whenever the process waits for console input.
    ///
    /// Without a handler, standard input is not connected and input requests
    /// are not detected.
    ///
    /// # Errors
    ///
    /// `RunError::InvalidState` once the process has been started.
    pub fn on_input_requested(
        &mut self,
        handler: impl InputHandler + 'static,
    ) -> Result<(), RunError> {
        if self.state != RunState::Created {
            return Err(RunError::InvalidState {
                operation: "register an input handler on",
                state: self.state,
            });
        }
        self.handler = Some(Box::new(handler));
        Ok(())
    }

    /// Token that aborts the run when cancelled.
    ///
    /// Cancelling kills the whole process group and makes the pending
    /// `run()` / `wait_for_exit()` return `RunError::Cancelled`.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Check if the process has been spawned.
    pub fn has_started(&self) -> bool {
        self.state != RunState::Created
    }

    /// Check if the process has terminated.
    pub fn has_exited(&self) -> bool {
        self.state == RunState::Exited
    }

    /// Resolved path of the executable.
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Pid of the shell wrapper, which is also its process group id.
    ///
    /// `None` until the process has been started.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Result of the completed run, if it finished normally.
    pub fn result(&self) -> Option<&ExecutionResult> {
        self.result.as_ref()
    }

    /// Spawn the process without waiting for it.
    ///
    /// Output capture begins immediately.
    ///
    /// # Errors
    ///
    /// - `RunError::InvalidState` if already started or exited
    /// - `RunError::NoRuntime` if called outside a tokio runtime
    /// - `RunError::SpawnFailed` if the shell could not be spawned
    pub fn start(&mut self) -> Result<(), RunError> {
        if self.state != RunState::Created {
            return Err(RunError::InvalidState {
                operation: "start",
                state: self.state,
            });
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(RunError::NoRuntime);
        }

        let interactive = self.handler.is_some();
        if interactive {
            self.command.stdin(Stdio::piped());
        }

        let start_time = Utc::now();
        let mut child = self.command.spawn().map_err(|e| RunError::SpawnFailed {
            reason: e.to_string(),
        })?;

        // From here on, dropping `Running` kills the group
        let pid = match child.id() {
            Some(pid) => pid,
            None => {
                return Err(RunError::SpawnFailed {
                    reason: "process exited before its pid was read".to_string(),
                })
            }
        };
        let stdout = child.stdout.take();
        let stdin = child.stdin.take();

        let buffer = OutputBuffer::shared(interactive);
        let mut running = Running {
            child,
            pid,
            stdin,
            buffer: buffer.clone(),
            pipeline: None,
            detector: self.handler.take().map(|h| InputDetector::new(pid, h)),
            start_time,
            reaped: false,
        };

        let Some(stdout) = stdout else {
            return Err(RunError::SpawnFailed {
                reason: "stdout was not captured".to_string(),
            });
        };
        running.pipeline = Some(OutputPipeline::spawn(
            stdout,
            buffer,
            self.options.output_capacity,
        ));

        tracing::debug!(
            pid,
            executable = %self.executable.display(),
            interactive,
            "process started"
        );

        self.running = Some(running);
        self.pid = Some(pid);
        self.state = RunState::Started;
        Ok(())
    }

    /// Start the process if needed and monitor it until it exits.
    ///
    /// # Errors
    ///
    /// - `RunError::InvalidState` if the process already exited
    /// - `RunError::InvariantViolation` if the shell spawned more than one child
    /// - `RunError::Cancelled` if the cancellation token fired
    /// - `RunError::HandlerPanicked` if the input handler panicked
    /// - any error from [`Supervisor::start`]
    pub async fn run(&mut self) -> Result<ExecutionResult, RunError> {
        self.finish("run").await
    }

    /// Wait for a started process to exit, starting it first if needed.
    ///
    /// # Errors
    ///
    /// Same as [`Supervisor::run`].
    pub async fn wait_for_exit(&mut self) -> Result<ExecutionResult, RunError> {
        self.finish("wait for").await
    }

    /// Blocking variant of [`Supervisor::run`].
    ///
    /// Reuses the ambient runtime if it is multi-threaded. Otherwise the run is
    /// driven by a private current-thread runtime, because a blocked
    /// current-thread runtime cannot make progress on its own timers and pipes.
    ///
    /// # Errors
    ///
    /// Same as [`Supervisor::run`], plus `RunError::SpawnFailed` if the private
    /// runtime cannot be built.
    pub fn run_sync(&mut self) -> Result<ExecutionResult, RunError> {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() != RuntimeFlavor::CurrentThread => {
                std::thread::scope(|s| s.spawn(|| handle.block_on(self.run())).join())
                    .map_err(|_| supervisor_thread_panicked())?
            }
            // A runtime cannot be started on a thread already inside one
            Ok(_) => std::thread::scope(|s| {
                s.spawn(|| private_runtime()?.block_on(self.run())).join()
            })
            .map_err(|_| supervisor_thread_panicked())?,
            Err(_) => private_runtime()?.block_on(self.run()),
        }
    }

    async fn finish(&mut self, operation: &'static str) -> Result<ExecutionResult, RunError> {
        match self.state {
            RunState::Created => self.start()?,
            RunState::Started => {}
            RunState::Exited => {
                return Err(RunError::InvalidState {
                    operation,
                    state: RunState::Exited,
                })
            }
        }

        let Some(mut running) = self.running.take() else {
            // A previous wait was dropped mid-way; its Running killed the group
            self.state = RunState::Exited;
            return Err(RunError::Wait {
                reason: "an earlier wait was abandoned and the process was killed".to_string(),
            });
        };

        let outcome = match self.monitor(&mut running).await {
            Ok(exit) => {
                running
                    .collect(exit, &self.cancel, self.options.drain_timeout)
                    .await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = &outcome {
            tracing::debug!(pid = running.pid, error = %e, "run aborted; killing process group");
            running.abort(self.options.drain_timeout).await;
        }
        self.state = RunState::Exited;

        let result = outcome?;
        self.result = Some(result.clone());
        Ok(result)
    }

    /// The poll loop. Returns once termination has been observed, leaving the
    /// process unreaped so its CPU times can still be read.
    async fn monitor(&mut self, running: &mut Running) -> Result<Exit, RunError> {
        let introspector = self
            .introspector
            .get_or_insert_with(|| Box::new(LinuxIntrospector::new()) as Box<dyn ProcessIntrospector>);
        let mut sampler = ResourceSampler::new();
        let mut polling = true;
        let mut exit_visible = true;

        loop {
            if self.cancel.is_cancelled() {
                return Err(RunError::Cancelled);
            }

            match introspect::peek_exit(running.pid) {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(pid = running.pid, error = %e, "cannot peek at exit status; waiting instead");
                    exit_visible = false;
                    break;
                }
            }

            if polling {
                let pids = running.watched_pids();
                sampler.sample(&mut **introspector, &pids);

                if let Some(detector) = running.detector.as_mut() {
                    let pending = input_pending(running.stdin.as_ref());
                    match detector.observe(&mut **introspector, pending)? {
                        Observation::Idle => {}
                        Observation::AwaitingInput => {
                            detector
                                .dispatch(&running.buffer, &mut running.stdin, &self.cancel)
                                .await?;
                        }
                        Observation::Stop => polling = false,
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.options.poll_interval) => {}
                _ = self.cancel.cancelled() => return Err(RunError::Cancelled),
            }
        }

        let exit_time = Utc::now();
        if let Some(detector) = running.detector.as_mut() {
            detector.on_parent_exit();
        }

        let cpu = if exit_visible {
            match introspector.cpu_times(running.pid) {
                Ok(cpu) => cpu,
                Err(e) => {
                    tracing::debug!(pid = running.pid, error = %e, "cpu times unavailable");
                    CpuTimes::default()
                }
            }
        } else {
            CpuTimes::default()
        };

        tracing::trace!(pid = running.pid, samples = sampler.samples(), "poll loop finished");
        Ok(Exit {
            time: exit_time,
            cpu,
            memory: sampler.peaks(),
        })
    }
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("executable", &self.executable)
            .field("state", &self.state)
            .field("pid", &self.pid())
            .field("interactive", &self.handler.is_some())
            .finish_non_exhaustive()
    }
}

/// What the poll loop learned before the process was reaped.
struct Exit {
    time: DateTime<Utc>,
    cpu: CpuTimes,
    memory: MemoryPeaks,
}

/// OS resources of a started process.
///
/// Dropping it before the process has been reaped kills the process group.
struct Running {
    child: Child,
    pid: u32,
    stdin: Option<ChildStdin>,
    buffer: SharedBuffer,
    pipeline: Option<OutputPipeline>,
    detector: Option<InputDetector>,
    start_time: DateTime<Utc>,
    reaped: bool,
}

impl Running {
    fn watched_pids(&self) -> Vec<u32> {
        let mut pids = vec![self.pid];
        if let Some(child) = self.detector.as_ref().and_then(|d| d.child()) {
            pids.push(child.pid);
        }
        pids
    }

    async fn reap(&mut self) -> Result<ExitStatus, RunError> {
        let status = self.child.wait().await.map_err(|e| RunError::Wait {
            reason: e.to_string(),
        })?;
        self.reaped = true;
        Ok(status)
    }

    async fn drain(&mut self, timeout: Duration) {
        self.stdin = None;
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.drain(timeout).await;
        }
    }

    /// Reap, drain, and assemble the result.
    async fn collect(
        &mut self,
        exit: Exit,
        cancel: &CancellationToken,
        drain_timeout: Duration,
    ) -> Result<ExecutionResult, RunError> {
        let status = tokio::select! {
            status = self.reap() => status?,
            _ = cancel.cancelled() => return Err(RunError::Cancelled),
        };
        self.drain(drain_timeout).await;

        let (output, lines) = {
            let mut buffer = self.buffer.lock();
            let lines = buffer.line_count();
            (buffer.take_combined(), lines)
        };
        let exit_code = exit_code(status);
        let handler_calls = self.detector.as_ref().map_or(0, |d| d.invocations());

        tracing::debug!(
            pid = self.pid,
            exit_code,
            lines,
            handler_calls,
            elapsed_ms = (exit.time - self.start_time).num_milliseconds(),
            "process exited"
        );

        Ok(ExecutionResult {
            output,
            exit_code,
            start_time: self.start_time,
            exit_time: exit.time,
            cpu: exit.cpu,
            memory: exit.memory,
        })
    }

    /// Kill the group, reap the shell, and drain whatever output remains.
    async fn abort(&mut self, drain_timeout: Duration) {
        if !self.reaped {
            if let Err(e) = introspect::kill_group(self.pid) {
                tracing::warn!(pid = self.pid, error = %e, "failed to kill process group");
            }
            if let Err(e) = self.reap().await {
                tracing::warn!(pid = self.pid, error = %e, "failed to reap killed process");
            }
        }
        self.drain(drain_timeout).await;
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        if let Err(e) = introspect::kill_group(self.pid) {
            tracing::warn!(pid = self.pid, error = %e, "failed to kill process group on drop");
        }
        if let Some(pipeline) = &self.pipeline {
            pipeline.abort();
        }
    }
}

fn private_runtime() -> Result<Runtime, RunError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| RunError::SpawnFailed {
            reason: format!("failed to create runtime: {}", e),
        })
}

fn supervisor_thread_panicked() -> RunError {
    RunError::Wait {
        reason: "supervisor thread panicked".to_string(),
    }
}

fn input_pending(stdin: Option<&ChildStdin>) -> bool {
    match stdin {
        Some(stdin) => introspect::unread_bytes(stdin.as_raw_fd())
            .map(|n| n > 0)
            .unwrap_or(false),
        None => false,
    }
}

/// Process exit code, or `128 + signal` if it was killed by a signal.
fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}
