//! Input-request detection.
//!
//! Once per poll cycle the detector:
//! 1. finds the shell's single child (retried until it appears, abandoned if the
//!    shell exits first),
//! 2. asks whether any of the child's threads is blocked reading stdin,
//! 3. if so, hands the pending output and an input sink to the caller's handler.
//!
//! The handler runs on tokio's blocking pool so the output reader keeps draining,
//! but the poll loop awaits it: nothing else is sampled until it returns and its
//! input has been written to the child.

use crate::buffer::SharedBuffer;
use crate::error::RunError;
use crate::introspect::{IntrospectError, ProcessIntrospector};
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// What a handler did with an input request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputDisposition {
    /// Input was supplied; the output shown to the handler is considered consumed.
    Handled,

    /// Nothing was supplied; the same (possibly grown) output is offered again later.
    Ignored,
}

/// Callback invoked when the supervised process blocks on console input.
///
/// Receives the output produced since the last handled request and a sink
/// connected to the process's standard input. Any
/// `FnMut(&str, &mut InputSink) -> InputDisposition` closure is a handler.
pub trait InputHandler: Send {
    fn on_input_requested(&mut self, output: &str, input: &mut InputSink) -> InputDisposition;
}

impl<F> InputHandler for F
where
    F: FnMut(&str, &mut InputSink) -> InputDisposition + Send,
{
    fn on_input_requested(&mut self, output: &str, input: &mut InputSink) -> InputDisposition {
        self(output, input)
    }
}

/// Write-only channel to the process's standard input.
///
/// Everything written is delivered once the handler returns, before the poll
/// loop resumes.
#[derive(Debug, Default)]
pub struct InputSink {
    data: Vec<u8>,
    close: bool,
}

impl InputSink {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue `text` followed by a newline.
    pub fn write_line(&mut self, text: &str) {
        self.data.extend_from_slice(text.as_bytes());
        self.data.push(b'\n');
    }

    /// Queue `text` as-is.
    pub fn write_str(&mut self, text: &str) {
        self.data.extend_from_slice(text.as_bytes());
    }

    /// Close standard input after delivering what was queued.
    ///
    /// The process sees end-of-file on its next read.
    pub fn close(&mut self) {
        self.close = true;
    }

    /// Bytes queued so far.
    pub fn queued(&self) -> &[u8] {
        &self.data
    }
}

impl io::Write for InputSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Non-owning reference to the shell's child. Its disappearance is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChildHandle {
    pub(crate) pid: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChildSlot {
    Searching,
    Found(ChildHandle),
    Abandoned,
}

/// Result of one detection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Observation {
    /// Nothing to do this cycle.
    Idle,
    /// The child is blocked on stdin and no unread input is queued for it.
    AwaitingInput,
    /// Introspection failed unexpectedly; stop polling and just wait for exit.
    Stop,
}

pub(crate) struct InputDetector {
    shell_pid: u32,
    child: ChildSlot,
    handler: Option<Box<dyn InputHandler>>,
    invocations: usize,
}

impl InputDetector {
    pub(crate) fn new(shell_pid: u32, handler: Box<dyn InputHandler>) -> Self {
        Self {
            shell_pid,
            child: ChildSlot::Searching,
            handler: Some(handler),
            invocations: 0,
        }
    }

    pub(crate) fn child(&self) -> Option<ChildHandle> {
        match self.child {
            ChildSlot::Found(handle) => Some(handle),
            _ => None,
        }
    }

    pub(crate) fn invocations(&self) -> usize {
        self.invocations
    }

    /// Run discovery and wait-state inspection for one cycle.
    ///
    /// `input_pending` is true while previously delivered input still sits unread
    /// in the stdin pipe; a child blocked in `read` then is not starved.
    pub(crate) fn observe(
        &mut self,
        introspector: &mut dyn ProcessIntrospector,
        input_pending: bool,
    ) -> Result<Observation, RunError> {
        let child = match self.child {
            ChildSlot::Abandoned => return Ok(Observation::Idle),
            ChildSlot::Found(handle) => handle,
            ChildSlot::Searching => match self.discover(introspector)? {
                Some(handle) => handle,
                None => return Ok(self.idle_or_stop()),
            },
        };

        if input_pending {
            return Ok(Observation::Idle);
        }

        match introspector.is_waiting_for_input(child.pid) {
            Ok(true) => Ok(Observation::AwaitingInput),
            Ok(false) => Ok(Observation::Idle),
            Err(e) if e.is_gone() => Ok(Observation::Idle),
            Err(e) => {
                tracing::warn!(pid = child.pid, error = %e, "wait-state inspection failed; polling stops");
                Ok(Observation::Stop)
            }
        }
    }

    /// Returns the child once exactly one is visible.
    fn discover(
        &mut self,
        introspector: &mut dyn ProcessIntrospector,
    ) -> Result<Option<ChildHandle>, RunError> {
        let children = match introspector.children_of(self.shell_pid) {
            Ok(children) => children,
            Err(IntrospectError::Gone { .. }) => return Ok(None),
            Err(e) => {
                tracing::warn!(shell_pid = self.shell_pid, error = %e, "child discovery failed; polling stops");
                self.child = ChildSlot::Abandoned;
                return Ok(None);
            }
        };

        match children.as_slice() {
            [] => Ok(None),
            [pid] => {
                let handle = ChildHandle { pid: *pid };
                tracing::debug!(shell_pid = self.shell_pid, child_pid = *pid, "interactive child discovered");
                self.child = ChildSlot::Found(handle);
                Ok(Some(handle))
            }
            _ => Err(RunError::InvariantViolation {
                shell_pid: self.shell_pid,
                children,
            }),
        }
    }

    fn idle_or_stop(&self) -> Observation {
        match self.child {
            ChildSlot::Abandoned => Observation::Stop,
            _ => Observation::Idle,
        }
    }

    /// The shell has exited; a child that was never found never will be.
    pub(crate) fn on_parent_exit(&mut self) {
        if self.child == ChildSlot::Searching {
            tracing::debug!(shell_pid = self.shell_pid, "shell exited before any child appeared");
            self.child = ChildSlot::Abandoned;
        }
    }

    /// Invoke the handler with the pending output and deliver what it wrote.
    ///
    /// Returns `None` if there is no handler or no pending buffer.
    pub(crate) async fn dispatch<W>(
        &mut self,
        buffer: &SharedBuffer,
        stdin: &mut Option<W>,
        cancel: &CancellationToken,
    ) -> Result<Option<InputDisposition>, RunError>
    where
        W: AsyncWrite + Unpin,
    {
        let Some(snapshot) = buffer.lock().snapshot_pending() else {
            return Ok(None);
        };
        let Some(mut handler) = self.handler.take() else {
            return Ok(None);
        };

        let text = snapshot.text;
        let task = tokio::task::spawn_blocking(move || {
            let mut sink = InputSink::new();
            let disposition = handler.on_input_requested(&text, &mut sink);
            (handler, disposition, sink)
        });

        let (handler, disposition, sink) = tokio::select! {
            joined = task => joined.map_err(|e| RunError::HandlerPanicked {
                reason: e.to_string(),
            })?,
            _ = cancel.cancelled() => return Err(RunError::Cancelled),
        };
        self.handler = Some(handler);
        self.invocations += 1;

        deliver(stdin, sink, cancel).await?;

        if disposition == InputDisposition::Handled {
            buffer.lock().acknowledge(snapshot.lines);
        }
        tracing::debug!(
            invocation = self.invocations,
            disposition = ?disposition,
            "input handler returned"
        );
        Ok(Some(disposition))
    }
}

/// Write the sink's bytes to stdin. A closed pipe means the child already exited.
///
/// A child that stops reading can leave the write pending forever, so the write
/// races `cancel`.
async fn deliver<W>(
    stdin: &mut Option<W>,
    sink: InputSink,
    cancel: &CancellationToken,
) -> Result<(), RunError>
where
    W: AsyncWrite + Unpin,
{
    let InputSink { data, close } = sink;

    if let Some(writer) = stdin.as_mut() {
        if !data.is_empty() {
            let write = async {
                writer.write_all(&data).await?;
                writer.flush().await
            };
            let written = tokio::select! {
                written = write => written,
                _ = cancel.cancelled() => return Err(RunError::Cancelled),
            };
            match written {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    tracing::debug!("stdin closed before input could be delivered");
                }
                Err(e) => tracing::warn!(error = %e, "failed to write input"),
            }
        }
    }

    if close {
        // Dropping the writer closes the pipe
        *stdin = None;
    }
    Ok(())
}
