//! Output aggregation.
//!
//! A reader task splits the merged stdout/stderr pipe into lines and pushes them
//! through a bounded channel; an aggregator task appends them to the shared
//! [`OutputBuffer`]. Dropping the channel sender is the end-of-stream signal.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Buffer shared between the aggregator (writer) and the poll loop (reader).
pub(crate) type SharedBuffer = Arc<Mutex<OutputBuffer>>;

/// Captured output of one run.
///
/// `combined` holds every line ever delivered. `pending` holds the lines not yet
/// acknowledged by an input handler and only exists when a handler is registered.
#[derive(Debug, Default)]
pub(crate) struct OutputBuffer {
    combined: String,
    lines: usize,
    pending: Option<Vec<String>>,
}

/// Text handed to an input handler, plus how many lines it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingSnapshot {
    pub(crate) text: String,
    pub(crate) lines: usize,
}

impl OutputBuffer {
    pub(crate) fn new(track_pending: bool) -> Self {
        Self {
            combined: String::new(),
            lines: 0,
            pending: track_pending.then(Vec::new),
        }
    }

    pub(crate) fn shared(track_pending: bool) -> SharedBuffer {
        Arc::new(Mutex::new(Self::new(track_pending)))
    }

    /// Append one line. The only mutation performed by the aggregator.
    pub(crate) fn push_line(&mut self, line: String) {
        if self.lines > 0 {
            self.combined.push('\n');
        }
        self.combined.push_str(&line);
        self.lines += 1;

        if let Some(pending) = self.pending.as_mut() {
            pending.push(line);
        }
    }

    #[cfg(test)]
    pub(crate) fn combined(&self) -> &str {
        &self.combined
    }

    pub(crate) fn line_count(&self) -> usize {
        self.lines
    }

    /// Lines accumulated since the last acknowledged input, joined with `\n`.
    pub(crate) fn snapshot_pending(&self) -> Option<PendingSnapshot> {
        self.pending.as_ref().map(|lines| PendingSnapshot {
            text: lines.join("\n"),
            lines: lines.len(),
        })
    }

    /// Forget the first `lines` pending lines (the ones a handler has consumed).
    ///
    /// Lines that arrived while the handler was running are kept.
    pub(crate) fn acknowledge(&mut self, lines: usize) {
        if let Some(pending) = self.pending.as_mut() {
            let n = lines.min(pending.len());
            pending.drain(..n);
        }
    }

    #[cfg(test)]
    pub(crate) fn tracks_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub(crate) fn take_combined(&mut self) -> String {
        std::mem::take(&mut self.combined)
    }
}

/// The two tasks that move output from the pipe into the buffer.
#[derive(Debug)]
pub(crate) struct OutputPipeline {
    reader: JoinHandle<()>,
    aggregator: JoinHandle<()>,
}

impl OutputPipeline {
    /// Start reading `stream` into `buffer`.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn spawn<R>(stream: R, buffer: SharedBuffer, capacity: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let reader = tokio::spawn(read_lines(stream, tx));
        let aggregator = tokio::spawn(aggregate(rx, buffer));
        Self { reader, aggregator }
    }

    /// Wait until every line has reached the buffer.
    ///
    /// Returns `false` if the stream did not close within `timeout`; the reader is
    /// then aborted and whatever was already queued is still delivered.
    pub(crate) async fn drain(self, timeout: Duration) -> bool {
        let OutputPipeline { reader, aggregator } = self;
        let abort = reader.abort_handle();

        let closed = tokio::time::timeout(timeout, reader).await.is_ok();
        if !closed {
            tracing::warn!(
                timeout_ms = timeout.as_millis() as u64,
                "output stream still open after exit; abandoning reader"
            );
            abort.abort();
        }

        if let Err(e) = aggregator.await {
            tracing::warn!(error = %e, "output aggregator did not finish cleanly");
        }
        closed
    }

    /// Stop both tasks without waiting.
    pub(crate) fn abort(&self) {
        self.reader.abort();
        self.aggregator.abort();
    }
}

async fn read_lines<R>(stream: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut raw = Vec::with_capacity(256);

    loop {
        raw.clear();
        match reader.read_until(b'\n', &mut raw).await {
            Ok(0) => break,
            Ok(_) => {
                if raw.last() == Some(&b'\n') {
                    raw.pop();
                    if raw.last() == Some(&b'\r') {
                        raw.pop();
                    }
                }
                let line = String::from_utf8_lossy(&raw).into_owned();
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "error reading process output");
                break;
            }
        }
    }
    // tx dropped here: closes the channel
}

async fn aggregate(mut rx: mpsc::Receiver<String>, buffer: SharedBuffer) {
    while let Some(line) = rx.recv().await {
        tracing::trace!(line = %line, "output line");
        buffer.lock().push_line(line);
    }
}
