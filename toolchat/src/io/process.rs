//! One external process per turn, reported as an ordered event stream.
//!
//! A session delivers zero or more [`SessionEvent::Output`] chunks followed by
//! exactly one [`SessionEvent::Finished`]. The liveness timer is armed at spawn
//! and re-armed on every chunk; when it fires the process is killed and the
//! session finishes with [`Outcome::TimedOut`]. Cancellation kills the process
//! and finishes with [`Outcome::Cancelled`].

use std::collections::BTreeMap;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
pub use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, instrument, warn};

use crate::core::registry::ToolDefinition;
use crate::core::types::{Outcome, SessionEvent};

const READ_CHUNK_BYTES: usize = 8192;
/// How long buffered output is still read once the tool process has exited.
const EXIT_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Everything needed to start one tool process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Serialized transcript plus the current user line, passed as the final argument.
    pub input: String,
}

impl LaunchRequest {
    pub fn for_tool(tool: &ToolDefinition, input: String) -> Self {
        Self {
            command: tool.command.clone(),
            args: tool.args.clone(),
            env: tool.env.clone(),
            input,
        }
    }

    /// Argument vector as seen by the process (excluding the program name).
    pub fn argv(&self) -> Vec<&str> {
        self.args
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.input.as_str()))
            .collect()
    }
}

/// Per-session limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    /// Maximum silence (no stdout) before the process is killed.
    pub liveness_timeout: Duration,
    /// Bytes of stdout kept; later bytes are drained and discarded.
    pub output_limit_bytes: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            liveness_timeout: Duration::from_secs(30),
            output_limit_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{stream} was not piped")]
    Pipe { stream: &'static str },
}

/// Consumer side of a running session. Dropping it cancels the session.
pub struct SessionHandle {
    events: mpsc::UnboundedReceiver<SessionEvent>,
    cancel: CancellationToken,
    _cancel_on_drop: DropGuard,
}

impl SessionHandle {
    pub fn new(events: mpsc::UnboundedReceiver<SessionEvent>, cancel: CancellationToken) -> Self {
        let guard = cancel.clone().drop_guard();
        Self {
            events,
            cancel,
            _cancel_on_drop: guard,
        }
    }

    /// Next event, or `None` once the producer is gone.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Next already-delivered event without waiting.
    pub fn try_recv(&mut self) -> Result<SessionEvent, TryRecvError> {
        self.events.try_recv()
    }

    /// Request termination. A no-op once the session has finished.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Spawn the process described by `request` and start driving it.
///
/// Spawn failures are returned here, synchronously, rather than delivered as
/// events. Must be called from within a tokio runtime.
#[instrument(skip_all, fields(command = %request.command, timeout_secs = limits.liveness_timeout.as_secs()))]
pub fn spawn_session(
    request: &LaunchRequest,
    limits: SessionLimits,
) -> Result<SessionHandle, SessionError> {
    let mut cmd = Command::new(&request.command);
    cmd.args(&request.args)
        .arg(&request.input)
        .envs(&request.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(args = request.args.len(), env = request.env.len(), "spawning tool process");
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(source) => {
            error!(err = %source, "failed to spawn command");
            return Err(SessionError::Spawn {
                command: request.command.clone(),
                source,
            });
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or(SessionError::Pipe { stream: "stdout" })?;
    let stderr = child
        .stderr
        .take()
        .ok_or(SessionError::Pipe { stream: "stderr" })?;

    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let stderr_task = tokio::spawn(read_stream_limited(stderr, limits.output_limit_bytes));
    tokio::spawn(drive_session(
        child,
        stdout,
        stderr_task,
        tx,
        cancel.clone(),
        limits,
    ));

    Ok(SessionHandle::new(rx, cancel))
}

type StderrTask = tokio::task::JoinHandle<std::io::Result<Vec<u8>>>;

async fn drive_session(
    mut child: Child,
    mut stdout: ChildStdout,
    stderr_task: StderrTask,
    tx: mpsc::UnboundedSender<SessionEvent>,
    cancel: CancellationToken,
    limits: SessionLimits,
) {
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];
    let mut decoder = Utf8Chunker::default();
    let mut collected = OutputBuffer::new(limits.output_limit_bytes);
    let mut stdout_open = true;
    let liveness = tokio::time::sleep(limits.liveness_timeout);
    tokio::pin!(liveness);

    let outcome = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("session cancelled, killing process");
                kill(&mut child).await;
                break Outcome::Cancelled;
            }
            _ = &mut liveness => {
                warn!(
                    timeout_secs = limits.liveness_timeout.as_secs(),
                    "no output within liveness window, killing"
                );
                kill(&mut child).await;
                break Outcome::TimedOut;
            }
            read = stdout.read(&mut chunk), if stdout_open => match read {
                Ok(0) => {
                    stdout_open = false;
                    let tail = decoder.finish();
                    emit(&tx, &mut collected, tail);
                }
                Ok(n) => {
                    liveness.as_mut().reset(Instant::now() + limits.liveness_timeout);
                    let text = decoder.push(&chunk[..n]);
                    emit(&tx, &mut collected, text);
                }
                Err(err) => {
                    warn!(err = %err, "failed to read tool output");
                    kill(&mut child).await;
                    break Outcome::Failed { detail: format!("read output: {err}") };
                }
            },
            status = child.wait() => {
                if stdout_open {
                    // A background process started by the tool may still hold stdout.
                    drain_after_exit(&mut stdout, &mut chunk, &mut decoder, &tx, &mut collected)
                        .await;
                }
                if let Some(notice) = collected.truncated_notice() {
                    warn!(truncated = collected.truncated, "tool output truncated");
                    let _ = tx.send(SessionEvent::Output(notice.clone()));
                    collected.text.push_str(&notice);
                }
                break exit_outcome(status, stderr_task, collected.text).await;
            }
        }
    };

    debug!(outcome = outcome.label(), "session finished");
    // The receiver may already be gone (cancelled turn); nothing left to report to.
    let _ = tx.send(SessionEvent::Finished(outcome));
}

fn emit(tx: &mpsc::UnboundedSender<SessionEvent>, collected: &mut OutputBuffer, text: String) {
    if text.is_empty() {
        return;
    }
    if let Some(kept) = collected.push(&text) {
        debug!(bytes = kept.len(), "tool output chunk");
        let _ = tx.send(SessionEvent::Output(kept));
    }
}

/// Read what is left in the stdout pipe after exit, for at most [`EXIT_DRAIN_GRACE`].
async fn drain_after_exit(
    stdout: &mut ChildStdout,
    chunk: &mut [u8],
    decoder: &mut Utf8Chunker,
    tx: &mpsc::UnboundedSender<SessionEvent>,
    collected: &mut OutputBuffer,
) {
    let deadline = Instant::now() + EXIT_DRAIN_GRACE;
    loop {
        match tokio::time::timeout_at(deadline, stdout.read(chunk)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                let text = decoder.push(&chunk[..n]);
                emit(tx, collected, text);
            }
            Ok(Err(err)) => {
                warn!(err = %err, "failed to read tool output after exit");
                break;
            }
            Err(_) => {
                debug!("stdout still open after exit, finishing without EOF");
                break;
            }
        }
    }
    let tail = decoder.finish();
    emit(tx, collected, tail);
}

async fn exit_outcome(
    status: std::io::Result<ExitStatus>,
    mut stderr_task: StderrTask,
    output: String,
) -> Outcome {
    let status = match status {
        Ok(status) => status,
        Err(err) => {
            warn!(err = %err, "failed to wait for tool process");
            return Outcome::Failed {
                detail: format!("wait for process: {err}"),
            };
        }
    };
    if status.success() {
        return Outcome::Completed { output };
    }

    let stderr = match tokio::time::timeout(EXIT_DRAIN_GRACE, &mut stderr_task).await {
        Ok(Ok(Ok(bytes))) => String::from_utf8_lossy(&bytes).trim().to_string(),
        Ok(Ok(Err(err))) => {
            warn!(err = %err, "failed to read tool stderr");
            String::new()
        }
        Ok(Err(err)) => {
            warn!(err = %err, "stderr reader task failed");
            String::new()
        }
        Err(_) => {
            // Stderr is held open elsewhere; whatever was read so far is lost.
            debug!("stderr still open after exit");
            stderr_task.abort();
            String::new()
        }
    };
    warn!(exit_code = ?status.code(), "tool process failed");
    let detail = if !stderr.is_empty() {
        stderr
    } else {
        match status.code() {
            Some(code) => format!("process exited with status {code}"),
            None => "process terminated by signal".to_string(),
        }
    };
    Outcome::Failed { detail }
}

async fn kill(child: &mut Child) {
    if let Err(err) = child.kill().await {
        warn!(err = %err, "failed to kill tool process");
    }
}

async fn read_stream_limited<R: AsyncRead + Unpin>(
    mut reader: R,
    limit: usize,
) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_BYTES];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        buf.extend_from_slice(&chunk[..n.min(remaining)]);
    }
    Ok(buf)
}

/// Stdout kept in memory, bounded by the output limit.
#[derive(Debug)]
struct OutputBuffer {
    text: String,
    limit: usize,
    truncated: usize,
}

impl OutputBuffer {
    fn new(limit: usize) -> Self {
        Self {
            text: String::new(),
            limit,
            truncated: 0,
        }
    }

    /// Append as much of `chunk` as fits; returns the kept part, if any.
    fn push(&mut self, chunk: &str) -> Option<String> {
        let remaining = self.limit.saturating_sub(self.text.len());
        let mut keep = chunk.len().min(remaining);
        while !chunk.is_char_boundary(keep) {
            keep -= 1;
        }
        self.truncated += chunk.len() - keep;
        if keep == 0 {
            return None;
        }
        let kept = &chunk[..keep];
        self.text.push_str(kept);
        Some(kept.to_string())
    }

    fn truncated_notice(&self) -> Option<String> {
        (self.truncated > 0).then(|| format!("\n[output truncated {} bytes]\n", self.truncated))
    }
}

/// Decodes a byte stream as UTF-8 without splitting multi-byte sequences
/// across chunk boundaries. Invalid sequences are replaced, never fatal.
#[derive(Debug, Default)]
struct Utf8Chunker {
    pending: Vec<u8>,
}

impl Utf8Chunker {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let split = self.pending.len() - incomplete_suffix_len(&self.pending);
        let text = String::from_utf8_lossy(&self.pending[..split]).into_owned();
        self.pending.drain(..split);
        text
    }

    fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

/// Length of a trailing, not-yet-complete UTF-8 sequence.
fn incomplete_suffix_len(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let byte = bytes[bytes.len() - back];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let width = match byte {
            0xF0..=0xFF => 4,
            0xE0..=0xEF => 3,
            0xC0..=0xDF => 2,
            _ => 1,
        };
        return if width > back { back } else { 0 };
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argv_appends_input_last() {
        let request = LaunchRequest {
            command: "echo".to_string(),
            args: vec!["hello".to_string()],
            env: BTreeMap::new(),
            input: "USER: hi\n".to_string(),
        };
        assert_eq!(request.argv(), vec!["hello", "USER: hi\n"]);
    }

    #[test]
    fn chunker_holds_back_split_multibyte_sequence() {
        let bytes = "héllo".as_bytes();
        let mut chunker = Utf8Chunker::default();
        let first = chunker.push(&bytes[..2]);
        assert_eq!(first, "h");
        let second = chunker.push(&bytes[2..]);
        assert_eq!(second, "éllo");
        assert_eq!(chunker.finish(), "");
    }

    #[test]
    fn chunker_flushes_dangling_bytes_lossily() {
        let mut chunker = Utf8Chunker::default();
        assert_eq!(chunker.push(&[b'a', 0xE2, 0x82]), "a");
        assert_eq!(chunker.finish(), "\u{FFFD}");
    }

    #[test]
    fn output_buffer_truncates_on_char_boundary() {
        let mut buffer = OutputBuffer::new(4);
        assert_eq!(buffer.push("ab").as_deref(), Some("ab"));
        assert_eq!(buffer.push("cé").as_deref(), Some("c"));
        assert_eq!(buffer.push("de").as_deref(), Some("d"));
        assert_eq!(buffer.push("x"), None);
        assert_eq!(buffer.text, "abcd");
        assert_eq!(buffer.truncated, 4);
        assert!(buffer.truncated_notice().is_some());
    }
}
