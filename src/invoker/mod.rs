pub mod mock;

use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::consts::MAX_OUTPUT_BYTES;

/// How long to keep reading pipes after the main process is gone.
/// A stray descendant holding stdout open must not stall the request.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

const READ_CHUNK: usize = 8 * 1024;

/// A fully resolved external command. Built by adapters, run by invokers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub work_dir: PathBuf,
    /// The per-request directory the backend was told to write into.
    pub output_dir: PathBuf,
}

impl CommandSpec {
    /// Shell-ish rendering for logs.
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// What one external run produced. Never mutated after the invoker returns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationResult {
    /// `-1` when the process was killed by a signal or timed out.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub timed_out: bool,
}

impl InvocationResult {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("failed to start '{program}' in {work_dir}: {source}")]
    Spawn {
        program: String,
        work_dir: String,
        #[source]
        source: io::Error,
    },
    #[error("failed while waiting for '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The only seam between orchestration and a model executable.
/// A process today; could be an RPC or an in-process call.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn invoke(
        &self,
        spec: &CommandSpec,
        timeout: Duration,
    ) -> Result<InvocationResult, InvokeError>;
}

/// Runs commands as child processes, each in its own process group.
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    max_output_bytes: usize,
}

impl Default for ProcessInvoker {
    fn default() -> Self {
        Self::new(MAX_OUTPUT_BYTES)
    }
}

impl ProcessInvoker {
    pub fn new(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }

    /// `output` is the retained tail; `dropped` counts bytes discarded
    /// before it while reading.
    fn truncate_output(output: &str, dropped: usize, max_bytes: usize) -> String {
        let total = output.len() + dropped;
        if total <= max_bytes {
            return output.to_string();
        }
        // Keep the tail: Python tracebacks end with the actual error.
        let mut start = output.len().saturating_sub(max_bytes);
        while !output.is_char_boundary(start) {
            start += 1;
        }
        format!(
            "[truncated: showing last {}/{} bytes]\n{}",
            output.len() - start,
            total,
            &output[start..]
        )
    }

    fn capture(&self) -> Arc<Mutex<TailBuffer>> {
        Arc::new(Mutex::new(TailBuffer::new(self.max_output_bytes.saturating_mul(2))))
    }

    fn decode(&self, capture: &Mutex<TailBuffer>) -> String {
        let Ok(mut buffer) = capture.lock() else {
            return String::new();
        };
        let dropped = buffer.dropped;
        let text = String::from_utf8_lossy(buffer.bytes.make_contiguous()).into_owned();
        Self::truncate_output(&text, dropped, self.max_output_bytes)
    }
}

#[async_trait]
impl Invoker for ProcessInvoker {
    async fn invoke(
        &self,
        spec: &CommandSpec,
        timeout: Duration,
    ) -> Result<InvocationResult, InvokeError> {
        debug!(
            command = %spec.display(),
            work_dir = %spec.work_dir.display(),
            "spawning backend process"
        );
        let started = Instant::now();

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .current_dir(&spec.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| InvokeError::Spawn {
            program: spec.program.clone(),
            work_dir: spec.work_dir.display().to_string(),
            source,
        })?;
        let group = GroupGuard::new(child.id());

        let stdout = self.capture();
        let stderr = self.capture();
        let mut stdout_task = tokio::spawn(drain(child.stdout.take(), stdout.clone()));
        let mut stderr_task = tokio::spawn(drain(child.stderr.take(), stderr.clone()));

        let (exit_code, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => {
                let status = status.map_err(|source| InvokeError::Wait {
                    program: spec.program.clone(),
                    source,
                })?;
                (status.code().unwrap_or(-1), false)
            }
            Err(_) => {
                warn!(
                    command = %spec.display(),
                    timeout_ms = timeout.as_millis() as u64,
                    "backend process timed out, killing process group"
                );
                terminate(&mut child, &group).await;
                (-1, true)
            }
        };

        let drained = tokio::time::timeout(DRAIN_GRACE, async {
            let _ = tokio::join!(&mut stdout_task, &mut stderr_task);
        })
        .await;
        if drained.is_err() {
            warn!(
                command = %spec.display(),
                "output pipes still open after exit, killing lingering descendants"
            );
            group.kill();
            stdout_task.abort();
            stderr_task.abort();
        }
        group.disarm();
        let duration_ms = started.elapsed().as_millis() as u64;

        debug!(exit_code, timed_out, duration_ms, "backend process finished");

        Ok(InvocationResult {
            exit_code,
            stdout: self.decode(&stdout),
            stderr: self.decode(&stderr),
            duration_ms,
            timed_out,
        })
    }
}

/// The last `cap` bytes read from a pipe, plus a count of what fell off
/// the front.
#[derive(Debug)]
struct TailBuffer {
    bytes: VecDeque<u8>,
    dropped: usize,
    cap: usize,
}

impl TailBuffer {
    fn new(cap: usize) -> Self {
        Self {
            bytes: VecDeque::new(),
            dropped: 0,
            cap,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend(chunk);
        if self.bytes.len() > self.cap {
            let excess = self.bytes.len() - self.cap;
            self.bytes.drain(..excess);
            self.dropped += excess;
        }
    }
}

/// Reads until EOF. Every chunk lands in `sink` as soon as it is read, so
/// aborting the task keeps everything captured so far.
async fn drain<R>(reader: Option<R>, sink: Arc<Mutex<TailBuffer>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let Some(mut reader) = reader else {
        return;
    };
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if let Ok(mut buffer) = sink.lock() {
                    buffer.push(&chunk[..n]);
                }
            }
            Err(e) => {
                debug!(error = %e, "pipe read failed, keeping what was captured");
                break;
            }
        }
    }
}

/// Owns the child's process group until the invocation finishes. If the
/// invoking future is dropped first (a client hung up), the whole group is
/// SIGKILLed rather than just the direct child.
struct GroupGuard {
    pgid: Option<u32>,
}

impl GroupGuard {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    fn kill(&self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid {
            use nix::errno::Errno;
            use nix::sys::signal::{Signal, killpg};
            use nix::unistd::Pid;

            match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => warn!(pgid, error = %e, "killpg failed"),
            }
        }
    }

    fn disarm(mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Kill the child and everything it spawned. Inference code cannot be
/// interrupted cleanly, so SIGKILL the whole group.
async fn terminate(child: &mut Child, group: &GroupGuard) {
    group.kill();
    if let Err(e) = child.kill().await {
        debug!(error = %e, "child already gone");
    }
}
