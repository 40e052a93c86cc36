use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{CommandSpec, InvocationResult, InvokeError, Invoker};

/// One scripted run: what to write, what to print, how to exit.
#[derive(Debug, Clone)]
pub struct MockRun {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Files to create, relative to the command's output directory.
    pub writes: Vec<PathBuf>,
    pub delay: Duration,
}

impl MockRun {
    pub fn success() -> Self {
        Self {
            exit_code: 0,
            stdout: "done".to_string(),
            stderr: String::new(),
            writes: Vec::new(),
            delay: Duration::ZERO,
        }
    }

    pub fn failure(exit_code: i32, stderr: &str) -> Self {
        Self {
            exit_code,
            stderr: stderr.to_string(),
            ..Self::success()
        }
    }

    pub fn writing(mut self, relative: impl Into<PathBuf>) -> Self {
        self.writes.push(relative.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// A scripted invoker for tests. Plays runs in order and records every call.
pub struct MockInvoker {
    runs: Vec<MockRun>,
    repeat: bool,
    index: AtomicUsize,
    calls: Mutex<Vec<CommandSpec>>,
}

impl MockInvoker {
    pub fn new(runs: Vec<MockRun>) -> Self {
        Self {
            runs,
            repeat: false,
            index: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Replay the same run for every call.
    pub fn always(run: MockRun) -> Self {
        Self {
            repeat: true,
            ..Self::new(vec![run])
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Invoker for MockInvoker {
    async fn invoke(
        &self,
        spec: &CommandSpec,
        timeout: Duration,
    ) -> Result<InvocationResult, InvokeError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(spec.clone());
        }

        let i = self.index.fetch_add(1, Ordering::SeqCst);
        let slot = if self.repeat { 0 } else { i };
        let run = self.runs.get(slot).ok_or_else(|| {
            InvokeError::Io(std::io::Error::other(format!(
                "MockInvoker: no more runs (called {} times)",
                i + 1
            )))
        })?;

        if run.delay > timeout {
            tokio::time::sleep(timeout).await;
            return Ok(InvocationResult {
                exit_code: -1,
                stdout: run.stdout.clone(),
                stderr: String::new(),
                duration_ms: timeout.as_millis() as u64,
                timed_out: true,
            });
        }
        if !run.delay.is_zero() {
            tokio::time::sleep(run.delay).await;
        }

        for relative in &run.writes {
            let path = spec.output_dir.join(relative);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, b"mock image").await?;
        }

        Ok(InvocationResult {
            exit_code: run.exit_code,
            stdout: run.stdout.clone(),
            stderr: run.stderr.clone(),
            duration_ms: run.delay.as_millis() as u64,
            timed_out: false,
        })
    }
}
