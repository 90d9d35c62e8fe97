//! Bounded child-process execution.

use std::ffi::OsString;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::ToolError;

/// How long to keep draining both pipes after the child has exited or been
/// killed. A grandchild that inherited the pipes can hold them open.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Captured result of one child process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code; `None` when killed by a signal or on timeout.
    pub exit_code: Option<i32>,
    /// Whether the child exited successfully.
    pub success: bool,
    /// Whether the timeout expired and the child was killed.
    pub timed_out: bool,
    /// Captured stdout (lossy UTF-8).
    pub stdout: String,
    /// Captured stderr (lossy UTF-8).
    pub stderr: String,
}

impl ToolOutput {
    /// Stdout followed by stderr, as one text.
    #[must_use]
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => {
                let mut text = self.stdout.clone();
                if !text.ends_with('\n') {
                    text.push('\n');
                }
                text.push_str(&self.stderr);
                text
            }
        }
    }

    /// The most useful error text: stderr, or stdout if stderr is empty.
    #[must_use]
    pub fn error_text(&self) -> String {
        if self.stderr.trim().is_empty() {
            self.stdout.trim().to_string()
        } else {
            self.stderr.trim().to_string()
        }
    }
}

/// Renders a command line for logs and error messages.
#[must_use]
pub fn display_command(program: &str, args: &[OsString]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(&arg.to_string_lossy());
    }
    line
}

/// Runs `program` with `args`, capturing stdout and stderr, and kills the
/// child if it outlives `timeout`.
///
/// Both pipes are drained concurrently with the wait so a chatty child can
/// never block on a full pipe. On unix the child leads its own process
/// group and a timeout kills the whole group, so nothing it forked keeps
/// running. Output produced before a timeout is kept.
///
/// # Errors
///
/// Returns [`ToolError::Spawn`] if the program cannot be started and
/// [`ToolError::Io`] if waiting on or killing it fails.
pub async fn run_with_timeout(
    program: &str,
    args: &[OsString],
    timeout: Duration,
) -> Result<ToolOutput, ToolError> {
    let command_line = display_command(program, args);
    log::debug!("Running: {command_line}");

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn().map_err(|source| ToolError::Spawn {
        program: program.to_string(),
        source,
    })?;

    let stdout = Capture::start(child.stdout.take());
    let stderr = Capture::start(child.stderr.take());

    let io_err = |source| ToolError::Io {
        command: command_line.clone(),
        source,
    };

    let (status, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => (Some(status.map_err(io_err)?), false),
        Err(_) => {
            log::error!("{command_line} timed out after {timeout:?}, killing it");
            kill_process_group(child.id());
            // `kill` also waits, so the child is reaped here.
            child.kill().await.map_err(io_err)?;
            (None, true)
        }
    };

    let deadline = Instant::now() + DRAIN_TIMEOUT;
    let stdout = stdout.drain(deadline).await;
    let stderr = stderr.drain(deadline).await;

    Ok(ToolOutput {
        exit_code: status.and_then(|s| s.code()),
        success: status.is_some_and(|s| s.success()),
        timed_out,
        stdout,
        stderr,
    })
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pgid) = pid.and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return;
    };
    // SAFETY: killpg only sends a signal. The group was created for this
    // child by `process_group(0)` and the child is not reaped yet, so the
    // id cannot have been reused.
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
        log::warn!(
            "Failed to kill process group {pgid}: {}",
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
const fn kill_process_group(_pid: Option<u32>) {}

/// One pipe being read into a buffer that outlives the reader task.
struct Capture {
    buf: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl Capture {
    fn start<R: AsyncRead + Unpin + Send + 'static>(reader: Option<R>) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buf);
        let task = tokio::spawn(async move {
            let Some(mut reader) = reader else {
                return;
            };
            let mut chunk = [0u8; 8192];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => sink
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .extend_from_slice(&chunk[..n]),
                    Err(e) => {
                        log::warn!("Failed to read child output: {e}");
                        break;
                    }
                }
            }
        });
        Self { buf, task }
    }

    /// Waits for the pipe to close, up to `deadline`, and returns whatever
    /// was read.
    async fn drain(self, deadline: Instant) -> String {
        let abort = self.task.abort_handle();
        match tokio::time::timeout_at(deadline, self.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("Output reader failed: {e}"),
            Err(_) => {
                abort.abort();
                log::warn!("Pipe still open after {DRAIN_TIMEOUT:?}, keeping partial output");
            }
        }
        let bytes = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}
