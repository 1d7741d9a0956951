//! Running backend executables under a deadline.
//!
//! Every conversion ends up here. [`run`] spawns the child, keeps at most
//! `stderr_limit` bytes of its standard error, and waits for whichever comes
//! first: the child exiting, the deadline, or the job's cancellation token.
//! On the latter two the child is killed before returning, so no backend
//! process outlives the job that started it.
//!
//! ## Why not `Command::output()`?
//!
//! `output()` buffers all of stderr (LibreOffice can be chatty) and only
//! returns once the pipe closes. A killed process may have grandchildren
//! that keep the pipe open, so waiting for EOF after a kill can hang.
//! Here stderr is drained by a separate task that is aborted on kill.
//!
//! ## Process groups
//!
//! `soffice` is a launcher: the process doing the work is a grandchild
//! (`oosplash` → `soffice.bin`). On Unix each backend is started as the
//! leader of its own process group and the whole group is killed when the
//! run ends, on every path including the future being dropped.

use crate::error::{ConvertError, SetupError};
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::{ChildStderr, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Minimum wait for the stderr reader after the child has exited.
const STDERR_GRACE: Duration = Duration::from_millis(500);

/// Placeholder substituted for the workspace path in captured stderr.
pub const WORKSPACE_PLACEHOLDER: &str = "<workspace>";

/// Limits applied to one backend run.
#[derive(Debug, Clone, Copy)]
pub struct RunLimits {
    pub timeout: Duration,
    pub stderr_limit: usize,
}

/// How a child process ended, when it ended on its own.
#[derive(Debug, Clone)]
pub struct ExitReport {
    pub success: bool,
    pub code: Option<i32>,
    /// Truncated, workspace-sanitised standard error.
    pub stderr: String,
    pub elapsed: Duration,
}

enum Interrupted {
    Timeout,
    Cancelled,
}

/// Run `command` to completion, or kill it on timeout or cancellation.
///
/// `backend` names the executable in errors. Occurrences of `workspace` in
/// stderr are replaced with [`WORKSPACE_PLACEHOLDER`].
pub async fn run(
    backend: &'static str,
    mut command: Command,
    limits: RunLimits,
    workspace: &Path,
    cancel: &CancellationToken,
) -> Result<ExitReport, ConvertError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let started = Instant::now();
    let mut child = command.spawn().map_err(|e| ConvertError::ConversionFailed {
        backend,
        code: None,
        stderr: format!("failed to start {backend}: {e}"),
    })?;
    debug!("Spawned {} (pid {:?})", backend, child.id());
    let mut group = ProcessGroup::new(child.id());

    let mut stderr_task = child
        .stderr
        .take()
        .map(|pipe| tokio::spawn(read_bounded(pipe, limits.stderr_limit)));

    let waited = tokio::select! {
        status = child.wait() => Ok(status),
        _ = tokio::time::sleep(limits.timeout) => Err(Interrupted::Timeout),
        _ = cancel.cancelled() => Err(Interrupted::Cancelled),
    };

    let status = match waited {
        Ok(status) => status.map_err(|e| {
            ConvertError::Internal(format!("failed to wait for {backend}: {e}"))
        })?,
        Err(reason) => {
            group.kill();
            if let Err(e) = child.kill().await {
                warn!("Failed to kill {} (pid {:?}): {}", backend, child.id(), e);
            }
            if let Some(task) = stderr_task {
                task.abort();
            }
            return Err(match reason {
                Interrupted::Timeout => {
                    warn!("{} exceeded {}s, killed", backend, limits.timeout.as_secs());
                    ConvertError::ConversionTimeout {
                        backend,
                        secs: limits.timeout.as_secs(),
                    }
                }
                Interrupted::Cancelled => {
                    debug!("{} cancelled, killed", backend);
                    ConvertError::Cancelled
                }
            });
        }
    };

    // Leftover background processes would hold the stderr pipe open.
    group.kill();
    let remaining = limits
        .timeout
        .saturating_sub(started.elapsed())
        .max(STDERR_GRACE);
    let raw = match stderr_task.as_mut() {
        Some(task) => match tokio::time::timeout(remaining, task).await {
            Ok(joined) => joined.unwrap_or_default(),
            Err(_) => {
                warn!("{} stderr still open {}ms after exit", backend, remaining.as_millis());
                Captured::default()
            }
        },
        None => Captured::default(),
    };
    if let Some(task) = stderr_task {
        task.abort();
    }

    Ok(ExitReport {
        success: status.success(),
        code: status.code(),
        stderr: raw.render(workspace),
        elapsed: started.elapsed(),
    })
}

/// Kills the backend's process group once, at the latest when dropped.
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn new(leader: Option<u32>) -> Self {
        Self {
            pgid: if cfg!(unix) { leader } else { None },
        }
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // SAFETY: killpg only sends a signal and touches no memory.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            debug!("killpg({}) failed: {}", pgid, err);
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

#[derive(Debug, Default)]
struct Captured {
    kept: Vec<u8>,
    total: usize,
}

impl Captured {
    fn render(&self, workspace: &Path) -> String {
        let mut text = String::from_utf8_lossy(&self.kept).trim_end().to_string();
        text = sanitize(&text, workspace);
        if self.total > self.kept.len() {
            text.push_str(&format!(" … [{} more bytes]", self.total - self.kept.len()));
        }
        text
    }
}

/// Keep the first `limit` bytes, but keep reading so the child never blocks
/// on a full pipe.
async fn read_bounded(mut pipe: ChildStderr, limit: usize) -> Captured {
    let mut captured = Captured::default();
    let mut buf = [0u8; 4096];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = limit.saturating_sub(captured.kept.len());
                captured.kept.extend_from_slice(&buf[..n.min(room)]);
                captured.total += n;
            }
        }
    }
    captured
}

fn sanitize(text: &str, workspace: &Path) -> String {
    let ws = workspace.to_string_lossy();
    if ws.is_empty() {
        return text.to_string();
    }
    text.replace(ws.as_ref(), WORKSPACE_PLACEHOLDER)
}

/// Ask a backend for its version, failing if it is missing or hangs.
///
/// Returns the first line of its standard output.
pub async fn query_version(
    name: &'static str,
    program: &Path,
    timeout: Duration,
) -> Result<String, SetupError> {
    let unavailable = |reason: String| SetupError::BackendUnavailable {
        name,
        path: program.to_path_buf(),
        reason,
    };

    let output = Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();
    let output = tokio::time::timeout(timeout, output)
        .await
        .map_err(|_| unavailable(format!("no answer to --version within {}s", timeout.as_secs())))?
        .map_err(|e| unavailable(e.to_string()))?;

    if !output.status.success() {
        return Err(unavailable(format!(
            "--version exited with {:?}",
            output.status.code()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .to_string())
}
