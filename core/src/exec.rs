//! One-shot command execution for tool calls.
//!
//! Spawns the (possibly sandbox-wrapped) command produced by
//! [`crate::sandboxing`], captures capped stdout/stderr, enforces the wall
//! clock budget and synthesizes exit codes for processes killed by a signal
//! or a timeout.

use std::time::Duration;
use std::time::Instant;

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ForemanErr;
use crate::error::Result;
use crate::sandboxing::ExecRequest;
use crate::spawn::SpawnChildRequest;
use crate::spawn::StdioPolicy;
use crate::spawn::spawn_child_async;

/// Exit code reported when the command exceeded its wall clock budget, same
/// convention as GNU timeout(1).
pub const TIMEOUT_EXIT_CODE: i32 = 124;

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
    pub truncated: bool,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs the request to completion. Timeouts yield `Ok` with
/// [`TIMEOUT_EXIT_CODE`] and `timed_out` set; cancellation of `token` kills
/// the process group and yields [`ForemanErr::Interrupted`].
pub(crate) async fn execute(
    request: ExecRequest,
    token: &CancellationToken,
    max_output_bytes: usize,
) -> Result<ExecutionResult> {
    let Some((program, args)) = request.command.split_first() else {
        return Err(ForemanErr::ExecutionFailed("empty command".to_string()));
    };

    let mut child = spawn_child_async(SpawnChildRequest {
        program: program.into(),
        args: args.to_vec(),
        arg0: request.arg0.as_deref(),
        cwd: request.cwd.clone(),
        sandbox_policy: &request.sandbox_policy,
        stdio_policy: StdioPolicy::RedirectForShellTool,
        env: request.env.clone(),
    })
    .await
    .map_err(|err| ForemanErr::ExecutionFailed(format!("failed to spawn {program}: {err}")))?;

    let stdout_task = tokio::spawn(read_capped(child.stdout.take(), max_output_bytes));
    let stderr_task = tokio::spawn(read_capped(child.stderr.take(), max_output_bytes));

    let start = Instant::now();
    let (exit_code, timed_out) = tokio::select! {
        status = tokio::time::timeout(request.timeout, child.wait()) => match status {
            Ok(Ok(status)) => (synthesize_exit_code(status), false),
            Ok(Err(err)) => {
                return Err(ForemanErr::ExecutionFailed(format!("wait failed: {err}")));
            }
            Err(_) => {
                debug!("command exceeded {:?}, killing process group", request.timeout);
                kill_process_group(&child);
                let _ = child.wait().await;
                (TIMEOUT_EXIT_CODE, true)
            }
        },
        _ = token.cancelled() => {
            kill_process_group(&child);
            let _ = child.wait().await;
            return Err(ForemanErr::Interrupted);
        }
    };
    let duration = start.elapsed();

    let (stdout, stdout_truncated) = stdout_task
        .await
        .map_err(|err| ForemanErr::ExecutionFailed(format!("stdout reader died: {err}")))?;
    let (stderr, stderr_truncated) = stderr_task
        .await
        .map_err(|err| ForemanErr::ExecutionFailed(format!("stderr reader died: {err}")))?;

    Ok(ExecutionResult {
        exit_code,
        stdout,
        stderr,
        duration,
        timed_out,
        truncated: stdout_truncated || stderr_truncated,
    })
}

/// Reads the stream to EOF, keeping only the first `cap` bytes. Draining past
/// the cap keeps the child from blocking on a full pipe.
async fn read_capped<R>(reader: Option<R>, cap: usize) -> (String, bool)
where
    R: AsyncRead + Unpin + Send,
{
    let Some(mut reader) = reader else {
        return (String::new(), false);
    };
    let mut kept: Vec<u8> = Vec::new();
    let mut truncated = false;
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if kept.len() < cap {
                    let take = n.min(cap - kept.len());
                    kept.extend_from_slice(&buf[..take]);
                    if take < n {
                        truncated = true;
                    }
                } else {
                    truncated = true;
                }
            }
            Err(_) => break,
        }
    }
    (String::from_utf8_lossy(&kept).into_owned(), truncated)
}

fn synthesize_exit_code(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

/// Kills the whole process group of the child; the child was put in its own
/// group at spawn time so this reaches grandchildren too.
fn kill_process_group(child: &Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // Negative pid addresses the process group.
        unsafe {
            libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child;
    }
}
