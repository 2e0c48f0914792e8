//! Child process helpers.
//!
//! Every child is spawned with `kill_on_drop`, so an error or timeout that
//! drops the handle also terminates the process.

use std::io::ErrorKind;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use crate::error::{ExecError, Result};

/// Build a shell invocation for `script` with stderr folded into stdout.
pub(crate) fn shell_command(shell: &str, script: &str, cwd: &Path) -> Command {
    let mut cmd = Command::new(shell);
    cmd.arg("-c")
        .arg(format!("{{ {script}\n}} 2>&1"))
        .current_dir(cwd)
        .stdin(Stdio::null())
        .kill_on_drop(true);
    cmd
}

/// Spawn `cmd`, feed it `stdin`, and wait for it to exit.
///
/// `label` names the process in errors. Exceeding `limit` kills the child
/// and yields a timeout error. The exit status is not inspected here.
pub(crate) async fn run_captured(
    mut cmd: Command,
    label: &str,
    stdin: Option<&[u8]>,
    limit: Option<Duration>,
) -> Result<Output> {
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    }

    let mut child = cmd.spawn().map_err(|e| ExecError::Execution {
        command: label.to_string(),
        status: "failed to spawn".to_string(),
        output: e.to_string(),
    })?;

    let pipe = child.stdin.take();
    let writer = async move {
        if let (Some(mut pipe), Some(input)) = (pipe, stdin) {
            pipe.write_all(input).await?;
            pipe.shutdown().await?;
        }
        Ok::<_, std::io::Error>(())
    };
    let run = async { tokio::join!(writer, child.wait_with_output()) };

    let (written, output) = match limit {
        Some(limit) => timeout(limit, run).await.map_err(|_| ExecError::Timeout {
            what: format!("`{label}` to exit"),
            seconds: limit.as_secs_f64(),
        })?,
        None => run.await,
    };

    let output = output.map_err(|e| ExecError::Execution {
        command: label.to_string(),
        status: "failed to wait".to_string(),
        output: e.to_string(),
    })?;

    // A child that exits without reading its input reports through its status
    if let Err(e) = written {
        if output.status.success() && e.kind() != ErrorKind::BrokenPipe {
            return Err(ExecError::Execution {
                command: label.to_string(),
                status: "failed to write stdin".to_string(),
                output: e.to_string(),
            });
        }
    }

    Ok(output)
}

/// Combined stdout and stderr as text.
pub(crate) fn output_text(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text
}

/// Fail with an execution error unless `output` reports success.
pub(crate) fn ensure_success(label: &str, output: &Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    Err(ExecError::Execution {
        command: label.to_string(),
        status: output.status.to_string(),
        output: output_text(output),
    })
}

/// Send SIGTERM to the process group led by `pid`.
#[cfg(unix)]
pub(crate) fn terminate_group(pid: u32) {
    signal_group(pid, libc::SIGTERM);
}

/// Send SIGKILL to the process group led by `pid`.
#[cfg(unix)]
pub(crate) fn kill_group(pid: u32) {
    signal_group(pid, libc::SIGKILL);
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions; a negative pid
    // addresses the process group created when the server was spawned.
    unsafe {
        libc::kill(-pid, signal);
    }
}
