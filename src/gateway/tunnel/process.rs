//! Process-bridged tunnel.
//!
//! Spawns a helper (e.g. `cloudflared access tcp`) and adapts its stdio into
//! a duplex stream: reads come from the helper's stdout, writes go to its
//! stdin. Stderr is diagnostic only and logged as warnings.
//!
//! The helper and the stream share one lifetime:
//!
//! - dropping the [`ProcessStream`] or closing the guard kills the helper
//! - the helper exiting makes the stream's read side reach end-of-data
//!
//! A non-zero exit that the owner did not ask for is reported through the
//! tunnel monitor as [`TunnelError::ProcessExited`].

use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader, ReadBuf};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use super::{TunnelGuard, TunnelMonitor};
use crate::gateway::error::TunnelError;

/// Duplex stream over a helper process's stdin and stdout.
pub struct ProcessStream {
    stdout: ChildStdout,
    stdin: ChildStdin,
    _kill_on_drop: DropGuard,
}

impl AsyncRead for ProcessStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdout).poll_read(cx, buf)
    }
}

impl AsyncWrite for ProcessStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stdin).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdin).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdin).poll_shutdown(cx)
    }
}

pub(super) fn spawn_bridge(
    command: &str,
    args: &[String],
) -> Result<(ProcessStream, TunnelGuard, TunnelMonitor), TunnelError> {
    let mut child = Command::new(command)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| TunnelError::SpawnFailed(format!("{}: {}", command, e)))?;

    let pid = child.id();
    info!("Started tunnel process {} (pid {:?})", command, pid);

    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        return Err(TunnelError::SpawnFailed(format!(
            "{}: stdio pipes unavailable",
            command
        )));
    };
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(log_stderr(command.to_string(), stderr));
    }

    let cancel = CancellationToken::new();
    let (exit_tx, exit_rx) = oneshot::channel();
    let reaper = tokio::spawn(reap(command.to_string(), child, cancel.clone(), exit_tx));

    let stream = ProcessStream {
        stdout,
        stdin,
        _kill_on_drop: cancel.clone().drop_guard(),
    };
    let guard = TunnelGuard {
        cancel,
        reaper: Some(reaper),
        pid,
    };
    let monitor = TunnelMonitor { rx: Some(exit_rx) };

    Ok((stream, guard, monitor))
}

/// Wait for the helper to exit, or kill it once cancelled.
async fn reap(
    command: String,
    mut child: Child,
    cancel: CancellationToken,
    exit_tx: oneshot::Sender<TunnelError>,
) {
    let status = tokio::select! {
        biased;
        status = child.wait() => status,
        _ = cancel.cancelled() => {
            if let Err(e) = child.start_kill() {
                debug!("Tunnel process {} already gone: {}", command, e);
            }
            child.wait().await
        }
    };

    match status {
        Ok(status) => match status.code() {
            Some(0) => debug!("Tunnel process {} exited cleanly", command),
            Some(code) => {
                warn!("Tunnel process {} exited with code {}", command, code);
                let _ = exit_tx.send(TunnelError::ProcessExited(code));
            }
            None if cancel.is_cancelled() => debug!("Tunnel process {} terminated", command),
            None => {
                warn!("Tunnel process {} killed by signal", command);
                let _ = exit_tx.send(TunnelError::ProcessExited(-1));
            }
        },
        Err(e) => warn!("Failed to wait for tunnel process {}: {}", command, e),
    }
}

async fn log_stderr(command: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => warn!("{} stderr: {}", command, line),
            Ok(None) => break,
            Err(e) => {
                debug!("Stopped reading {} stderr: {}", command, e);
                break;
            }
        }
    }
}
