//! External tool process runner.
//!
//! Spawns one process, streams its combined stdout/stderr output line by
//! line into a callback as it arrives, and reports the exit status once both
//! pipes are drained and the process has exited. Lines are split on `\n` and
//! `\r` so the in-place progress redraws of tools like `dd` and HandBrake
//! surface as individual lines.

use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// How a tool process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Process exited on its own with this code.
    Exited(i32),
    /// Process was killed, either by a cancellation request or a signal.
    Terminated,
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        matches!(self, ExitOutcome::Exited(0))
    }
}

/// Run `command` to completion, invoking `on_line` for every non-empty
/// output line as it is produced.
///
/// Both pipes are read concurrently and drained fully before waiting on the
/// child, so a tool that floods stderr while stdout sits idle cannot
/// deadlock the runner. When `cancel` fires the child is killed and the
/// remaining buffered output is still delivered.
pub async fn run(
    mut command: Command,
    on_line: &(dyn Fn(&str) + Send + Sync),
    cancel: &CancellationToken,
) -> std::io::Result<ExitOutcome> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn()?;

    let (tx, mut rx) = mpsc::channel::<String>(64);

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(stream_lines(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(stream_lines(stderr, tx.clone()));
    }
    // The reader tasks hold the remaining senders; the channel closes once
    // both pipes hit EOF.
    drop(tx);

    let mut killed = false;
    loop {
        tokio::select! {
            maybe_line = rx.recv() => match maybe_line {
                Some(line) => on_line(&line),
                None => break,
            },
            _ = cancel.cancelled(), if !killed => {
                tracing::debug!("cancellation requested, killing child process");
                let _ = child.start_kill();
                killed = true;
            }
        }
    }

    let status = child.wait().await?;

    if killed {
        return Ok(ExitOutcome::Terminated);
    }
    match status.code() {
        Some(code) => Ok(ExitOutcome::Exited(code)),
        None => Ok(ExitOutcome::Terminated),
    }
}

/// Read a pipe to EOF, emitting complete lines. Treats both `\n` and `\r`
/// as terminators and drops empty lines.
async fn stream_lines<R: AsyncRead + Unpin>(mut reader: R, tx: mpsc::Sender<String>) {
    let mut chunk = [0u8; 8192];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(_) => break,
        };

        for &byte in &chunk[..n] {
            if byte == b'\n' || byte == b'\r' {
                if !flush_line(&mut pending, &tx).await {
                    return;
                }
            } else {
                pending.push(byte);
            }
        }
    }

    let _ = flush_line(&mut pending, &tx).await;
}

/// Send the buffered line if it is non-empty. Returns false once the
/// receiver is gone.
async fn flush_line(pending: &mut Vec<u8>, tx: &mpsc::Sender<String>) -> bool {
    if pending.is_empty() {
        return true;
    }
    let line = String::from_utf8_lossy(pending).trim().to_string();
    pending.clear();
    if line.is_empty() {
        return true;
    }
    tx.send(line).await.is_ok()
}
