// Copyright (c) 2026 VeriML Contributors
// SPDX-License-Identifier: Apache-2.0

//! Isolated inference execution.
//!
//! The decrypted model never enters this process's address space for
//! inference; a worker subprocess reads it from a scratch path, writes the
//! prediction to stdout and diagnostics to stderr. The run is bounded by a
//! wall clock: on expiry the worker is killed and reaped, and the caller
//! treats the prediction as failed.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

const STDERR_TAIL_BYTES: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("worker command is empty")]
    EmptyCommand,
    #[error("worker spawn failed: {0}")]
    Spawn(std::io::Error),
    #[error("worker pipes unavailable")]
    Pipe,
    #[error("worker io task failed")]
    Reader,
    #[error("worker exceeded {0}s wall-clock limit")]
    TimedOut(u64),
    #[error("worker exited with {code:?}: {stderr_tail}")]
    Failed {
        code: Option<i32>,
        stderr_tail: String,
    },
    #[error("worker output exceeds {0} bytes")]
    OutputTooLarge(usize),
    #[error("worker io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
pub struct WorkerOutput {
    /// Raw prediction bytes from the worker's stdout.
    pub stdout: Vec<u8>,
    /// Diagnostics, capped to the trailing portion.
    pub stderr_tail: String,
}

/// Runs the worker command with the model and input paths appended as the
/// final two arguments.
pub async fn run_worker(
    cmd: &[String],
    model_path: &Path,
    input_path: &Path,
    timeout: Duration,
    max_output_bytes: usize,
) -> Result<WorkerOutput, SandboxError> {
    let (program, args) = cmd.split_first().ok_or(SandboxError::EmptyCommand)?;

    let mut child = Command::new(program)
        .args(args)
        .arg(model_path)
        .arg(input_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(SandboxError::Spawn)?;

    let stdout = child.stdout.take().ok_or(SandboxError::Pipe)?;
    let stderr = child.stderr.take().ok_or(SandboxError::Pipe)?;

    // Drain pipes concurrently with the wait so a chatty worker cannot
    // deadlock on a full pipe buffer.
    let stdout_task = tokio::spawn(read_capped(stdout, max_output_bytes));
    let stderr_task = tokio::spawn(read_capped(stderr, STDERR_TAIL_BYTES));

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(wait_result) => wait_result?,
        Err(_) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            stdout_task.abort();
            stderr_task.abort();
            return Err(SandboxError::TimedOut(timeout.as_secs()));
        }
    };

    let (stdout, stdout_truncated) = stdout_task.await.map_err(|_| SandboxError::Reader)??;
    let (stderr, _) = stderr_task.await.map_err(|_| SandboxError::Reader)??;
    let stderr_tail = String::from_utf8_lossy(&stderr).into_owned();

    if !status.success() {
        tracing::warn!(code = ?status.code(), "worker exited with failure");
        return Err(SandboxError::Failed {
            code: status.code(),
            stderr_tail,
        });
    }
    if stdout_truncated {
        return Err(SandboxError::OutputTooLarge(max_output_bytes));
    }

    Ok(WorkerOutput {
        stdout,
        stderr_tail,
    })
}

async fn read_capped<R: tokio::io::AsyncRead + Unpin>(
    mut reader: R,
    cap: usize,
) -> Result<(Vec<u8>, bool), std::io::Error> {
    let mut out = Vec::new();
    let mut buf = [0u8; 8 * 1024];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok((out, false));
        }
        if out.len() + n > cap {
            out.extend_from_slice(&buf[..cap - out.len()]);
            // Keep draining so the child is not blocked on a full pipe,
            // but remember that the cap was hit.
            while reader.read(&mut buf).await? != 0 {}
            return Ok((out, true));
        }
        out.extend_from_slice(&buf[..n]);
    }
}
