// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Exec stream shared by every runtime back-end.
//!
//! One spawned command, regardless of transport (local process, ssh child,
//! docker exec), surfaces as an [`ExecStream`]: a stdin sink, stdout/stderr
//! sources, and a future exit carrying the code and wall-clock duration.

use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::oneshot;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("spawn failed: {0}")]
    Spawn(String),
    #[error("exec I/O failed: {0}")]
    Io(String),
    #[error("exec timed out after {0:?}")]
    Timeout(Duration),
    #[error("exec cancelled")]
    Cancelled,
    #[error("exec supervisor dropped before exit")]
    Interrupted,
}

/// Final exit of an exec'd command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecExit {
    pub exit_code: i32,
    pub duration: Duration,
}

impl ExecExit {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

type ByteSink = Box<dyn AsyncWrite + Send + Unpin>;
type ByteSource = Box<dyn AsyncRead + Send + Unpin>;

/// A running command: write stdin, read stdout/stderr, await exit.
pub struct ExecStream {
    pub stdin: Option<ByteSink>,
    pub stdout: ByteSource,
    pub stderr: ByteSource,
    pub exit: oneshot::Receiver<Result<ExecExit, ExecError>>,
}

/// Fully-drained result of an [`ExecStream`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit: ExecExit,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit.success()
    }
}

impl ExecStream {
    /// Close stdin, drain both output streams, and wait for exit.
    pub async fn collect(mut self) -> Result<ExecOutput, ExecError> {
        drop(self.stdin.take());

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let out = async {
            self.stdout
                .read_to_end(&mut stdout)
                .await
                .map_err(|e| ExecError::Io(e.to_string()))
        };
        let err = async {
            self.stderr
                .read_to_end(&mut stderr)
                .await
                .map_err(|e| ExecError::Io(e.to_string()))
        };
        let (out, err) = tokio::join!(out, err);
        out?;
        err?;

        let exit = self.exit.await.map_err(|_| ExecError::Interrupted)??;
        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit,
        })
    }
}

#[cfg(test)]
#[path = "exec_tests.rs"]
mod tests;
