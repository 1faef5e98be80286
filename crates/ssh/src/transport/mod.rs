// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire protocol over ssh: exec streams, file I/O, stat, path resolution.
//!
//! Two variants carry the same contract: [`openssh_process::OpenSshTransport`]
//! spawns the native `ssh` binary with a shared control master, and
//! [`mux_session::MuxTransport`] drives a single multiplexed session through
//! the `openssh` crate. Neither touches connection health; callers bracket
//! every call with `ConnectionPool::acquire`.

pub mod mux_session;
pub mod openssh_process;

pub use mux_session::MuxTransport;
pub use openssh_process::{OpenSshProber, OpenSshTransport};

use async_trait::async_trait;
use mux_core::exec::{ExecError, ExecExit, ExecStream};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("exec failed: {0}")]
    Exec(#[from] ExecError),
    #[error("remote path not found: {0}")]
    NotFound(String),
    #[error("remote command failed ({code}): {stderr}")]
    CommandFailed { code: i32, stderr: String },
    #[error("transport protocol error: {0}")]
    Protocol(String),
}

/// Per-exec options.
#[derive(Default)]
pub struct ExecRequest {
    pub cwd: Option<String>,
    pub env: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    pub force_pty: bool,
    pub cancel: Option<CancellationToken>,
}

/// Remote file metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStat {
    pub exists: bool,
    pub is_dir: bool,
    pub size: u64,
    pub modified_epoch_s: Option<u64>,
}

impl RemoteStat {
    pub fn missing() -> Self {
        Self { exists: false, is_dir: false, size: 0, modified_epoch_s: None }
    }
}

/// One wire protocol implementation.
#[async_trait]
pub trait SshTransport: Send + Sync {
    async fn exec(&self, command: &str, req: ExecRequest) -> Result<ExecStream, TransportError>;

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, TransportError> {
        let stream = self.exec(&read_snippet(path)?, ExecRequest::default()).await?;
        let (stdout, stderr, exit) = drain_bytes(stream).await?;
        if exit.success() {
            return Ok(stdout);
        }
        let stderr = String::from_utf8_lossy(&stderr).into_owned();
        if stderr.contains("No such file") {
            return Err(TransportError::NotFound(path.to_string()));
        }
        Err(TransportError::CommandFailed { code: exit.exit_code, stderr })
    }

    /// Atomic write: stream to a temp file next to the target, then rename.
    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), TransportError> {
        let stream = self.exec(&write_snippet(path)?, ExecRequest::default()).await?;
        let (_, stderr, exit) = feed_and_drain(stream, contents).await?;
        if exit.success() {
            return Ok(());
        }
        Err(TransportError::CommandFailed {
            code: exit.exit_code,
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }

    async fn stat(&self, path: &str) -> Result<RemoteStat, TransportError> {
        let stream = self.exec(&stat_snippet(path)?, ExecRequest::default()).await?;
        let (stdout, stderr, exit) = drain_bytes(stream).await?;
        if !exit.success() {
            return Err(TransportError::CommandFailed {
                code: exit.exit_code,
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            });
        }
        parse_stat(&String::from_utf8_lossy(&stdout))
    }

    /// Expand `~` and resolve to an absolute path via the remote shell.
    async fn resolve_path(&self, path: &str) -> Result<String, TransportError> {
        let stream = self.exec(&resolve_snippet(path)?, ExecRequest::default()).await?;
        let (stdout, stderr, exit) = drain_bytes(stream).await?;
        if !exit.success() {
            return Err(TransportError::CommandFailed {
                code: exit.exit_code,
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&stdout).trim_end_matches('\n').to_string())
    }
}

pub(crate) fn quote(s: &str) -> Result<String, TransportError> {
    shlex::try_quote(s)
        .map(|q| q.into_owned())
        .map_err(|_| TransportError::Protocol(format!("unquotable argument: {s:?}")))
}

/// Prefix a remote command with env exports and a cwd change.
pub(crate) fn assemble_command(command: &str, req: &ExecRequest) -> Result<String, TransportError> {
    let mut prefix = String::new();
    for (key, value) in &req.env {
        if !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(TransportError::Protocol(format!("invalid env key: {key:?}")));
        }
        prefix.push_str(&format!("export {}={}; ", key, quote(value)?));
    }
    match &req.cwd {
        Some(cwd) => Ok(format!("{}cd {} && {{ {}\n}}", prefix, quote(cwd)?, command)),
        None => Ok(format!("{prefix}{command}")),
    }
}

fn read_snippet(path: &str) -> Result<String, TransportError> {
    Ok(format!("cat -- {}", quote(path)?))
}

fn write_snippet(path: &str) -> Result<String, TransportError> {
    let dest = quote(path)?;
    Ok(format!(
        "dest={dest}; dir=$(dirname \"$dest\"); mkdir -p \"$dir\" && \
         tmp=$(mktemp \"$dir/.mux-write.XXXXXX\") && cat > \"$tmp\" && mv -f \"$tmp\" \"$dest\""
    ))
}

fn stat_snippet(path: &str) -> Result<String, TransportError> {
    let p = quote(path)?;
    Ok(format!(
        "p={p}; if [ ! -e \"$p\" ]; then echo missing; exit 0; fi; \
         if [ -d \"$p\" ]; then t=dir; else t=file; fi; \
         s=$(stat -c %s \"$p\" 2>/dev/null || stat -f %z \"$p\"); \
         m=$(stat -c %Y \"$p\" 2>/dev/null || stat -f %m \"$p\"); \
         echo \"$t $s $m\""
    ))
}

/// Build the `printf` that resolves a path remotely. `~`-prefixes stay
/// outside quotes so the remote shell expands them.
fn resolve_snippet(path: &str) -> Result<String, TransportError> {
    if path == "~" {
        return Ok("printf '%s' \"$HOME\"".to_string());
    }
    if let Some(rest) = path.strip_prefix("~/") {
        return Ok(format!("printf '%s/%s' \"$HOME\" {}", quote(rest)?));
    }
    if let Some(rest) = path.strip_prefix('~') {
        let (user, suffix) = match rest.split_once('/') {
            Some((user, suffix)) => (user, Some(suffix)),
            None => (rest, None),
        };
        if user.is_empty()
            || !user.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(TransportError::Protocol(format!("unresolvable user in {path:?}")));
        }
        return Ok(match suffix {
            Some(suffix) => format!("printf '%s/%s' ~{user} {}", quote(suffix)?),
            None => format!("printf '%s' ~{user}"),
        });
    }
    if path.starts_with('/') {
        return Ok(format!("printf '%s' {}", quote(path)?));
    }
    Ok(format!("printf '%s/%s' \"$HOME\" {}", quote(path)?))
}

fn parse_stat(stdout: &str) -> Result<RemoteStat, TransportError> {
    let line = stdout.trim();
    if line == "missing" {
        return Ok(RemoteStat::missing());
    }
    let mut fields = line.split_whitespace();
    let kind = fields.next().unwrap_or_default();
    let size = fields.next().and_then(|s| s.parse::<u64>().ok());
    let modified = fields.next().and_then(|s| s.parse::<u64>().ok());
    match (kind, size) {
        ("dir" | "file", Some(size)) => Ok(RemoteStat {
            exists: true,
            is_dir: kind == "dir",
            size,
            modified_epoch_s: modified,
        }),
        _ => Err(TransportError::Protocol(format!("unparseable stat output: {line:?}"))),
    }
}

/// Drain stdout/stderr and await exit, keeping raw bytes.
pub(crate) async fn drain_bytes(
    mut stream: ExecStream,
) -> Result<(Vec<u8>, Vec<u8>, ExecExit), ExecError> {
    drop(stream.stdin.take());
    collect_outputs(stream).await
}

/// Write `input` to stdin, close it, then drain.
pub(crate) async fn feed_and_drain(
    mut stream: ExecStream,
    input: &[u8],
) -> Result<(Vec<u8>, Vec<u8>, ExecExit), ExecError> {
    if let Some(mut stdin) = stream.stdin.take() {
        stdin.write_all(input).await.map_err(|e| ExecError::Io(e.to_string()))?;
        stdin.shutdown().await.map_err(|e| ExecError::Io(e.to_string()))?;
    }
    collect_outputs(stream).await
}

async fn collect_outputs(
    mut stream: ExecStream,
) -> Result<(Vec<u8>, Vec<u8>, ExecExit), ExecError> {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let out = async {
        stream.stdout.read_to_end(&mut stdout).await.map_err(|e| ExecError::Io(e.to_string()))
    };
    let err = async {
        stream.stderr.read_to_end(&mut stderr).await.map_err(|e| ExecError::Io(e.to_string()))
    };
    let (out, err) = tokio::join!(out, err);
    out?;
    err?;
    let exit = stream.exit.await.map_err(|_| ExecError::Interrupted)??;
    Ok((stdout, stderr, exit))
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
