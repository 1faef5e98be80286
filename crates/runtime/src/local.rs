// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Project-directory runtime: commands run in the project itself.
//!
//! No isolation — the workspace path is the project path. This is the
//! fallback for users who opt out of worktrees; `local` configs carrying a
//! `srcBaseDir` are normalized to the worktree runtime before dispatch.

use crate::background::{BackgroundProcess, CommandHost};
use crate::base::RuntimeBase;
use crate::contract::{
    CreateParams, ExecOptions, FileStat, Runtime, SpawnBackgroundOptions,
};
use crate::error::RuntimeError;
use async_trait::async_trait;
use mux_core::exec::{ExecError, ExecExit, ExecOutput, ExecStream};
use mux_core::paths::expand_tilde;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Local shell host for the background supervisor and runtimes.
pub struct LocalHost;

#[async_trait]
impl CommandHost for LocalHost {
    async fn run(&self, script: &str) -> Result<ExecOutput, RuntimeError> {
        let start = Instant::now();
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .output()
            .await?;
        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit: ExecExit {
                exit_code: output.status.code().unwrap_or(-1),
                duration: start.elapsed(),
            },
        })
    }

    async fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>, RuntimeError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), RuntimeError> {
        if let Some(parent) = Path::new(path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, contents).await?;
        Ok(())
    }

    async fn ensure_dir(&self, path: &str) -> Result<(), RuntimeError> {
        tokio::fs::create_dir_all(path).await?;
        Ok(())
    }

    async fn process_alive(&self, pid: i32) -> Result<bool, RuntimeError> {
        Ok(kill(Pid::from_raw(pid), None).is_ok())
    }
}

/// Spawn a local `sh -c` with streaming I/O.
pub(crate) fn spawn_local(command: &str, opts: &ExecOptions) -> Result<ExecStream, RuntimeError> {
    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if !opts.cwd.is_empty() {
        cmd.current_dir(&opts.cwd);
    }
    for (key, value) in &opts.env {
        cmd.env(key, value);
    }

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(|e| ExecError::Spawn(e.to_string()))?;
    let stdin = child.stdin.take().map(|s| Box::new(s) as _);
    let stdout = child
        .stdout
        .take()
        .map(|s| Box::new(s) as _)
        .ok_or_else(|| ExecError::Spawn("child stdout not piped".into()))?;
    let stderr = child
        .stderr
        .take()
        .map(|s| Box::new(s) as _)
        .ok_or_else(|| ExecError::Spawn("child stderr not piped".into()))?;

    let timeout = opts.timeout;
    let cancel = opts.cancel.clone();
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let outcome = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => Ok(ExecExit {
                    exit_code: status.code().unwrap_or(-1),
                    duration: start.elapsed(),
                }),
                Err(e) => Err(ExecError::Io(e.to_string())),
            },
            Some(limit) = maybe_sleep(timeout) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                Err(ExecError::Timeout(limit))
            }
            _ = maybe_cancelled(cancel) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                Err(ExecError::Cancelled)
            }
        };
        let _ = tx.send(outcome);
    });

    Ok(ExecStream { stdin, stdout, stderr, exit: rx })
}

pub(crate) async fn maybe_sleep(timeout: Option<Duration>) -> Option<Duration> {
    match timeout {
        Some(limit) => {
            tokio::time::sleep(limit).await;
            Some(limit)
        }
        None => std::future::pending().await,
    }
}

pub(crate) async fn maybe_cancelled(cancel: Option<CancellationToken>) {
    match cancel {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

/// Shared local file/exec behavior for the dir-backed runtimes.
pub(crate) struct LocalFs;

impl LocalFs {
    pub(crate) async fn read_file(path: &str) -> Result<Vec<u8>, RuntimeError> {
        Ok(tokio::fs::read(path).await?)
    }

    /// Atomic write: temp sibling, then rename.
    pub(crate) async fn write_file(path: &str, contents: &[u8]) -> Result<(), RuntimeError> {
        let target = Path::new(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = target.with_extension("mux-tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, target).await?;
        Ok(())
    }

    pub(crate) async fn stat(path: &str) -> Result<FileStat, RuntimeError> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(FileStat {
                exists: true,
                is_dir: meta.is_dir(),
                size: meta.len(),
                modified_epoch_s: meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs()),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileStat::missing()),
            Err(e) => Err(e.into()),
        }
    }
}

/// The project-directory runtime.
pub struct LocalRuntime {
    base: RuntimeBase,
    project_path: PathBuf,
    host: Arc<LocalHost>,
}

impl LocalRuntime {
    pub fn new(base: RuntimeBase, project_path: PathBuf) -> Self {
        Self { base, project_path, host: Arc::new(LocalHost) }
    }
}

#[async_trait]
impl Runtime for LocalRuntime {
    fn kind(&self) -> &'static str {
        "local"
    }

    async fn exec(&self, command: &str, opts: ExecOptions) -> Result<ExecStream, RuntimeError> {
        let mut opts = opts;
        if opts.cwd.is_empty() {
            opts.cwd = self.project_path.to_string_lossy().into_owned();
        }
        spawn_local(command, &opts)
    }

    async fn spawn_background(
        &self,
        script: &str,
        opts: SpawnBackgroundOptions,
    ) -> Result<BackgroundProcess, RuntimeError> {
        BackgroundProcess::spawn(
            self.host.clone(),
            script,
            &opts,
            &self.base.bg_output_dir.to_string_lossy(),
        )
        .await
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, RuntimeError> {
        LocalFs::read_file(path).await
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), RuntimeError> {
        LocalFs::write_file(path, contents).await
    }

    async fn stat(&self, path: &str) -> Result<FileStat, RuntimeError> {
        LocalFs::stat(path).await
    }

    async fn ensure_dir(&self, path: &str) -> Result<(), RuntimeError> {
        tokio::fs::create_dir_all(path).await?;
        Ok(())
    }

    async fn resolve_path(&self, path: &str) -> Result<String, RuntimeError> {
        let expanded = expand_tilde(path, dirs::home_dir().as_deref())?;
        let absolute = if expanded.is_absolute() {
            expanded
        } else {
            self.project_path.join(expanded)
        };
        Ok(absolute.to_string_lossy().into_owned())
    }

    fn get_workspace_path(
        &self,
        project_path: &Path,
        _workspace_name: &str,
    ) -> Result<String, RuntimeError> {
        // Project-directory mode: the workspace IS the project.
        Ok(project_path.to_string_lossy().into_owned())
    }

    async fn create_workspace(&self, params: CreateParams) -> Result<String, RuntimeError> {
        if !params.project_path.exists() {
            return Err(RuntimeError::NotReady(format!(
                "project directory does not exist: {}",
                params.project_path.display()
            )));
        }
        Ok(params.project_path.to_string_lossy().into_owned())
    }

    async fn rename_workspace(
        &self,
        _project_path: &Path,
        _from: &str,
        _to: &str,
    ) -> Result<(), RuntimeError> {
        // Nothing on disk is named after the workspace.
        Ok(())
    }

    async fn delete_workspace(
        &self,
        _project_path: &Path,
        _name: &str,
        _force: bool,
        _cancel: Option<CancellationToken>,
    ) -> Result<(), RuntimeError> {
        // Never delete the user's project directory.
        Ok(())
    }

    async fn fork_workspace(
        &self,
        _project_path: &Path,
        _from: &str,
        _to: &str,
    ) -> Result<String, RuntimeError> {
        Err(RuntimeError::Other(
            "project-directory workspaces cannot be forked; use a worktree runtime".into(),
        ))
    }

    async fn temp_dir(&self) -> Result<String, RuntimeError> {
        Ok(std::env::temp_dir().to_string_lossy().into_owned())
    }

    async fn get_mux_home(&self) -> Result<String, RuntimeError> {
        Ok(self.base.mux_home.to_string_lossy().into_owned())
    }
}
