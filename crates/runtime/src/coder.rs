// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coder-hosted SSH runtime.
//!
//! Composes an inner [`SshRuntime`] with the Coder control-plane client.
//! The Coder service owns workspace lifecycle; we normalize host names to
//! `<workspace>.mux--coder` and gate every use behind `ensure_ready`.

use crate::background::BackgroundProcess;
use crate::contract::{
    CreateFlags, CreateParams, EnsureReadyOptions, EnsureReadyOutcome, ExecOptions, FileStat,
    ReadinessStatus, Runtime, SpawnBackgroundOptions,
};
use crate::error::RuntimeError;
use crate::ssh::SshRuntime;
use async_trait::async_trait;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use mux_core::event::ErrorType;
use mux_core::exec::ExecStream;
use mux_core::runtime_config::{CoderConfig, RuntimeConfig};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Host suffix that routes through the Coder ssh proxy.
pub const CODER_HOST_SUFFIX: &str = ".mux--coder";

/// Skip readiness checks when the workspace was used this recently.
const ACTIVITY_FAST_PATH: Duration = Duration::from_secs(5 * 60);

/// Total budget for one `ensure_ready` attempt.
const ENSURE_READY_BUDGET: Duration = Duration::from_secs(120);

/// Poll cadence while the workspace is stopping/canceling.
const DEFAULT_STOPPING_POLL: Duration = Duration::from_secs(2);

/// Coder workspace lifecycle states the core consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoderWorkspaceStatus {
    Running,
    Stopped,
    Stopping,
    Starting,
    Pending,
    Canceling,
    Deleting,
    Deleted,
    NotFound,
}

/// Contract of the external Coder service.
#[async_trait]
pub trait CoderClient: Send + Sync + 'static {
    async fn workspace_status(
        &self,
        workspace_name: &str,
    ) -> Result<CoderWorkspaceStatus, RuntimeError>;

    /// Start the workspace if needed and stream startup-script log lines.
    async fn wait_for_startup_scripts(
        &self,
        workspace_name: &str,
        lines: mpsc::UnboundedSender<String>,
        cancel: CancellationToken,
    ) -> Result<(), RuntimeError>;

    async fn delete_workspace(&self, workspace_name: &str) -> Result<(), RuntimeError>;
}

/// Derive the Coder workspace name from a branch: lowercase, `_` → `-`,
/// hyphen runs collapsed, edges trimmed.
pub fn workspace_name_for_branch(branch: &str) -> Result<String, RuntimeError> {
    let mut slug = String::with_capacity(branch.len());
    for c in branch.to_lowercase().chars() {
        let c = if c == '_' { '-' } else { c };
        if c == '-' && slug.ends_with('-') {
            continue;
        }
        slug.push(c);
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() || !valid_slug(&slug) {
        return Err(RuntimeError::InvalidName(format!(
            "branch {branch:?} does not reduce to a usable workspace slug"
        )));
    }
    Ok(format!("mux-{slug}"))
}

/// `^[a-zA-Z0-9]+(-[a-zA-Z0-9]+)*$`
fn valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug.split('-').all(|seg| {
            !seg.is_empty() && seg.chars().all(|c| c.is_ascii_alphanumeric())
        })
}

type SharedReady = Shared<BoxFuture<'static, Result<EnsureReadyOutcome, String>>>;

pub struct CoderSshRuntime {
    inner: SshRuntime,
    client: Arc<dyn CoderClient>,
    workspace_name: String,
    last_activity: Mutex<Option<Instant>>,
    in_flight: Mutex<Option<SharedReady>>,
    stopping_poll: Duration,
}

impl CoderSshRuntime {
    pub fn new(inner: SshRuntime, client: Arc<dyn CoderClient>, workspace_name: String) -> Self {
        Self {
            inner,
            client,
            workspace_name,
            last_activity: Mutex::new(None),
            in_flight: Mutex::new(None),
            stopping_poll: DEFAULT_STOPPING_POLL,
        }
    }

    /// Shrink the stopping-poll cadence. Test seam.
    #[cfg(any(test, feature = "test-support"))]
    pub fn set_stopping_poll(&mut self, interval: Duration) {
        self.stopping_poll = interval;
    }

    pub fn workspace_name(&self) -> &str {
        &self.workspace_name
    }

    fn note_activity(&self) {
        *self.last_activity.lock() = Some(Instant::now());
    }

    fn recently_active(&self) -> bool {
        self.last_activity
            .lock()
            .map(|at| at.elapsed() < ACTIVITY_FAST_PATH)
            .unwrap_or(false)
    }
}

/// The readiness state machine: checking → ready, checking → waiting →
/// starting → ready, or checking → error.
async fn run_ensure_ready(
    client: Arc<dyn CoderClient>,
    workspace_name: String,
    status: Option<mpsc::UnboundedSender<ReadinessStatus>>,
    cancel: CancellationToken,
    stopping_poll: Duration,
) -> Result<EnsureReadyOutcome, String> {
    let send = |s: ReadinessStatus| {
        if let Some(tx) = &status {
            let _ = tx.send(s);
        }
    };
    send(ReadinessStatus::Checking);

    let deadline = Instant::now() + ENSURE_READY_BUDGET;
    let mut announced_waiting = false;

    loop {
        if cancel.is_cancelled() {
            return Err("ensure_ready cancelled".to_string());
        }
        if Instant::now() >= deadline {
            send(ReadinessStatus::Error { message: "workspace start timed out".into() });
            return Ok(EnsureReadyOutcome::NotReady {
                error: "workspace start timed out".into(),
                error_type: ErrorType::RuntimeStartFailed,
            });
        }

        let state = client
            .workspace_status(&workspace_name)
            .await
            .map_err(|e| e.to_string())?;
        match state {
            CoderWorkspaceStatus::Running => {
                send(ReadinessStatus::Ready);
                return Ok(EnsureReadyOutcome::Ready);
            }
            CoderWorkspaceStatus::NotFound
            | CoderWorkspaceStatus::Deleting
            | CoderWorkspaceStatus::Deleted => {
                let message = format!("coder workspace {workspace_name} is gone ({state:?})");
                send(ReadinessStatus::Error { message: message.clone() });
                return Ok(EnsureReadyOutcome::NotReady {
                    error: message,
                    error_type: ErrorType::RuntimeNotReady,
                });
            }
            CoderWorkspaceStatus::Stopping | CoderWorkspaceStatus::Canceling => {
                if !announced_waiting {
                    send(ReadinessStatus::Waiting);
                    announced_waiting = true;
                }
                tokio::select! {
                    _ = tokio::time::sleep(stopping_poll) => {}
                    _ = cancel.cancelled() => return Err("ensure_ready cancelled".into()),
                }
            }
            CoderWorkspaceStatus::Stopped
            | CoderWorkspaceStatus::Starting
            | CoderWorkspaceStatus::Pending => {
                send(ReadinessStatus::Starting { log_line: None });
                let (line_tx, mut line_rx) = mpsc::unbounded_channel();
                let forward_status = status.clone();
                let forwarder = tokio::spawn(async move {
                    while let Some(line) = line_rx.recv().await {
                        if let Some(tx) = &forward_status {
                            let _ = tx.send(ReadinessStatus::Starting { log_line: Some(line) });
                        }
                    }
                });
                let result = client
                    .wait_for_startup_scripts(&workspace_name, line_tx, cancel.clone())
                    .await;
                let _ = forwarder.await;
                return match result {
                    Ok(()) => {
                        send(ReadinessStatus::Ready);
                        Ok(EnsureReadyOutcome::Ready)
                    }
                    Err(e) => {
                        let message = e.to_string();
                        let lowered = message.to_lowercase();
                        let error_type =
                            if lowered.contains("not found") || lowered.contains("no access") {
                                ErrorType::RuntimeNotReady
                            } else {
                                ErrorType::RuntimeStartFailed
                            };
                        send(ReadinessStatus::Error { message: message.clone() });
                        Ok(EnsureReadyOutcome::NotReady { error: message, error_type })
                    }
                };
            }
        }
    }
}

#[async_trait]
impl Runtime for CoderSshRuntime {
    fn kind(&self) -> &'static str {
        "coder"
    }

    fn create_flags(&self) -> CreateFlags {
        CreateFlags { deferred_runtime_access: true, config_level_collision_detection: true }
    }

    async fn exec(&self, command: &str, opts: ExecOptions) -> Result<ExecStream, RuntimeError> {
        self.note_activity();
        self.inner.exec(command, opts).await
    }

    async fn spawn_background(
        &self,
        script: &str,
        opts: SpawnBackgroundOptions,
    ) -> Result<BackgroundProcess, RuntimeError> {
        self.note_activity();
        self.inner.spawn_background(script, opts).await
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, RuntimeError> {
        self.inner.read_file(path).await
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), RuntimeError> {
        self.inner.write_file(path, contents).await
    }

    async fn stat(&self, path: &str) -> Result<FileStat, RuntimeError> {
        self.inner.stat(path).await
    }

    async fn ensure_dir(&self, path: &str) -> Result<(), RuntimeError> {
        self.inner.ensure_dir(path).await
    }

    async fn resolve_path(&self, path: &str) -> Result<String, RuntimeError> {
        self.inner.resolve_path(path).await
    }

    fn get_workspace_path(
        &self,
        project_path: &Path,
        workspace_name: &str,
    ) -> Result<String, RuntimeError> {
        self.inner.get_workspace_path(project_path, workspace_name)
    }

    async fn create_workspace(&self, params: CreateParams) -> Result<String, RuntimeError> {
        self.inner.create_workspace(params).await
    }

    /// Derive `mux-<slug>` and the proxy host from the branch name.
    fn finalize_config(
        &self,
        branch_name: &str,
        cfg: RuntimeConfig,
    ) -> Result<RuntimeConfig, RuntimeError> {
        let workspace_name = workspace_name_for_branch(branch_name)?;
        match cfg {
            RuntimeConfig::Ssh(mut ssh) => {
                ssh.host = format!("{workspace_name}{CODER_HOST_SUFFIX}");
                ssh.coder = Some(CoderConfig { workspace_name: Some(workspace_name) });
                Ok(RuntimeConfig::Ssh(ssh))
            }
            other => Err(RuntimeError::Incompatible { kind: other.kind().to_string() }),
        }
    }

    async fn validate_before_persist(
        &self,
        branch_name: &str,
        _cfg: &RuntimeConfig,
    ) -> Result<(), RuntimeError> {
        workspace_name_for_branch(branch_name).map(|_| ())
    }

    async fn rename_workspace(
        &self,
        _project_path: &Path,
        _from: &str,
        _to: &str,
    ) -> Result<(), RuntimeError> {
        Err(RuntimeError::Other(
            "coder workspaces are named by branch; rename the branch and re-finalize".into(),
        ))
    }

    /// Skip ssh cleanup when the control plane says the host is already
    /// gone; otherwise clean over ssh first, then ask Coder to delete. A
    /// partial failure reports both sides.
    async fn delete_workspace(
        &self,
        project_path: &Path,
        name: &str,
        force: bool,
        cancel: Option<CancellationToken>,
    ) -> Result<(), RuntimeError> {
        let state = self.client.workspace_status(&self.workspace_name).await?;
        let host_gone = matches!(
            state,
            CoderWorkspaceStatus::NotFound
                | CoderWorkspaceStatus::Deleting
                | CoderWorkspaceStatus::Deleted
        );

        let ssh_result = if host_gone {
            Ok(())
        } else {
            self.inner.delete_workspace(project_path, name, force, cancel).await
        };
        if let Err(RuntimeError::DeleteBlocked(reason)) = ssh_result {
            // Don't tear down the Coder workspace under a blocked delete.
            return Err(RuntimeError::DeleteBlocked(reason));
        }

        let coder_result = self.client.delete_workspace(&self.workspace_name).await;
        match (ssh_result, coder_result) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(ssh), Ok(())) => Err(ssh),
            (Ok(()), Err(coder)) => Err(coder),
            (Err(ssh), Err(coder)) => Err(RuntimeError::Other(format!(
                "ssh cleanup failed: {ssh}; coder deletion failed: {coder}"
            ))),
        }
    }

    async fn fork_workspace(
        &self,
        project_path: &Path,
        from: &str,
        to: &str,
    ) -> Result<String, RuntimeError> {
        self.inner.fork_workspace(project_path, from, to).await
    }

    /// Fast-path on recent activity; otherwise drive the readiness FSM,
    /// sharing one in-flight run between concurrent callers.
    async fn ensure_ready(
        &self,
        opts: EnsureReadyOptions,
    ) -> Result<EnsureReadyOutcome, RuntimeError> {
        if self.recently_active() {
            return Ok(EnsureReadyOutcome::Ready);
        }

        let shared = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.as_ref() {
                Some(shared) => shared.clone(),
                None => {
                    let cancel = opts.cancel.clone().unwrap_or_default();
                    let fut = run_ensure_ready(
                        self.client.clone(),
                        self.workspace_name.clone(),
                        opts.status.clone(),
                        cancel,
                        self.stopping_poll,
                    )
                    .boxed()
                    .shared();
                    *in_flight = Some(fut.clone());
                    fut
                }
            }
        };

        let result = shared.clone().await;
        {
            let mut in_flight = self.in_flight.lock();
            if in_flight.as_ref().is_some_and(|f| f.ptr_eq(&shared)) {
                *in_flight = None;
            }
        }

        match result {
            Ok(EnsureReadyOutcome::Ready) => {
                self.note_activity();
                Ok(EnsureReadyOutcome::Ready)
            }
            Ok(other) => Ok(other),
            Err(message) => Err(RuntimeError::StartFailed(message)),
        }
    }

    async fn temp_dir(&self) -> Result<String, RuntimeError> {
        self.inner.temp_dir().await
    }

    async fn get_mux_home(&self) -> Result<String, RuntimeError> {
        self.inner.get_mux_home().await
    }
}

#[cfg(test)]
#[path = "coder_tests.rs"]
mod tests;
