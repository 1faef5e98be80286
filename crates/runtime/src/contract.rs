// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Runtime contract consumed by the session orchestrator.
//!
//! Every back-end (local dir, git worktree, ssh host, docker container,
//! dev container, Coder workspace) implements this surface. Variants differ
//! in isolation and lifecycle, never in shape.

use crate::background::BackgroundProcess;
use crate::error::RuntimeError;
use async_trait::async_trait;
use mux_core::event::ErrorType;
use mux_core::exec::ExecStream;
use mux_core::paths::normalize_against;
use mux_core::runtime_config::RuntimeConfig;
use mux_core::workspace::WorkspaceId;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Options for [`Runtime::exec`].
#[derive(Default)]
pub struct ExecOptions {
    pub cwd: String,
    pub env: Vec<(String, String)>,
    /// Seconds-granularity timeout from the tool layer.
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
    pub force_pty: bool,
}

/// Options for [`Runtime::spawn_background`].
pub struct SpawnBackgroundOptions {
    pub cwd: String,
    pub workspace_id: WorkspaceId,
    pub env: Vec<(String, String)>,
    pub niceness: Option<i32>,
}

/// File metadata, uniform across back-ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub exists: bool,
    pub is_dir: bool,
    pub size: u64,
    pub modified_epoch_s: Option<u64>,
}

impl FileStat {
    pub fn missing() -> Self {
        Self { exists: false, is_dir: false, size: 0, modified_epoch_s: None }
    }
}

impl From<mux_ssh::transport::RemoteStat> for FileStat {
    fn from(s: mux_ssh::transport::RemoteStat) -> Self {
        Self {
            exists: s.exists,
            is_dir: s.is_dir,
            size: s.size,
            modified_epoch_s: s.modified_epoch_s,
        }
    }
}

/// Workspace creation parameters.
#[derive(Debug, Clone)]
pub struct CreateParams {
    pub project_path: std::path::PathBuf,
    pub workspace_name: String,
    /// Branch to check out for worktree-backed workspaces.
    pub branch: Option<String>,
}

/// Per-runtime creation behavior flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateFlags {
    /// Skip srcBaseDir resolution until post-create (remote back-ends that
    /// provision their own storage).
    pub deferred_runtime_access: bool,
    /// Collision check uses the persisted config, not the runtime.
    pub config_level_collision_detection: bool,
}

/// Streaming readiness states for `ensure_ready`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessStatus {
    Checking,
    Waiting,
    Starting { log_line: Option<String> },
    Ready,
    Error { message: String },
}

/// Options for [`Runtime::ensure_ready`].
#[derive(Default)]
pub struct EnsureReadyOptions {
    pub status: Option<mpsc::UnboundedSender<ReadinessStatus>>,
    pub cancel: Option<CancellationToken>,
}

/// Result of [`Runtime::ensure_ready`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureReadyOutcome {
    Ready,
    NotReady { error: String, error_type: ErrorType },
}

/// Sink for long-running provisioning output.
pub trait InitLogger: Send + Sync {
    fn log(&self, line: &str);
    fn log_error(&self, line: &str);
}

/// Discards all provisioning output.
pub struct NullInitLogger;

impl InitLogger for NullInitLogger {
    fn log(&self, _line: &str) {}
    fn log_error(&self, _line: &str) {}
}

/// Uniform execution surface over one back-end.
#[async_trait]
pub trait Runtime: Send + Sync {
    fn kind(&self) -> &'static str;

    fn create_flags(&self) -> CreateFlags {
        CreateFlags::default()
    }

    async fn exec(&self, command: &str, opts: ExecOptions) -> Result<ExecStream, RuntimeError>;

    async fn spawn_background(
        &self,
        script: &str,
        opts: SpawnBackgroundOptions,
    ) -> Result<BackgroundProcess, RuntimeError>;

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, RuntimeError>;

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), RuntimeError>;

    async fn stat(&self, path: &str) -> Result<FileStat, RuntimeError>;

    async fn ensure_dir(&self, path: &str) -> Result<(), RuntimeError>;

    /// Expand `~` and produce an absolute path for this back-end.
    async fn resolve_path(&self, path: &str) -> Result<String, RuntimeError>;

    /// Resolve `target` relative to `base` without touching `~`.
    fn normalize_path(&self, target: &str, base: &str) -> String {
        normalize_against(target, Path::new(base)).to_string_lossy().into_owned()
    }

    /// Where a workspace with this name lives for this back-end.
    fn get_workspace_path(
        &self,
        project_path: &Path,
        workspace_name: &str,
    ) -> Result<String, RuntimeError>;

    async fn create_workspace(&self, params: CreateParams) -> Result<String, RuntimeError>;

    async fn init_workspace(&self, _params: &CreateParams) -> Result<(), RuntimeError> {
        Ok(())
    }

    /// Long-running provisioning; streams via `logger`.
    async fn post_create_setup(
        &self,
        _params: &CreateParams,
        _logger: &dyn InitLogger,
    ) -> Result<(), RuntimeError> {
        Ok(())
    }

    /// Derive the final persisted config from a branch name.
    fn finalize_config(
        &self,
        _branch_name: &str,
        cfg: RuntimeConfig,
    ) -> Result<RuntimeConfig, RuntimeError> {
        Ok(cfg)
    }

    async fn validate_before_persist(
        &self,
        _branch_name: &str,
        _cfg: &RuntimeConfig,
    ) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn rename_workspace(
        &self,
        project_path: &Path,
        from: &str,
        to: &str,
    ) -> Result<(), RuntimeError>;

    async fn delete_workspace(
        &self,
        project_path: &Path,
        name: &str,
        force: bool,
        cancel: Option<CancellationToken>,
    ) -> Result<(), RuntimeError>;

    async fn fork_workspace(
        &self,
        project_path: &Path,
        from: &str,
        to: &str,
    ) -> Result<String, RuntimeError>;

    async fn ensure_ready(
        &self,
        _opts: EnsureReadyOptions,
    ) -> Result<EnsureReadyOutcome, RuntimeError> {
        Ok(EnsureReadyOutcome::Ready)
    }

    async fn temp_dir(&self) -> Result<String, RuntimeError>;

    async fn get_mux_home(&self) -> Result<String, RuntimeError>;
}
