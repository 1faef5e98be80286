// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Remote runtime over a pool-guarded SSH transport.
//!
//! Every operation brackets the transport call with a pool acquire so host
//! health and backoff stay centralized. The remote home directory is fetched
//! once and cached; `~` resolution without it is a `path_unknown_home` error.

use crate::background::{BackgroundProcess, CommandHost};
use crate::base::RuntimeBase;
use crate::contract::{
    CreateFlags, CreateParams, EnsureReadyOptions, EnsureReadyOutcome, ExecOptions, FileStat,
    ReadinessStatus, Runtime, SpawnBackgroundOptions,
};
use crate::error::RuntimeError;
use async_trait::async_trait;
use mux_core::event::ErrorType;
use mux_core::exec::{ExecOutput, ExecStream};
use mux_core::paths::{expand_tilde, PathError};
use mux_ssh::config::SshConfig;
use mux_ssh::pool::{AcquireOptions, ConnectionPool, Prober};
use mux_ssh::transport::{ExecRequest, SshTransport, TransportError};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn quote(s: &str) -> Result<String, RuntimeError> {
    shlex::try_quote(s)
        .map(|q| q.into_owned())
        .map_err(|_| RuntimeError::Other(format!("unquotable argument: {s:?}")))
}

/// CommandHost over the transport, for the background supervisor.
pub(crate) struct SshHost {
    config: SshConfig,
    pool: Arc<ConnectionPool>,
    transport: Arc<dyn SshTransport>,
}

impl SshHost {
    async fn acquire(&self) -> Result<(), RuntimeError> {
        self.pool.acquire(&self.config, &AcquireOptions::default()).await?;
        Ok(())
    }
}

#[async_trait]
impl CommandHost for SshHost {
    async fn run(&self, script: &str) -> Result<ExecOutput, RuntimeError> {
        self.acquire().await?;
        let stream = self.transport.exec(script, ExecRequest::default()).await?;
        Ok(stream.collect().await?)
    }

    async fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>, RuntimeError> {
        self.acquire().await?;
        match self.transport.read_file(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(TransportError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), RuntimeError> {
        self.acquire().await?;
        Ok(self.transport.write_file(path, contents).await?)
    }

    async fn ensure_dir(&self, path: &str) -> Result<(), RuntimeError> {
        let output = self.run(&format!("mkdir -p {}", quote(path)?)).await?;
        if !output.success() {
            return Err(RuntimeError::Other(format!("mkdir failed: {}", output.stderr.trim())));
        }
        Ok(())
    }

    async fn process_alive(&self, pid: i32) -> Result<bool, RuntimeError> {
        let output = self.run(&format!("kill -0 {pid} 2>/dev/null")).await?;
        Ok(output.success())
    }
}

pub struct SshRuntime {
    base: RuntimeBase,
    config: SshConfig,
    pool: Arc<ConnectionPool>,
    transport: Arc<dyn SshTransport>,
    host: Arc<SshHost>,
    remote_home: Mutex<Option<String>>,
}

impl SshRuntime {
    pub fn new(
        base: RuntimeBase,
        config: SshConfig,
        pool: Arc<ConnectionPool>,
        transport: Arc<dyn SshTransport>,
    ) -> Self {
        let host = Arc::new(SshHost {
            config: config.clone(),
            pool: pool.clone(),
            transport: transport.clone(),
        });
        Self { base, config, pool, transport, host, remote_home: Mutex::new(None) }
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    async fn acquire(&self) -> Result<(), RuntimeError> {
        self.pool.acquire(&self.config, &AcquireOptions::default()).await?;
        Ok(())
    }

    /// Cached remote home; fetched through the transport on first use.
    pub(crate) async fn remote_home(&self) -> Result<String, RuntimeError> {
        if let Some(home) = self.remote_home.lock().clone() {
            return Ok(home);
        }
        self.acquire().await?;
        let home = self.transport.resolve_path("~").await?;
        if home.is_empty() {
            return Err(PathError::UnknownHome { path: "~".into() }.into());
        }
        *self.remote_home.lock() = Some(home.clone());
        Ok(home)
    }

    fn remote_workspace_root(home: &str) -> String {
        format!("{home}/mux")
    }
}

#[async_trait]
impl Runtime for SshRuntime {
    fn kind(&self) -> &'static str {
        "ssh"
    }

    fn create_flags(&self) -> CreateFlags {
        CreateFlags { deferred_runtime_access: true, config_level_collision_detection: true }
    }

    async fn exec(&self, command: &str, opts: ExecOptions) -> Result<ExecStream, RuntimeError> {
        self.acquire().await?;
        let req = ExecRequest {
            cwd: if opts.cwd.is_empty() { None } else { Some(opts.cwd.clone()) },
            env: opts.env.clone(),
            timeout: opts.timeout,
            force_pty: opts.force_pty,
            cancel: opts.cancel.clone(),
        };
        Ok(self.transport.exec(command, req).await?)
    }

    async fn spawn_background(
        &self,
        script: &str,
        opts: SpawnBackgroundOptions,
    ) -> Result<BackgroundProcess, RuntimeError> {
        let home = self.remote_home().await?;
        let bg_root = format!("{home}/.mux/background");
        BackgroundProcess::spawn(self.host.clone(), script, &opts, &bg_root).await
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, RuntimeError> {
        self.acquire().await?;
        Ok(self.transport.read_file(path).await?)
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), RuntimeError> {
        self.acquire().await?;
        Ok(self.transport.write_file(path, contents).await?)
    }

    async fn stat(&self, path: &str) -> Result<FileStat, RuntimeError> {
        self.acquire().await?;
        Ok(self.transport.stat(path).await?.into())
    }

    async fn ensure_dir(&self, path: &str) -> Result<(), RuntimeError> {
        CommandHost::ensure_dir(self.host.as_ref(), path).await
    }

    async fn resolve_path(&self, path: &str) -> Result<String, RuntimeError> {
        if path.starts_with('~') {
            let home = self.remote_home().await.map_err(|_| PathError::UnknownHome {
                path: path.to_string(),
            })?;
            let expanded = expand_tilde(path, Some(Path::new(&home)))?;
            return Ok(expanded.to_string_lossy().into_owned());
        }
        if path.starts_with('/') {
            return Ok(path.to_string());
        }
        let home = self.remote_home().await?;
        Ok(format!("{home}/{path}"))
    }

    fn get_workspace_path(
        &self,
        project_path: &Path,
        workspace_name: &str,
    ) -> Result<String, RuntimeError> {
        let project = project_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".to_string());
        Ok(format!("~/mux/{project}/{workspace_name}"))
    }

    async fn create_workspace(&self, params: CreateParams) -> Result<String, RuntimeError> {
        let home = self.remote_home().await?;
        let root = Self::remote_workspace_root(&home);
        let project = params
            .project_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".to_string());
        let path = format!("{root}/{project}/{}", params.workspace_name);
        CommandHost::ensure_dir(self.host.as_ref(), &path).await?;
        Ok(path)
    }

    async fn rename_workspace(
        &self,
        project_path: &Path,
        from: &str,
        to: &str,
    ) -> Result<(), RuntimeError> {
        if from == to {
            return Ok(());
        }
        let from_path = self.resolve_path(&self.get_workspace_path(project_path, from)?).await?;
        let to_path = self.resolve_path(&self.get_workspace_path(project_path, to)?).await?;
        let output = self
            .host
            .run(&format!("mv {} {}", quote(&from_path)?, quote(&to_path)?))
            .await?;
        if !output.success() {
            return Err(RuntimeError::Other(format!(
                "rename failed: {}",
                output.stderr.trim()
            )));
        }
        Ok(())
    }

    async fn delete_workspace(
        &self,
        project_path: &Path,
        name: &str,
        force: bool,
        _cancel: Option<CancellationToken>,
    ) -> Result<(), RuntimeError> {
        let path = self.resolve_path(&self.get_workspace_path(project_path, name)?).await?;
        let quoted = quote(&path)?;
        if !force {
            let check = self
                .host
                .run(&format!(
                    "[ -d {quoted}/.git ] && git -C {quoted} status --porcelain || true"
                ))
                .await?;
            if !check.stdout.trim().is_empty() {
                return Err(RuntimeError::DeleteBlocked(format!(
                    "workspace {name} has uncommitted changes"
                )));
            }
        }
        let output = self.host.run(&format!("rm -rf {quoted}")).await?;
        if !output.success() {
            return Err(RuntimeError::Other(format!("delete failed: {}", output.stderr.trim())));
        }
        Ok(())
    }

    async fn fork_workspace(
        &self,
        project_path: &Path,
        from: &str,
        to: &str,
    ) -> Result<String, RuntimeError> {
        let from_path = self.resolve_path(&self.get_workspace_path(project_path, from)?).await?;
        let to_path = self.resolve_path(&self.get_workspace_path(project_path, to)?).await?;
        let output = self
            .host
            .run(&format!("cp -a {} {}", quote(&from_path)?, quote(&to_path)?))
            .await?;
        if !output.success() {
            return Err(RuntimeError::Other(format!("fork failed: {}", output.stderr.trim())));
        }
        Ok(to_path)
    }

    async fn ensure_ready(
        &self,
        opts: EnsureReadyOptions,
    ) -> Result<EnsureReadyOutcome, RuntimeError> {
        if let Some(status) = &opts.status {
            let _ = status.send(ReadinessStatus::Checking);
        }
        match self.acquire().await {
            Ok(()) => {
                if let Some(status) = &opts.status {
                    let _ = status.send(ReadinessStatus::Ready);
                }
                Ok(EnsureReadyOutcome::Ready)
            }
            Err(e) => {
                let message = e.to_string();
                if let Some(status) = &opts.status {
                    let _ = status.send(ReadinessStatus::Error { message: message.clone() });
                }
                Ok(EnsureReadyOutcome::NotReady {
                    error: message,
                    error_type: ErrorType::RuntimeStartFailed,
                })
            }
        }
    }

    async fn temp_dir(&self) -> Result<String, RuntimeError> {
        let output = self.host.run("printf '%s' \"${TMPDIR:-/tmp}\"").await?;
        Ok(output.stdout.trim().to_string())
    }

    async fn get_mux_home(&self) -> Result<String, RuntimeError> {
        let home = self.remote_home().await?;
        Ok(format!("{home}/.mux"))
    }
}

/// Build the default pool + process transport pair for an ssh config.
pub fn default_ssh_stack(config: &SshConfig) -> (Arc<ConnectionPool>, Arc<dyn SshTransport>) {
    let prober: Arc<dyn Prober> = Arc::new(mux_ssh::transport::OpenSshProber);
    let pool = Arc::new(ConnectionPool::new(prober));
    let transport: Arc<dyn SshTransport> =
        Arc::new(mux_ssh::transport::OpenSshTransport::new(config.clone()));
    (pool, transport)
}
