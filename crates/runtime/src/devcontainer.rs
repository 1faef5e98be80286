// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dev Container runtime: docker exec plus host→container path mapping.
//!
//! The frontend hands us host paths (possibly Windows-style); everything
//! that crosses into the container goes through the mapping in
//! `mux_core::paths` first. A cwd that cannot map falls back to the mounted
//! workspace folder.

use crate::background::BackgroundProcess;
use crate::base::RuntimeBase;
use crate::contract::{
    CreateFlags, CreateParams, ExecOptions, FileStat, Runtime, SpawnBackgroundOptions,
};
use crate::docker::DockerRuntime;
use crate::error::RuntimeError;
use async_trait::async_trait;
use mux_core::exec::ExecStream;
use mux_core::paths::{looks_windowsish, map_host_path_to_container, quote_for_container};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

pub struct DevcontainerRuntime {
    inner: DockerRuntime,
    /// Host path of the workspace currently mounted into the container.
    current_workspace_path: PathBuf,
    workspace_folder: String,
}

impl DevcontainerRuntime {
    pub fn new(
        base: RuntimeBase,
        project_path: &Path,
        workspace_name: &str,
        workspace_folder: Option<String>,
    ) -> Self {
        let inner = DockerRuntime::new(base, project_path, workspace_name, None, None);
        let workspace_folder =
            workspace_folder.unwrap_or_else(|| inner.workspace_folder().to_string());
        Self {
            inner,
            current_workspace_path: project_path.to_path_buf(),
            workspace_folder,
        }
    }

    /// Map a host path into the container, if it lives under the workspace.
    pub fn map_host_path(&self, host_path: &str) -> Option<String> {
        map_host_path_to_container(host_path, &self.current_workspace_path, &self.workspace_folder)
    }

    /// Container cwd for an exec: mapped host path, or the workspace folder
    /// for anything backslashed, drive-lettered, or outside the workspace.
    fn container_cwd(&self, host_cwd: &str) -> String {
        if host_cwd.is_empty() || looks_windowsish(host_cwd) {
            return self.workspace_folder.clone();
        }
        self.map_host_path(host_cwd).unwrap_or_else(|| {
            // Already a container path, or unmappable: keep absolute
            // container paths, punt everything else to the workspace folder.
            if host_cwd.starts_with('/') {
                host_cwd.to_string()
            } else {
                self.workspace_folder.clone()
            }
        })
    }

    /// Quote a path for interpolation into a container shell command;
    /// `~`-prefixed paths become `"$HOME/..."`.
    pub fn quote_path(&self, path: &str) -> String {
        quote_for_container(path)
    }
}

#[async_trait]
impl Runtime for DevcontainerRuntime {
    fn kind(&self) -> &'static str {
        "devcontainer"
    }

    fn create_flags(&self) -> CreateFlags {
        self.inner.create_flags()
    }

    async fn exec(&self, command: &str, opts: ExecOptions) -> Result<ExecStream, RuntimeError> {
        let mut opts = opts;
        opts.cwd = self.container_cwd(&opts.cwd);
        self.inner.exec(command, opts).await
    }

    async fn spawn_background(
        &self,
        script: &str,
        opts: SpawnBackgroundOptions,
    ) -> Result<BackgroundProcess, RuntimeError> {
        let mut opts = opts;
        opts.cwd = self.container_cwd(&opts.cwd);
        self.inner.spawn_background(script, opts).await
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, RuntimeError> {
        let mapped = self.map_host_path(path).unwrap_or_else(|| path.to_string());
        self.inner.read_file(&mapped).await
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), RuntimeError> {
        let mapped = self.map_host_path(path).unwrap_or_else(|| path.to_string());
        self.inner.write_file(&mapped, contents).await
    }

    async fn stat(&self, path: &str) -> Result<FileStat, RuntimeError> {
        let mapped = self.map_host_path(path).unwrap_or_else(|| path.to_string());
        self.inner.stat(&mapped).await
    }

    async fn ensure_dir(&self, path: &str) -> Result<(), RuntimeError> {
        let mapped = self.map_host_path(path).unwrap_or_else(|| path.to_string());
        self.inner.ensure_dir(&mapped).await
    }

    async fn resolve_path(&self, path: &str) -> Result<String, RuntimeError> {
        if let Some(mapped) = self.map_host_path(path) {
            return Ok(mapped);
        }
        if looks_windowsish(path) {
            // A host-style path that didn't map has no container equivalent.
            return Err(mux_core::paths::PathError::OutsideWorkspace {
                path: path.to_string(),
            }
            .into());
        }
        self.inner.resolve_path(path).await
    }

    fn get_workspace_path(
        &self,
        _project_path: &Path,
        _workspace_name: &str,
    ) -> Result<String, RuntimeError> {
        Ok(self.workspace_folder.clone())
    }

    async fn create_workspace(&self, params: CreateParams) -> Result<String, RuntimeError> {
        self.inner.create_workspace(params).await?;
        Ok(self.workspace_folder.clone())
    }

    async fn rename_workspace(
        &self,
        project_path: &Path,
        from: &str,
        to: &str,
    ) -> Result<(), RuntimeError> {
        self.inner.rename_workspace(project_path, from, to).await
    }

    async fn delete_workspace(
        &self,
        project_path: &Path,
        name: &str,
        force: bool,
        cancel: Option<CancellationToken>,
    ) -> Result<(), RuntimeError> {
        self.inner.delete_workspace(project_path, name, force, cancel).await
    }

    async fn fork_workspace(
        &self,
        project_path: &Path,
        from: &str,
        to: &str,
    ) -> Result<String, RuntimeError> {
        self.inner.fork_workspace(project_path, from, to).await
    }

    async fn ensure_ready(
        &self,
        opts: crate::contract::EnsureReadyOptions,
    ) -> Result<crate::contract::EnsureReadyOutcome, RuntimeError> {
        self.inner.ensure_ready(opts).await
    }

    async fn temp_dir(&self) -> Result<String, RuntimeError> {
        self.inner.temp_dir().await
    }

    async fn get_mux_home(&self) -> Result<String, RuntimeError> {
        self.inner.get_mux_home().await
    }
}

#[cfg(test)]
#[path = "devcontainer_tests.rs"]
mod tests;
