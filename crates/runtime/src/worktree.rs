// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Git-worktree runtime: one worktree per workspace under a base directory.

use crate::background::{BackgroundProcess, CommandHost};
use crate::base::RuntimeBase;
use crate::contract::{
    CreateFlags, CreateParams, ExecOptions, FileStat, Runtime, SpawnBackgroundOptions,
};
use crate::error::RuntimeError;
use crate::local::{spawn_local, LocalFs, LocalHost};
use async_trait::async_trait;
use mux_core::exec::ExecStream;
use mux_core::paths::expand_tilde;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct WorktreeRuntime {
    base: RuntimeBase,
    src_base_dir: PathBuf,
    host: Arc<LocalHost>,
}

impl WorktreeRuntime {
    pub fn new(base: RuntimeBase, src_base_dir: PathBuf) -> Self {
        Self { base, src_base_dir, host: Arc::new(LocalHost) }
    }

    fn project_slot(&self, project_path: &Path) -> PathBuf {
        let project = project_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".to_string());
        self.src_base_dir.join(project)
    }

    async fn git(&self, repo: &Path, args: &[&str]) -> Result<String, RuntimeError> {
        let output = tokio::process::Command::new("git")
            .arg("-C")
            .arg(repo)
            .args(args)
            .env_remove("GIT_DIR")
            .env_remove("GIT_WORK_TREE")
            .output()
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RuntimeError::Other(format!(
                "git {} failed: {}",
                args.first().unwrap_or(&""),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl Runtime for WorktreeRuntime {
    fn kind(&self) -> &'static str {
        "worktree"
    }

    fn create_flags(&self) -> CreateFlags {
        CreateFlags::default()
    }

    async fn exec(&self, command: &str, opts: ExecOptions) -> Result<ExecStream, RuntimeError> {
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
        Ok(expanded.to_string_lossy().into_owned())
    }

    fn get_workspace_path(
        &self,
        project_path: &Path,
        workspace_name: &str,
    ) -> Result<String, RuntimeError> {
        Ok(self.project_slot(project_path).join(workspace_name).to_string_lossy().into_owned())
    }

    async fn create_workspace(&self, params: CreateParams) -> Result<String, RuntimeError> {
        let path = PathBuf::from(
            self.get_workspace_path(&params.project_path, &params.workspace_name)?,
        );
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let branch = params.branch.clone().unwrap_or_else(|| params.workspace_name.clone());
        self.git(
            &params.project_path,
            &["worktree", "add", "-b", &branch, &path.to_string_lossy(), "HEAD"],
        )
        .await?;
        Ok(path.to_string_lossy().into_owned())
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
        let from_path = self.get_workspace_path(project_path, from)?;
        let to_path = self.get_workspace_path(project_path, to)?;
        self.git(project_path, &["worktree", "move", &from_path, &to_path]).await?;
        // Branch follows the workspace name when it still matches.
        let _ = self.git(project_path, &["branch", "-m", from, to]).await;
        Ok(())
    }

    async fn delete_workspace(
        &self,
        project_path: &Path,
        name: &str,
        force: bool,
        _cancel: Option<CancellationToken>,
    ) -> Result<(), RuntimeError> {
        let path = self.get_workspace_path(project_path, name)?;
        if !Path::new(&path).exists() {
            return Ok(());
        }
        if !force {
            let dirty = self.git(Path::new(&path), &["status", "--porcelain"]).await?;
            if !dirty.trim().is_empty() {
                return Err(RuntimeError::DeleteBlocked(format!(
                    "worktree {name} has uncommitted changes"
                )));
            }
        }
        self.git(project_path, &["worktree", "remove", "--force", &path]).await?;
        let _ = self.git(project_path, &["branch", "-D", name]).await;
        Ok(())
    }

    async fn fork_workspace(
        &self,
        project_path: &Path,
        from: &str,
        to: &str,
    ) -> Result<String, RuntimeError> {
        let to_path = self.get_workspace_path(project_path, to)?;
        if let Some(parent) = Path::new(&to_path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.git(project_path, &["worktree", "add", "-b", to, &to_path, from]).await?;
        Ok(to_path)
    }

    async fn temp_dir(&self) -> Result<String, RuntimeError> {
        Ok(std::env::temp_dir().to_string_lossy().into_owned())
    }

    async fn get_mux_home(&self) -> Result<String, RuntimeError> {
        Ok(self.base.mux_home.to_string_lossy().into_owned())
    }
}

#[cfg(test)]
#[path = "worktree_tests.rs"]
mod tests;
