// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Docker-container runtime: commands run through `docker exec`.

use crate::background::{BackgroundProcess, CommandHost};
use crate::base::RuntimeBase;
use crate::contract::{
    CreateFlags, CreateParams, ExecOptions, FileStat, Runtime, SpawnBackgroundOptions,
};
use crate::error::RuntimeError;
use crate::local::{maybe_cancelled, maybe_sleep};
use async_trait::async_trait;
use mux_core::exec::{ExecError, ExecExit, ExecOutput, ExecStream};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

const DEFAULT_IMAGE: &str = "ubuntu:24.04";

/// Derive the managed container name for (project, workspace).
///
/// The digest tiebreaker keeps same-named projects in different directories
/// apart; the readable prefix keeps `docker ps` legible.
pub fn container_name(project_path: &Path, workspace_name: &str) -> String {
    let project = project_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string());
    let mut hasher = Sha256::new();
    hasher.update(project_path.to_string_lossy().as_bytes());
    hasher.update([0]);
    hasher.update(workspace_name.as_bytes());
    let digest = hasher.finalize();
    let sanitize = |s: &str| {
        s.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
            .collect::<String>()
    };
    format!(
        "mux-{}-{}-{:02x}{:02x}{:02x}",
        sanitize(&project),
        sanitize(workspace_name),
        digest[0],
        digest[1],
        digest[2]
    )
}

fn quote(s: &str) -> Result<String, RuntimeError> {
    shlex::try_quote(s)
        .map(|q| q.into_owned())
        .map_err(|_| RuntimeError::Other(format!("unquotable argument: {s:?}")))
}

/// `docker exec` plumbing shared by the runtime and the background host.
pub(crate) struct DockerCli {
    pub(crate) container: String,
}

impl DockerCli {
    pub(crate) fn spawn_exec(
        &self,
        command: &str,
        cwd: Option<&str>,
        env: &[(String, String)],
        timeout: Option<std::time::Duration>,
        cancel: Option<CancellationToken>,
        tty: bool,
    ) -> Result<ExecStream, RuntimeError> {
        let mut cmd = tokio::process::Command::new("docker");
        cmd.arg("exec").arg("-i");
        if tty {
            cmd.arg("-t");
        }
        if let Some(cwd) = cwd {
            cmd.arg("-w").arg(cwd);
        }
        for (key, value) in env {
            cmd.arg("-e").arg(format!("{key}={value}"));
        }
        cmd.arg(&self.container).arg("sh").arg("-c").arg(command);
        cmd.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd.kill_on_drop(true);

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

        let (tx, rx) = tokio::sync::oneshot::channel();
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

    pub(crate) async fn run(&self, script: &str) -> Result<ExecOutput, RuntimeError> {
        let stream = self.spawn_exec(script, None, &[], None, None, false)?;
        Ok(stream.collect().await?)
    }
}

#[async_trait]
impl CommandHost for DockerCli {
    async fn run(&self, script: &str) -> Result<ExecOutput, RuntimeError> {
        DockerCli::run(self, script).await
    }

    async fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>, RuntimeError> {
        let stream = self.spawn_exec(&format!("cat -- {}", quote(path)?), None, &[], None, None, false)?;
        let output = stream.collect().await?;
        if output.success() {
            return Ok(Some(output.stdout.into_bytes()));
        }
        if output.stderr.contains("No such file") {
            return Ok(None);
        }
        Err(RuntimeError::Other(format!("container read failed: {}", output.stderr.trim())))
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), RuntimeError> {
        let script = format!(
            "dest={dest}; mkdir -p \"$(dirname \"$dest\")\" && cat > \"$dest\"",
            dest = quote(path)?
        );
        let mut stream = self.spawn_exec(&script, None, &[], None, None, false)?;
        if let Some(mut stdin) = stream.stdin.take() {
            stdin.write_all(contents).await.map_err(|e| ExecError::Io(e.to_string()))?;
            stdin.shutdown().await.map_err(|e| ExecError::Io(e.to_string()))?;
        }
        let output = stream.collect().await?;
        if !output.success() {
            return Err(RuntimeError::Other(format!(
                "container write failed: {}",
                output.stderr.trim()
            )));
        }
        Ok(())
    }

    async fn ensure_dir(&self, path: &str) -> Result<(), RuntimeError> {
        let output = DockerCli::run(self, &format!("mkdir -p {}", quote(path)?)).await?;
        if !output.success() {
            return Err(RuntimeError::Other(format!("mkdir failed: {}", output.stderr.trim())));
        }
        Ok(())
    }

    async fn process_alive(&self, pid: i32) -> Result<bool, RuntimeError> {
        let output = DockerCli::run(self, &format!("kill -0 {pid} 2>/dev/null")).await?;
        Ok(output.success())
    }
}

pub struct DockerRuntime {
    base: RuntimeBase,
    cli: Arc<DockerCli>,
    image: String,
    workspace_folder: String,
}

impl DockerRuntime {
    pub fn new(
        base: RuntimeBase,
        project_path: &Path,
        workspace_name: &str,
        image: Option<String>,
        container: Option<String>,
    ) -> Self {
        let container =
            container.unwrap_or_else(|| container_name(project_path, workspace_name));
        let workspace_folder = format!("/workspaces/{workspace_name}");
        Self {
            base,
            cli: Arc::new(DockerCli { container }),
            image: image.unwrap_or_else(|| DEFAULT_IMAGE.to_string()),
            workspace_folder,
        }
    }

    pub fn container(&self) -> &str {
        &self.cli.container
    }

    pub(crate) fn workspace_folder(&self) -> &str {
        &self.workspace_folder
    }

    pub(crate) fn cli(&self) -> Arc<DockerCli> {
        self.cli.clone()
    }

    async fn docker(&self, args: &[&str]) -> Result<String, RuntimeError> {
        let output = tokio::process::Command::new("docker").args(args).output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RuntimeError::Other(format!(
                "docker {} failed: {}",
                args.first().unwrap_or(&""),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn container_state(&self) -> Result<Option<String>, RuntimeError> {
        let output = tokio::process::Command::new("docker")
            .args(["inspect", "--format", "{{.State.Status}}", &self.cli.container])
            .output()
            .await?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
    }
}

#[async_trait]
impl Runtime for DockerRuntime {
    fn kind(&self) -> &'static str {
        "docker"
    }

    fn create_flags(&self) -> CreateFlags {
        CreateFlags { deferred_runtime_access: true, config_level_collision_detection: true }
    }

    async fn exec(&self, command: &str, opts: ExecOptions) -> Result<ExecStream, RuntimeError> {
        let cwd = if opts.cwd.is_empty() { self.workspace_folder.clone() } else { opts.cwd.clone() };
        self.cli.spawn_exec(
            command,
            Some(&cwd),
            &opts.env,
            opts.timeout,
            opts.cancel.clone(),
            opts.force_pty,
        )
    }

    async fn spawn_background(
        &self,
        script: &str,
        opts: SpawnBackgroundOptions,
    ) -> Result<BackgroundProcess, RuntimeError> {
        BackgroundProcess::spawn(self.cli.clone(), script, &opts, "/tmp/mux-background").await
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, RuntimeError> {
        CommandHost::read_file(self.cli.as_ref(), path)
            .await?
            .ok_or_else(|| RuntimeError::Other(format!("container path not found: {path}")))
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), RuntimeError> {
        CommandHost::write_file(self.cli.as_ref(), path, contents).await
    }

    async fn stat(&self, path: &str) -> Result<FileStat, RuntimeError> {
        let script = format!(
            "p={p}; if [ ! -e \"$p\" ]; then echo missing; exit 0; fi; \
             if [ -d \"$p\" ]; then t=dir; else t=file; fi; \
             s=$(stat -c %s \"$p\" 2>/dev/null || echo 0); \
             m=$(stat -c %Y \"$p\" 2>/dev/null || echo 0); \
             echo \"$t $s $m\"",
            p = quote(path)?
        );
        let output = DockerCli::run(self.cli.as_ref(), &script).await?;
        let line = output.stdout.trim();
        if line == "missing" {
            return Ok(FileStat::missing());
        }
        let mut fields = line.split_whitespace();
        let kind = fields.next().unwrap_or_default();
        Ok(FileStat {
            exists: true,
            is_dir: kind == "dir",
            size: fields.next().and_then(|s| s.parse().ok()).unwrap_or(0),
            modified_epoch_s: fields.next().and_then(|s| s.parse().ok()),
        })
    }

    async fn ensure_dir(&self, path: &str) -> Result<(), RuntimeError> {
        CommandHost::ensure_dir(self.cli.as_ref(), path).await
    }

    async fn resolve_path(&self, path: &str) -> Result<String, RuntimeError> {
        if path.starts_with('/') {
            return Ok(path.to_string());
        }
        let script = match path.strip_prefix("~/") {
            Some(rest) => format!("printf '%s/%s' \"$HOME\" {}", quote(rest)?),
            None if path == "~" => "printf '%s' \"$HOME\"".to_string(),
            None => format!("printf '%s/%s' {} {}", quote(&self.workspace_folder)?, quote(path)?),
        };
        let output = DockerCli::run(self.cli.as_ref(), &script).await?;
        Ok(output.stdout.trim().to_string())
    }

    fn get_workspace_path(
        &self,
        _project_path: &Path,
        workspace_name: &str,
    ) -> Result<String, RuntimeError> {
        Ok(format!("/workspaces/{workspace_name}"))
    }

    async fn create_workspace(&self, params: CreateParams) -> Result<String, RuntimeError> {
        let workspace_path = format!("/workspaces/{}", params.workspace_name);
        match self.container_state().await? {
            Some(state) if state == "running" => {}
            Some(_) => {
                self.docker(&["start", &self.cli.container]).await?;
            }
            None => {
                self.docker(&[
                    "run",
                    "-d",
                    "--name",
                    &self.cli.container,
                    "--label",
                    "dev.mux.managed=1",
                    &self.image,
                    "sleep",
                    "infinity",
                ])
                .await?;
            }
        }
        CommandHost::ensure_dir(self.cli.as_ref(), &workspace_path).await?;
        Ok(workspace_path)
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
        let new_name = container_name(project_path, to);
        self.docker(&["rename", &self.cli.container, &new_name]).await?;
        Ok(())
    }

    async fn delete_workspace(
        &self,
        _project_path: &Path,
        name: &str,
        force: bool,
        _cancel: Option<CancellationToken>,
    ) -> Result<(), RuntimeError> {
        match self.container_state().await? {
            None => Ok(()),
            Some(state) => {
                if state == "running" && !force {
                    return Err(RuntimeError::DeleteBlocked(format!(
                        "container for {name} is still running"
                    )));
                }
                self.docker(&["rm", "-f", &self.cli.container]).await?;
                Ok(())
            }
        }
    }

    async fn fork_workspace(
        &self,
        _project_path: &Path,
        _from: &str,
        _to: &str,
    ) -> Result<String, RuntimeError> {
        Err(RuntimeError::Other("docker workspaces cannot be forked".into()))
    }

    async fn temp_dir(&self) -> Result<String, RuntimeError> {
        Ok("/tmp".to_string())
    }

    async fn get_mux_home(&self) -> Result<String, RuntimeError> {
        Ok(self.base.mux_home.to_string_lossy().into_owned())
    }
}

#[cfg(test)]
#[path = "docker_tests.rs"]
mod tests;
