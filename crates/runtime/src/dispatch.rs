// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime factory: config variant in, boxed runtime out.

use crate::base::RuntimeBase;
use crate::coder::{CoderClient, CoderSshRuntime, CODER_HOST_SUFFIX};
use crate::contract::Runtime;
use crate::devcontainer::DevcontainerRuntime;
use crate::docker::DockerRuntime;
use crate::error::RuntimeError;
use crate::local::LocalRuntime;
use crate::ssh::{default_ssh_stack, SshRuntime};
use crate::worktree::WorktreeRuntime;
use mux_core::runtime_config::RuntimeConfig;
use mux_ssh::config::SshConfig;
use std::path::PathBuf;
use std::sync::Arc;

/// Context the factory needs beyond the config itself.
pub struct DispatchOptions {
    pub base: RuntimeBase,
    /// Required for project-directory mode and container name derivation.
    pub project_path: Option<PathBuf>,
    pub workspace_name: String,
    /// Required to open Coder-backed configs.
    pub coder_client: Option<Arc<dyn CoderClient>>,
}

impl DispatchOptions {
    pub fn new(workspace_name: impl Into<String>) -> Self {
        Self {
            base: RuntimeBase::new(),
            project_path: None,
            workspace_name: workspace_name.into(),
            coder_client: None,
        }
    }

    fn require_project(&self, kind: &str) -> Result<PathBuf, RuntimeError> {
        self.project_path.clone().ok_or_else(|| {
            RuntimeError::Other(format!("{kind} runtime requires a projectPath option"))
        })
    }
}

/// Select and build the runtime variant for `cfg`.
pub fn runtime_for_config(
    cfg: &RuntimeConfig,
    opts: DispatchOptions,
) -> Result<Box<dyn Runtime>, RuntimeError> {
    match cfg.clone().normalized() {
        RuntimeConfig::Local(_) => {
            let project = opts.require_project("local")?;
            Ok(Box::new(LocalRuntime::new(opts.base, project)))
        }
        RuntimeConfig::Worktree(wt) => {
            Ok(Box::new(WorktreeRuntime::new(opts.base, wt.src_base_dir)))
        }
        RuntimeConfig::Ssh(ssh) => {
            let coder = ssh.coder.clone();
            match coder {
                None => {
                    let config = SshConfig {
                        host: ssh.host,
                        port: ssh.port,
                        user: None,
                        identity_file: ssh.identity_file,
                    };
                    let (pool, transport) = default_ssh_stack(&config);
                    Ok(Box::new(SshRuntime::new(opts.base, config, pool, transport)))
                }
                Some(coder) => {
                    let client = opts.coder_client.clone().ok_or_else(|| {
                        RuntimeError::Other("coder client not configured".into())
                    })?;
                    let workspace_name = coder
                        .workspace_name
                        .clone()
                        .or_else(|| {
                            ssh.host.strip_suffix(CODER_HOST_SUFFIX).map(str::to_string)
                        })
                        .ok_or_else(|| {
                            RuntimeError::Other(
                                "coder config is missing a workspace name".into(),
                            )
                        })?;
                    // Canonical proxy host, whatever the stored config says.
                    let host = format!("{workspace_name}{CODER_HOST_SUFFIX}");
                    let config = SshConfig {
                        host,
                        port: ssh.port,
                        user: None,
                        identity_file: ssh.identity_file,
                    };
                    let (pool, transport) = default_ssh_stack(&config);
                    let inner = SshRuntime::new(opts.base, config, pool, transport);
                    Ok(Box::new(CoderSshRuntime::new(inner, client, workspace_name)))
                }
            }
        }
        RuntimeConfig::Docker(docker) => {
            let project = opts.require_project("docker")?;
            Ok(Box::new(DockerRuntime::new(
                opts.base,
                &project,
                &opts.workspace_name,
                docker.image,
                docker.container_name,
            )))
        }
        RuntimeConfig::Devcontainer(dc) => {
            let project = opts.require_project("devcontainer")?;
            Ok(Box::new(DevcontainerRuntime::new(
                opts.base,
                &project,
                &opts.workspace_name,
                dc.workspace_folder,
            )))
        }
        RuntimeConfig::Incompatible { kind, .. } => Err(RuntimeError::Incompatible { kind }),
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
