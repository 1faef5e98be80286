// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport over the native OpenSSH client.
//!
//! Every exec spawns one `ssh` process; a control master keyed on the
//! connection digest multiplexes them over a single TCP session. Host-key
//! policy arguments come from the process-wide mode at spawn time.

use super::{assemble_command, ExecRequest, SshTransport, TransportError};
use crate::askpass::AskpassSession;
use crate::config::{control_path, host_key_policy, policy_args, SshConfig};
use async_trait::async_trait;
use mux_core::exec::{ExecError, ExecExit, ExecStream};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// OpenSSH-process transport.
pub struct OpenSshTransport {
    config: SshConfig,
    /// Environment exported into each ssh child (askpass bridge).
    extra_env: Vec<(String, String)>,
}

impl OpenSshTransport {
    pub fn new(config: SshConfig) -> Self {
        Self { config, extra_env: Vec::new() }
    }

    /// Route interactive prompts from spawned children through `session`.
    pub fn with_askpass(mut self, session: &AskpassSession) -> Self {
        self.extra_env = session.env();
        self
    }

    fn ssh_args(&self, force_pty: bool) -> Vec<String> {
        let mut args = Vec::new();
        if force_pty {
            args.push("-tt".to_string());
        }
        args.push("-o".into());
        args.push("ControlMaster=auto".into());
        args.push("-o".into());
        args.push(format!("ControlPath={}", control_path(&self.config).display()));
        args.push("-o".into());
        args.push("ControlPersist=60".into());
        if let Some(port) = self.config.port {
            args.push("-p".into());
            args.push(port.to_string());
        }
        if let Some(identity) = &self.config.identity_file {
            args.push("-i".into());
            args.push(identity.display().to_string());
        }
        for arg in policy_args(host_key_policy()) {
            args.push((*arg).to_string());
        }
        args.push(self.config.destination());
        args
    }

    fn spawn(
        &self,
        remote_command: String,
        force_pty: bool,
        timeout: Option<Duration>,
        cancel: Option<CancellationToken>,
    ) -> Result<ExecStream, ExecError> {
        let mut cmd = tokio::process::Command::new("ssh");
        cmd.args(self.ssh_args(force_pty))
            .arg(remote_command)
            .envs(self.extra_env.iter().cloned())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

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

#[async_trait]
impl SshTransport for OpenSshTransport {
    async fn exec(&self, command: &str, req: ExecRequest) -> Result<ExecStream, TransportError> {
        let remote = assemble_command(command, &req)?;
        Ok(self.spawn(remote, req.force_pty, req.timeout, req.cancel)?)
    }
}

/// Reachability probe via a one-shot, prompt-free ssh invocation.
pub struct OpenSshProber;

#[async_trait]
impl crate::pool::Prober for OpenSshProber {
    async fn probe(&self, config: &SshConfig, timeout: Duration) -> Result<(), String> {
        let mut cmd = tokio::process::Command::new("ssh");
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", timeout.as_secs().max(1)));
        for arg in policy_args(host_key_policy()) {
            cmd.arg(arg);
        }
        if let Some(port) = config.port {
            cmd.arg("-p").arg(port.to_string());
        }
        if let Some(identity) = &config.identity_file {
            cmd.arg("-i").arg(identity);
        }
        cmd.arg(config.destination()).arg("true");
        cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let run = async {
            let output =
                cmd.output().await.map_err(|e| format!("ssh spawn failed: {e}"))?;
            if output.status.success() {
                Ok(())
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(stderr.trim().lines().last().unwrap_or("probe failed").to_string())
            }
        };
        match tokio::time::timeout(timeout, run).await {
            Ok(result) => result,
            Err(_) => Err(format!("probe timed out after {timeout:?}")),
        }
    }
}
