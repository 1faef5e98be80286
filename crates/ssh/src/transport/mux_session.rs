// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Library transport over a single multiplexed `openssh` session.
//!
//! Used where spawning one ssh process per exec is not viable (Windows, or
//! when configured explicitly). PTY allocation is only available on the
//! process transport; `force_pty` is ignored here.

use super::openssh_process::{maybe_cancelled, maybe_sleep};
use super::{assemble_command, ExecRequest, SshTransport, TransportError};
use crate::config::{host_key_policy, HostKeyPolicy, SshConfig};
use async_trait::async_trait;
use mux_core::exec::{ExecError, ExecExit, ExecStream};
use openssh::{KnownHosts, Session, SessionBuilder, Stdio};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;

pub struct MuxTransport {
    session: Arc<Session>,
}

impl MuxTransport {
    /// Establish the multiplexed session for `config`.
    pub async fn connect(config: &SshConfig) -> Result<Self, TransportError> {
        let mut builder = SessionBuilder::default();
        if let Some(user) = &config.user {
            builder.user(user.clone());
        }
        if let Some(port) = config.port {
            builder.port(port);
        }
        if let Some(identity) = &config.identity_file {
            builder.keyfile(identity);
        }
        builder.known_hosts_check(match host_key_policy() {
            HostKeyPolicy::Strict => KnownHosts::Strict,
            HostKeyPolicy::HeadlessFallback => KnownHosts::Accept,
        });
        let session = builder
            .connect_mux(&config.host)
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        Ok(Self { session: Arc::new(session) })
    }
}

#[async_trait]
impl SshTransport for MuxTransport {
    async fn exec(&self, command: &str, req: ExecRequest) -> Result<ExecStream, TransportError> {
        let remote = assemble_command(command, &req)?;

        let mut cmd = self.session.clone().arc_command("sh");
        cmd.arg("-c").arg(remote);
        cmd.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());

        let start = Instant::now();
        let mut child = cmd
            .spawn()
            .await
            .map_err(|e| TransportError::Exec(ExecError::Spawn(e.to_string())))?;

        let stdin = child.stdin().take().map(|s| Box::new(s) as _);
        let stdout = child.stdout().take().map(|s| Box::new(s) as _).ok_or_else(|| {
            TransportError::Exec(ExecError::Spawn("child stdout not piped".into()))
        })?;
        let stderr = child.stderr().take().map(|s| Box::new(s) as _).ok_or_else(|| {
            TransportError::Exec(ExecError::Spawn("child stderr not piped".into()))
        })?;

        let timeout = req.timeout;
        let cancel = req.cancel;
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let wait = child.wait();
            tokio::pin!(wait);
            let outcome = tokio::select! {
                status = &mut wait => match status {
                    Ok(status) => Ok(ExecExit {
                        exit_code: status.code().unwrap_or(-1),
                        duration: start.elapsed(),
                    }),
                    Err(e) => Err(ExecError::Io(e.to_string())),
                },
                Some(limit) = maybe_sleep(timeout) => {
                    // A mux channel has no process group to signal; the remote
                    // side is torn down with the session.
                    Err(ExecError::Timeout(limit))
                }
                _ = maybe_cancelled(cancel) => {
                    Err(ExecError::Cancelled)
                }
            };
            let _ = tx.send(outcome);
        });

        Ok(ExecStream { stdin, stdout, stderr, exit: rx })
    }
}
