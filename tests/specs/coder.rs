// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coder readiness specs.

use async_trait::async_trait;
use mux_runtime::base::RuntimeBase;
use mux_runtime::coder::{CoderClient, CoderSshRuntime, CoderWorkspaceStatus};
use mux_runtime::contract::{EnsureReadyOptions, EnsureReadyOutcome, ReadinessStatus, Runtime};
use mux_runtime::error::RuntimeError;
use mux_runtime::ssh::{default_ssh_stack, SshRuntime};
use mux_ssh::config::SshConfig;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Returns `stopping` twice, then `stopped`; startup scripts succeed.
struct StoppingThenStopped {
    statuses: Mutex<Vec<CoderWorkspaceStatus>>,
}

#[async_trait]
impl CoderClient for StoppingThenStopped {
    async fn workspace_status(
        &self,
        _workspace_name: &str,
    ) -> Result<CoderWorkspaceStatus, RuntimeError> {
        let mut statuses = self.statuses.lock();
        if statuses.len() > 1 {
            Ok(statuses.remove(0))
        } else {
            Ok(*statuses.first().unwrap_or(&CoderWorkspaceStatus::Stopped))
        }
    }

    async fn wait_for_startup_scripts(
        &self,
        _workspace_name: &str,
        lines: mpsc::UnboundedSender<String>,
        _cancel: CancellationToken,
    ) -> Result<(), RuntimeError> {
        let _ = lines.send("running startup scripts".into());
        Ok(())
    }

    async fn delete_workspace(&self, _workspace_name: &str) -> Result<(), RuntimeError> {
        Ok(())
    }
}

/// Spec: `stopping, stopping, stopped` yields the event sequence
/// checking → waiting → starting → ready, completes inside the 120s
/// budget, and returns ready.
#[tokio::test]
async fn ensure_ready_waits_out_a_stopping_workspace() {
    let client = Arc::new(StoppingThenStopped {
        statuses: Mutex::new(vec![
            CoderWorkspaceStatus::Stopping,
            CoderWorkspaceStatus::Stopping,
            CoderWorkspaceStatus::Stopped,
        ]),
    });
    let config = SshConfig::new("mux-spec.mux--coder");
    let (pool, transport) = default_ssh_stack(&config);
    let inner = SshRuntime::new(RuntimeBase::new(), config, pool, transport);
    let runtime = CoderSshRuntime::new(inner, client, "mux-spec".to_string());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let started = Instant::now();
    let outcome = runtime
        .ensure_ready(EnsureReadyOptions { status: Some(tx), cancel: None })
        .await
        .unwrap();
    assert_eq!(outcome, EnsureReadyOutcome::Ready);
    assert!(started.elapsed() < Duration::from_secs(120));

    let mut phases = Vec::new();
    while let Ok(status) = rx.try_recv() {
        let phase = match status {
            ReadinessStatus::Checking => "checking",
            ReadinessStatus::Waiting => "waiting",
            ReadinessStatus::Starting { .. } => "starting",
            ReadinessStatus::Ready => "ready",
            ReadinessStatus::Error { .. } => "error",
        };
        if phases.last() != Some(&phase) {
            phases.push(phase);
        }
    }
    assert_eq!(phases, vec!["checking", "waiting", "starting", "ready"]);
}
