// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background process specs: detached lifecycle and group termination.

use mux_core::workspace::WorkspaceId;
use mux_runtime::background::BackgroundProcess;
use mux_runtime::contract::SpawnBackgroundOptions;
use mux_runtime::local::LocalHost;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

async fn wait_for_exit(proc: &BackgroundProcess, max: Duration) -> Option<i32> {
    let deadline = std::time::Instant::now() + max;
    loop {
        if let Some(code) = proc.get_exit_code().await.unwrap() {
            return Some(code);
        }
        if std::time::Instant::now() > deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Spec: spawn a script with a lingering child, terminate, observe an exit
/// code within 3 seconds and no surviving process; repeat calls are no-ops.
#[tokio::test]
async fn terminate_reaps_the_whole_group_within_three_seconds() {
    let work = TempDir::new().unwrap();
    let out_root = TempDir::new().unwrap();

    let proc = BackgroundProcess::spawn(
        Arc::new(LocalHost),
        "sleep 100 &\necho hello > f\nwait",
        &SpawnBackgroundOptions {
            cwd: work.path().to_string_lossy().into_owned(),
            workspace_id: WorkspaceId::from_string("wks-spec-bg"),
            env: vec![],
            niceness: None,
        },
        &out_root.path().to_string_lossy(),
    )
    .await
    .unwrap();

    // The script reached its body.
    for _ in 0..60 {
        if work.path().join("f").exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(work.path().join("f").exists());
    assert!(proc.is_running().await.unwrap());

    proc.terminate().await.unwrap();
    let code = wait_for_exit(&proc, Duration::from_secs(3)).await;
    assert!(code.is_some(), "exit code must exist after terminate");
    assert!(!proc.is_running().await.unwrap(), "no zombie process");

    // Idempotence.
    proc.terminate().await.unwrap();
    proc.dispose();
    proc.dispose();
}

/// Liveness is exactly "exit_code file absent".
#[tokio::test]
async fn exit_code_file_absence_means_running() {
    let work = TempDir::new().unwrap();
    let out_root = TempDir::new().unwrap();

    let proc = BackgroundProcess::spawn(
        Arc::new(LocalHost),
        "sleep 0.3; exit 9",
        &SpawnBackgroundOptions {
            cwd: work.path().to_string_lossy().into_owned(),
            workspace_id: WorkspaceId::from_string("wks-spec-bg2"),
            env: vec![],
            niceness: None,
        },
        &out_root.path().to_string_lossy(),
    )
    .await
    .unwrap();

    assert_eq!(proc.get_exit_code().await.unwrap(), None);
    assert_eq!(wait_for_exit(&proc, Duration::from_secs(3)).await, Some(9));
}
