// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::local::LocalHost;
use mux_core::workspace::WorkspaceId;
use tempfile::TempDir;

fn opts(cwd: &std::path::Path) -> SpawnBackgroundOptions {
    SpawnBackgroundOptions {
        cwd: cwd.to_string_lossy().into_owned(),
        workspace_id: WorkspaceId::from_string("wks-bg"),
        env: vec![("MUX_BG_TEST".into(), "yes".into())],
        niceness: None,
    }
}

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

#[tokio::test]
async fn quick_script_records_exit_zero_and_output() {
    let work = TempDir::new().unwrap();
    let out_root = TempDir::new().unwrap();

    let proc = BackgroundProcess::spawn(
        Arc::new(LocalHost),
        "echo \"value=$MUX_BG_TEST\"",
        &opts(work.path()),
        &out_root.path().to_string_lossy(),
    )
    .await
    .unwrap();

    assert!(proc.pid() > 0);
    let code = wait_for_exit(&proc, Duration::from_secs(3)).await;
    assert_eq!(code, Some(0));
    assert_eq!(proc.read_stdout().await.unwrap(), "value=yes\n");
}

#[tokio::test]
async fn failing_script_records_its_exit_code() {
    let work = TempDir::new().unwrap();
    let out_root = TempDir::new().unwrap();

    let proc = BackgroundProcess::spawn(
        Arc::new(LocalHost),
        "exit 7",
        &opts(work.path()),
        &out_root.path().to_string_lossy(),
    )
    .await
    .unwrap();

    assert_eq!(wait_for_exit(&proc, Duration::from_secs(3)).await, Some(7));
}

#[tokio::test]
async fn exit_code_is_none_while_running() {
    let work = TempDir::new().unwrap();
    let out_root = TempDir::new().unwrap();

    let proc = BackgroundProcess::spawn(
        Arc::new(LocalHost),
        "sleep 30",
        &opts(work.path()),
        &out_root.path().to_string_lossy(),
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(proc.get_exit_code().await.unwrap(), None);
    assert!(proc.is_running().await.unwrap());

    proc.terminate().await.unwrap();
}

#[tokio::test]
async fn terminate_kills_the_process_group_and_is_idempotent() {
    let work = TempDir::new().unwrap();
    let out_root = TempDir::new().unwrap();

    // Child keeps a grandchild alive; both must die with the group.
    let proc = BackgroundProcess::spawn(
        Arc::new(LocalHost),
        "sleep 100 &\necho hello > started\nwait",
        &opts(work.path()),
        &out_root.path().to_string_lossy(),
    )
    .await
    .unwrap();

    // Let the script reach its wait.
    let started = work.path().join("started");
    for _ in 0..60 {
        if started.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(started.exists());

    proc.terminate().await.unwrap();
    let code = wait_for_exit(&proc, Duration::from_secs(3)).await;
    assert!(code.is_some(), "exit code must appear after terminate");
    assert!(!proc.is_running().await.unwrap());

    // Idempotent: a second terminate and a dispose are no-ops.
    proc.terminate().await.unwrap();
    proc.dispose();
    proc.dispose();
}

#[tokio::test]
async fn meta_and_logs_live_under_workspace_scoped_dir() {
    let work = TempDir::new().unwrap();
    let out_root = TempDir::new().unwrap();

    let proc = BackgroundProcess::spawn(
        Arc::new(LocalHost),
        "true",
        &opts(work.path()),
        &out_root.path().to_string_lossy(),
    )
    .await
    .unwrap();
    wait_for_exit(&proc, Duration::from_secs(3)).await.unwrap();

    let dir = std::path::Path::new(proc.output_dir());
    assert!(dir.starts_with(out_root.path().join("wks-bg")));
    assert!(dir.join("stdout.log").exists());
    assert!(dir.join("stderr.log").exists());
    assert!(dir.join("meta.json").exists());
    let meta: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.join("meta.json")).unwrap()).unwrap();
    assert_eq!(meta["workspaceId"], "wks-bg");
}

/// Host that lies about the spawn output; PID parsing must fail the spawn.
struct GarbageHost;

#[async_trait]
impl CommandHost for GarbageHost {
    async fn run(&self, _script: &str) -> Result<ExecOutput, RuntimeError> {
        Ok(ExecOutput {
            stdout: "this is not a pid\n".into(),
            stderr: String::new(),
            exit: mux_core::exec::ExecExit {
                exit_code: 0,
                duration: Duration::from_millis(1),
            },
        })
    }

    async fn read_file(&self, _path: &str) -> Result<Option<Vec<u8>>, RuntimeError> {
        Ok(None)
    }

    async fn write_file(&self, _path: &str, _contents: &[u8]) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn ensure_dir(&self, _path: &str) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn process_alive(&self, _pid: i32) -> Result<bool, RuntimeError> {
        Ok(false)
    }
}

#[tokio::test]
async fn unparseable_pid_fails_the_spawn() {
    let work = TempDir::new().unwrap();
    let err = BackgroundProcess::spawn(Arc::new(GarbageHost), "true", &opts(work.path()), "/tmp")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unparseable pid"));
}
