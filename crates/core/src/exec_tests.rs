// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::io::Cursor;

fn stream_with(stdout: &str, stderr: &str, exit_code: i32) -> ExecStream {
    let (tx, rx) = oneshot::channel();
    tx.send(Ok(ExecExit { exit_code, duration: Duration::from_millis(5) }))
        .unwrap();
    ExecStream {
        stdin: None,
        stdout: Box::new(Cursor::new(stdout.as_bytes().to_vec())),
        stderr: Box::new(Cursor::new(stderr.as_bytes().to_vec())),
        exit: rx,
    }
}

#[tokio::test]
async fn collect_drains_streams_and_returns_exit() {
    let out = stream_with("hello\n", "warn\n", 0).collect().await.unwrap();
    assert_eq!(out.stdout, "hello\n");
    assert_eq!(out.stderr, "warn\n");
    assert!(out.success());
}

#[tokio::test]
async fn collect_preserves_nonzero_exit_codes() {
    let out = stream_with("", "boom", 143).collect().await.unwrap();
    assert_eq!(out.exit.exit_code, 143);
    assert!(!out.success());
}

#[tokio::test]
async fn dropped_supervisor_surfaces_as_interrupted() {
    let (tx, rx) = oneshot::channel::<Result<ExecExit, ExecError>>();
    drop(tx);
    let stream = ExecStream {
        stdin: None,
        stdout: Box::new(Cursor::new(Vec::new())),
        stderr: Box::new(Cursor::new(Vec::new())),
        exit: rx,
    };
    match stream.collect().await {
        Err(ExecError::Interrupted) => {}
        other => panic!("expected Interrupted, got {other:?}"),
    }
}
