// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::contract::Runtime as _;
use tempfile::TempDir;

async fn git_repo() -> TempDir {
    let repo = TempDir::new().unwrap();
    let run = |args: &[&str], dir: &std::path::Path| {
        let out = std::process::Command::new("git")
            .args(args)
            .current_dir(dir)
            .env("GIT_AUTHOR_NAME", "mux")
            .env("GIT_AUTHOR_EMAIL", "mux@test")
            .env("GIT_COMMITTER_NAME", "mux")
            .env("GIT_COMMITTER_EMAIL", "mux@test")
            .output()
            .unwrap();
        assert!(out.status.success(), "git {args:?}: {}", String::from_utf8_lossy(&out.stderr));
    };
    run(&["init", "-b", "main"], repo.path());
    std::fs::write(repo.path().join("README.md"), "hello\n").unwrap();
    run(&["add", "."], repo.path());
    run(&["commit", "-m", "init"], repo.path());
    repo
}

fn runtime(trees: &TempDir) -> WorktreeRuntime {
    WorktreeRuntime::new(RuntimeBase::new(), trees.path().to_path_buf())
}

#[tokio::test]
async fn create_makes_a_worktree_under_the_base_dir() {
    let repo = git_repo().await;
    let trees = TempDir::new().unwrap();
    let rt = runtime(&trees);

    let path = rt
        .create_workspace(CreateParams {
            project_path: repo.path().to_path_buf(),
            workspace_name: "feature-a".into(),
            branch: None,
        })
        .await
        .unwrap();

    assert!(std::path::Path::new(&path).join("README.md").exists());
    assert!(path.starts_with(&trees.path().to_string_lossy().into_owned()));
    assert_eq!(
        path,
        rt.get_workspace_path(repo.path(), "feature-a").unwrap()
    );
}

#[tokio::test]
async fn delete_refuses_dirty_worktree_without_force() {
    let repo = git_repo().await;
    let trees = TempDir::new().unwrap();
    let rt = runtime(&trees);

    let path = rt
        .create_workspace(CreateParams {
            project_path: repo.path().to_path_buf(),
            workspace_name: "feature-b".into(),
            branch: None,
        })
        .await
        .unwrap();
    std::fs::write(std::path::Path::new(&path).join("dirty.txt"), "wip").unwrap();

    let err = rt
        .delete_workspace(repo.path(), "feature-b", false, None)
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::DeleteBlocked(_)));
    assert!(std::path::Path::new(&path).exists());

    rt.delete_workspace(repo.path(), "feature-b", true, None).await.unwrap();
    assert!(!std::path::Path::new(&path).exists());
}

#[tokio::test]
async fn delete_of_missing_worktree_is_ok() {
    let repo = git_repo().await;
    let trees = TempDir::new().unwrap();
    runtime(&trees).delete_workspace(repo.path(), "never-created", false, None).await.unwrap();
}

#[tokio::test]
async fn rename_to_same_name_is_a_noop_success() {
    let repo = git_repo().await;
    let trees = TempDir::new().unwrap();
    let rt = runtime(&trees);
    rt.create_workspace(CreateParams {
        project_path: repo.path().to_path_buf(),
        workspace_name: "feature-c".into(),
        branch: None,
    })
    .await
    .unwrap();

    rt.rename_workspace(repo.path(), "feature-c", "feature-c").await.unwrap();
    assert!(std::path::Path::new(&rt.get_workspace_path(repo.path(), "feature-c").unwrap())
        .exists());
}

#[tokio::test]
async fn fork_creates_a_sibling_from_the_source_branch() {
    let repo = git_repo().await;
    let trees = TempDir::new().unwrap();
    let rt = runtime(&trees);
    rt.create_workspace(CreateParams {
        project_path: repo.path().to_path_buf(),
        workspace_name: "feature-d".into(),
        branch: None,
    })
    .await
    .unwrap();

    let fork = rt.fork_workspace(repo.path(), "feature-d", "feature-d-fork").await.unwrap();
    assert!(std::path::Path::new(&fork).join("README.md").exists());
}
