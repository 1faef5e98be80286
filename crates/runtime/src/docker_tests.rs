// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn container_names_are_deterministic() {
    let a = container_name(Path::new("/srv/api"), "feature-x");
    let b = container_name(Path::new("/srv/api"), "feature-x");
    assert_eq!(a, b);
    assert!(a.starts_with("mux-api-feature-x-"));
}

#[test]
fn container_names_separate_projects_with_same_basename() {
    let a = container_name(Path::new("/home/alice/api"), "w");
    let b = container_name(Path::new("/home/bob/api"), "w");
    assert_ne!(a, b);
}

#[test]
fn container_names_sanitize_hostile_characters() {
    let name = container_name(Path::new("/srv/my project!"), "weird name");
    assert!(name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-'));
}

#[test]
fn workspace_path_is_under_workspaces() {
    let rt = DockerRuntime::new(
        RuntimeBase::new(),
        Path::new("/srv/api"),
        "feature-x",
        None,
        None,
    );
    assert_eq!(
        rt.get_workspace_path(Path::new("/srv/api"), "feature-x").unwrap(),
        "/workspaces/feature-x"
    );
    assert!(rt.container().starts_with("mux-api-feature-x-"));
}
