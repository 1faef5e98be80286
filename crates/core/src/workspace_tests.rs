// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::runtime_config::LocalConfig;

#[test]
fn new_workspace_gets_fresh_id_and_no_parent() {
    let ws = Workspace::new(
        "fix-auth",
        "/srv/project",
        RuntimeConfig::Local(LocalConfig::default()),
    );
    assert!(ws.id.as_str().starts_with("wks-"));
    assert_eq!(ws.parent, None);
}

#[test]
fn record_round_trips_with_camel_case_fields() {
    let mut ws = Workspace::new(
        "fix-auth",
        "/srv/project",
        RuntimeConfig::Local(LocalConfig::default()),
    );
    ws.parent = Some(WorkspaceId::from_string("wks-parent"));

    let json = serde_json::to_value(&ws).unwrap();
    assert_eq!(json["projectPath"], "/srv/project");
    assert_eq!(json["runtime"]["type"], "local");

    let back: Workspace = serde_json::from_value(json).unwrap();
    assert_eq!(back, ws);
}
