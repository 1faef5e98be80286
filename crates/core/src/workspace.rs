// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace identifier and persisted workspace record.
//!
//! A workspace is a unit of isolated work with an owning project and exactly
//! one runtime. The record is persisted in the global registry; its field set
//! is immutable after creation apart from `name` (rename).

use crate::runtime_config::RuntimeConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

crate::define_id! {
    /// Unique identifier for a workspace.
    pub struct WorkspaceId("wks-");
}

/// Persisted description of a workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    /// Local path of the owning project (repo root or plain directory).
    pub project_path: PathBuf,
    /// Workspace this one was forked from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<WorkspaceId>,
    // Last field: serializes as a table, which TOML requires after values.
    pub runtime: RuntimeConfig,
}

impl Workspace {
    pub fn new(name: impl Into<String>, project_path: impl Into<PathBuf>, runtime: RuntimeConfig) -> Self {
        Self {
            id: WorkspaceId::new(),
            name: name.into(),
            project_path: project_path.into(),
            parent: None,
            runtime,
        }
    }
}

#[cfg(test)]
#[path = "workspace_tests.rs"]
mod tests;
