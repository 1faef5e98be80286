// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persisted workspace registry.
//!
//! One TOML file under the mux home records every workspace with its
//! runtime config. Unknown runtime tags round-trip as `Incompatible`, so a
//! registry written by a newer mux survives an older one re-saving it.

use chrono::{DateTime, Utc};
use mux_core::workspace::{Workspace, WorkspaceId};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("registry parse failed: {0}")]
    Parse(String),
    #[error("registry encode failed: {0}")]
    Encode(String),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    workspaces: Vec<Workspace>,
}

pub struct WorkspaceRegistry {
    path: PathBuf,
}

impl WorkspaceRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.mux/config.toml`
    pub fn default_path() -> PathBuf {
        dirs::home_dir().unwrap_or_else(std::env::temp_dir).join(".mux").join("config.toml")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Vec<Workspace>, RegistryError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let file: RegistryFile =
            toml::from_str(&raw).map_err(|e| RegistryError::Parse(e.to_string()))?;
        Ok(file.workspaces)
    }

    pub fn save(&self, workspaces: &[Workspace]) -> Result<(), RegistryError> {
        let file = RegistryFile {
            updated_at: Some(Utc::now()),
            workspaces: workspaces.to_vec(),
        };
        let encoded =
            toml::to_string_pretty(&file).map_err(|e| RegistryError::Encode(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(encoded.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| RegistryError::Io(e.error))?;
        Ok(())
    }

    /// Insert or replace by id.
    pub fn upsert(&self, workspace: Workspace) -> Result<(), RegistryError> {
        let mut workspaces = self.load()?;
        match workspaces.iter_mut().find(|w| w.id == workspace.id) {
            Some(slot) => *slot = workspace,
            None => workspaces.push(workspace),
        }
        self.save(&workspaces)
    }

    pub fn remove(&self, id: &WorkspaceId) -> Result<Option<Workspace>, RegistryError> {
        let mut workspaces = self.load()?;
        let found = workspaces.iter().position(|w| &w.id == id);
        let removed = found.map(|at| workspaces.remove(at));
        if removed.is_some() {
            self.save(&workspaces)?;
        }
        Ok(removed)
    }

    pub fn rename(&self, id: &WorkspaceId, new_name: &str) -> Result<bool, RegistryError> {
        let mut workspaces = self.load()?;
        let Some(workspace) = workspaces.iter_mut().find(|w| &w.id == id) else {
            return Ok(false);
        };
        workspace.name = new_name.to_string();
        self.save(&workspaces)?;
        Ok(true)
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
