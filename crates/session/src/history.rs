// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only per-workspace history log.
//!
//! Layout under the session root:
//!
//! ```text
//! <root>/<workspace-id>/
//!   history.json           ordered message array
//!   partial.json           in-progress stream snapshot
//!   post-compaction.json   {version: 1, diffs: [...]}
//! ```
//!
//! Every write goes through a temp file, fsync, and rename. Sequence
//! numbers are derived from the file on each operation: 1 + the highest
//! valid (non-negative integer) sequence, so malformed values written by
//! older frontends cannot poison numbering. A corrupt file as a whole is
//! fatal — silently resetting a workspace's history would lose data.

use fs2::FileExt;
use mux_core::id::MessageId;
use mux_core::message::{FileDiff, Message};
use mux_core::workspace::WorkspaceId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

const HISTORY_FILE: &str = "history.json";
const PARTIAL_FILE: &str = "partial.json";
const POST_COMPACTION_FILE: &str = "post-compaction.json";

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt history for {workspace}: {message}")]
    Corrupt { workspace: WorkspaceId, message: String },
    #[error("message {0} not found")]
    MessageNotFound(MessageId),
    #[error("session root already locked: {0}")]
    Locked(String),
}

/// Exclusive advisory lock on a session root; one writer process per root.
pub struct SessionLock {
    _file: std::fs::File,
    path: PathBuf,
}

impl SessionLock {
    pub fn acquire(session_root: &Path) -> Result<Self, HistoryError> {
        std::fs::create_dir_all(session_root)?;
        let path = session_root.join(".lock");
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        file.try_lock_exclusive()
            .map_err(|_| HistoryError::Locked(path.display().to_string()))?;
        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Pending post-compaction diffs sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PendingDiffs {
    version: u32,
    diffs: Vec<FileDiff>,
}

/// The per-workspace history store.
pub struct HistoryLog {
    session_root: PathBuf,
    // One writer per workspace within this process.
    locks: Mutex<HashMap<WorkspaceId, Arc<Mutex<()>>>>,
}

impl HistoryLog {
    pub fn new(session_root: impl Into<PathBuf>) -> Self {
        Self { session_root: session_root.into(), locks: Mutex::new(HashMap::new()) }
    }

    pub fn session_root(&self) -> &Path {
        &self.session_root
    }

    fn workspace_lock(&self, workspace_id: &WorkspaceId) -> Arc<Mutex<()>> {
        self.locks.lock().entry(*workspace_id).or_default().clone()
    }

    fn workspace_dir(&self, workspace_id: &WorkspaceId) -> PathBuf {
        self.session_root.join(workspace_id.as_str())
    }

    fn history_path(&self, workspace_id: &WorkspaceId) -> PathBuf {
        self.workspace_dir(workspace_id).join(HISTORY_FILE)
    }

    fn load(&self, workspace_id: &WorkspaceId) -> Result<Vec<Message>, HistoryError> {
        let path = self.history_path(workspace_id);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&raw).map_err(|e| HistoryError::Corrupt {
            workspace: *workspace_id,
            message: e.to_string(),
        })
    }

    fn store(&self, workspace_id: &WorkspaceId, messages: &[Message]) -> Result<(), HistoryError> {
        let dir = self.workspace_dir(workspace_id);
        std::fs::create_dir_all(&dir)?;
        atomic_write(&dir.join(HISTORY_FILE), &serde_json::to_vec_pretty(messages).map_err(
            |e| HistoryError::Corrupt { workspace: *workspace_id, message: e.to_string() },
        )?)?;
        Ok(())
    }

    /// Next sequence: 1 + the highest valid sequence on file, 0 when none.
    pub fn next_sequence(&self, workspace_id: &WorkspaceId) -> Result<u64, HistoryError> {
        Ok(next_sequence_of(&self.load(workspace_id)?))
    }

    /// Append, assigning a sequence when the message has none.
    pub fn append_to_history(
        &self,
        workspace_id: &WorkspaceId,
        mut message: Message,
    ) -> Result<Message, HistoryError> {
        let lock = self.workspace_lock(workspace_id);
        let _guard = lock.lock();

        let mut messages = self.load(workspace_id)?;
        let next = next_sequence_of(&messages);
        let sequence = match message.metadata.history_sequence {
            Some(explicit) => explicit.max(next),
            None => next,
        };
        message.metadata.history_sequence = Some(sequence);
        messages.push(message.clone());
        self.store(workspace_id, &messages)?;
        Ok(message)
    }

    /// Replace a message in place by id, preserving order.
    pub fn update_history(
        &self,
        workspace_id: &WorkspaceId,
        message: Message,
    ) -> Result<(), HistoryError> {
        let lock = self.workspace_lock(workspace_id);
        let _guard = lock.lock();

        let mut messages = self.load(workspace_id)?;
        let Some(slot) = messages.iter_mut().find(|m| m.id == message.id) else {
            return Err(HistoryError::MessageNotFound(message.id));
        };
        *slot = message;
        self.store(workspace_id, &messages)?;
        Ok(())
    }

    /// Remove everything; returns the valid sequence numbers removed so the
    /// caller can emit a delete event.
    pub fn clear_history(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<u64>, HistoryError> {
        let lock = self.workspace_lock(workspace_id);
        let _guard = lock.lock();

        let messages = self.load(workspace_id)?;
        let removed = messages
            .iter()
            .filter_map(|m| m.metadata.history_sequence)
            .collect();
        self.store(workspace_id, &[])?;
        Ok(removed)
    }

    pub fn read_history(&self, workspace_id: &WorkspaceId) -> Result<Vec<Message>, HistoryError> {
        self.load(workspace_id)
    }

    pub fn get_last_messages(
        &self,
        workspace_id: &WorkspaceId,
        n: usize,
    ) -> Result<Vec<Message>, HistoryError> {
        let messages = self.load(workspace_id)?;
        let start = messages.len().saturating_sub(n);
        Ok(messages[start..].to_vec())
    }

    // ---- partial snapshot ----

    pub fn write_partial(
        &self,
        workspace_id: &WorkspaceId,
        message: &Message,
    ) -> Result<(), HistoryError> {
        let dir = self.workspace_dir(workspace_id);
        std::fs::create_dir_all(&dir)?;
        let raw = serde_json::to_vec_pretty(message).map_err(|e| HistoryError::Corrupt {
            workspace: *workspace_id,
            message: e.to_string(),
        })?;
        atomic_write(&dir.join(PARTIAL_FILE), &raw)?;
        Ok(())
    }

    pub fn read_partial(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Option<Message>, HistoryError> {
        let path = self.workspace_dir(workspace_id).join(PARTIAL_FILE);
        match std::fs::read(&path) {
            Ok(raw) => Ok(serde_json::from_slice(&raw).ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Idempotent removal of the in-progress snapshot.
    pub fn delete_partial(&self, workspace_id: &WorkspaceId) -> Result<(), HistoryError> {
        let path = self.workspace_dir(workspace_id).join(PARTIAL_FILE);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    // ---- post-compaction diffs sidecar ----

    pub fn write_pending_diffs(
        &self,
        workspace_id: &WorkspaceId,
        diffs: &[FileDiff],
    ) -> Result<(), HistoryError> {
        let dir = self.workspace_dir(workspace_id);
        std::fs::create_dir_all(&dir)?;
        let payload = PendingDiffs { version: 1, diffs: diffs.to_vec() };
        let raw = serde_json::to_vec_pretty(&payload).map_err(|e| HistoryError::Corrupt {
            workspace: *workspace_id,
            message: e.to_string(),
        })?;
        atomic_write(&dir.join(POST_COMPACTION_FILE), &raw)?;
        Ok(())
    }

    /// Read the sidecar without consuming it.
    pub fn peek_pending_diffs(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Option<Vec<FileDiff>>, HistoryError> {
        let path = self.workspace_dir(workspace_id).join(POST_COMPACTION_FILE);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let parsed: Option<PendingDiffs> = serde_json::from_slice(&raw).ok();
        Ok(parsed.filter(|p| p.version == 1).map(|p| p.diffs))
    }

    /// Only explicit acknowledgement removes the sidecar; restarts keep it.
    pub fn ack_pending_diffs(&self, workspace_id: &WorkspaceId) -> Result<(), HistoryError> {
        let path = self.workspace_dir(workspace_id).join(POST_COMPACTION_FILE);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn next_sequence_of(messages: &[Message]) -> u64 {
    messages
        .iter()
        .filter_map(|m| m.metadata.history_sequence)
        .max()
        .map(|max| max + 1)
        .unwrap_or(0)
}

/// Write via temp sibling + fsync + rename.
fn atomic_write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
#[path = "history_tests.rs"]
mod tests;
