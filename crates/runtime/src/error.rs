// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime error kinds.

use mux_core::exec::ExecError;
use mux_core::paths::PathError;
use mux_ssh::pool::PoolError;
use mux_ssh::transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Unknown config tag, usually written by a newer mux.
    #[error("incompatible_runtime: unknown runtime type {kind:?} — upgrade mux to open this workspace")]
    Incompatible { kind: String },

    /// Permanent: host gone, workspace deleted.
    #[error("runtime_not_ready: {0}")]
    NotReady(String),

    /// Transient: starting timed out, probe failed.
    #[error("runtime_start_failed: {0}")]
    StartFailed(String),

    #[error("invalid workspace name: {0}")]
    InvalidName(String),

    /// Delete refused without `force` (dirty tree, live container).
    #[error("delete blocked: {0}")]
    DeleteBlocked(String),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}
