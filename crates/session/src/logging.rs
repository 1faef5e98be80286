// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tracing setup for embedders.
//!
//! The core is a library; the process hosting it calls [`init`] once at
//! startup. `MUX_LOG` filters (e.g. `mux_session=debug,mux_ssh=trace`),
//! defaulting to `info`.

use tracing_subscriber::filter::EnvFilter;

/// Install the global subscriber. Safe to call more than once; later calls
/// are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_env("MUX_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
