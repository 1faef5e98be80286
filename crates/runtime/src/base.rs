// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared state composed into every runtime variant.

use std::path::PathBuf;

/// Process-local paths a runtime needs regardless of back-end.
#[derive(Debug, Clone)]
pub struct RuntimeBase {
    /// Root for background-process output directories.
    pub bg_output_dir: PathBuf,
    /// mux home on the machine driving the runtime.
    pub mux_home: PathBuf,
}

impl RuntimeBase {
    pub fn new() -> Self {
        let mux_home = dirs::home_dir().unwrap_or_else(std::env::temp_dir).join(".mux");
        Self { bg_output_dir: mux_home.join("background"), mux_home }
    }

    pub fn with_mux_home(mux_home: PathBuf) -> Self {
        Self { bg_output_dir: mux_home.join("background"), mux_home }
    }
}

impl Default for RuntimeBase {
    fn default() -> Self {
        Self::new()
    }
}
