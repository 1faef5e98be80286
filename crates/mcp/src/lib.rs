// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! mux-mcp: workspace-scoped MCP client cache with leased lifecycle

pub mod client;
pub mod config;
pub mod http;
pub mod manager;

pub use client::{ConnectedServer, McpChannel, McpClient, McpError, McpToolInfo, StdioChannel};
pub use config::{
    apply_overrides, config_signature, McpOverrides, McpServerConfig, McpTransportConfig,
};
pub use manager::{Connector, DefaultConnector, McpServerManager, NamespacedTool};
