// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! MCP server configuration, overrides, and cache signatures.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// How to reach one MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum McpTransportConfig {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    Http {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    Sse {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
}

impl McpTransportConfig {
    /// The HTTP transport's SSE twin, for the status-code fallback.
    pub fn as_sse(&self) -> Option<McpTransportConfig> {
        match self {
            McpTransportConfig::Http { url, headers } => Some(McpTransportConfig::Sse {
                url: url.clone(),
                headers: headers.clone(),
            }),
            _ => None,
        }
    }
}

/// One configured server, project level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerConfig {
    pub name: String,
    #[serde(flatten)]
    pub transport: McpTransportConfig,
    /// Project-level switch; workspace overrides can force either way.
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_allowlist: Option<Vec<String>>,
}

fn enabled_default() -> bool {
    true
}

/// Workspace-scoped adjustments, applied last.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpOverrides {
    /// Force-enable, even if project-disabled.
    #[serde(default)]
    pub enabled_servers: Vec<String>,
    /// Force-skip.
    #[serde(default)]
    pub disabled_servers: Vec<String>,
    /// Intersected with any project-level allowlist.
    #[serde(default)]
    pub tool_allowlist: BTreeMap<String, Vec<String>>,
}

/// Resolve project configs against workspace overrides.
pub fn apply_overrides(
    project: &[McpServerConfig],
    overrides: &McpOverrides,
) -> Vec<McpServerConfig> {
    project
        .iter()
        .filter_map(|cfg| {
            if overrides.disabled_servers.iter().any(|n| n == &cfg.name) {
                return None;
            }
            let forced = overrides.enabled_servers.iter().any(|n| n == &cfg.name);
            if !cfg.enabled && !forced {
                return None;
            }
            let mut cfg = cfg.clone();
            cfg.enabled = true;
            if let Some(ws_list) = overrides.tool_allowlist.get(&cfg.name) {
                cfg.tool_allowlist = Some(match cfg.tool_allowlist.take() {
                    Some(project_list) => project_list
                        .into_iter()
                        .filter(|t| ws_list.contains(t))
                        .collect(),
                    None => ws_list.clone(),
                });
            }
            Some(cfg)
        })
        .collect()
}

/// Cache key for a resolved server set: name, transport shape, command/url,
/// header material, and allowlists all participate.
pub fn config_signature(configs: &[McpServerConfig]) -> String {
    let mut hasher = Sha256::new();
    for cfg in configs {
        // serde_json's map ordering is stable for BTreeMap fields.
        let encoded = serde_json::to_string(cfg).unwrap_or_default();
        hasher.update(encoded.as_bytes());
        hasher.update([0]);
    }
    let digest = hasher.finalize();
    digest.iter().take(16).map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
