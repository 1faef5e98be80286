// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tagged runtime configuration variants.
//!
//! Configs are persisted by older and newer frontends alike, so the `type`
//! tag is matched manually: a tag this build does not know deserializes into
//! [`RuntimeConfig::Incompatible`] instead of failing, and the dispatcher
//! turns that into a typed error suggesting an upgrade.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::path::PathBuf;

/// Coder sub-block of an SSH runtime config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoderConfig {
    /// Canonical Coder workspace name (`mux-<slug>`); set by `finalizeConfig`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalConfig {
    /// Legacy: `local` with a base dir is an alias for `worktree`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_base_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorktreeConfig {
    pub src_base_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshConfigBlock {
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coder: Option<CoderConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Explicit container name; derived from (project, workspace) when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevcontainerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_path: Option<PathBuf>,
    /// Workspace folder mounted inside the container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_folder: Option<String>,
}

/// Runtime configuration, one variant per execution back-end.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeConfig {
    Local(LocalConfig),
    Worktree(WorktreeConfig),
    Ssh(SshConfigBlock),
    Docker(DockerConfig),
    Devcontainer(DevcontainerConfig),
    /// Unknown tag from a newer producer. Round-trips unchanged.
    Incompatible { kind: String, raw: Value },
}

impl RuntimeConfig {
    pub fn kind(&self) -> &str {
        match self {
            RuntimeConfig::Local(_) => "local",
            RuntimeConfig::Worktree(_) => "worktree",
            RuntimeConfig::Ssh(_) => "ssh",
            RuntimeConfig::Docker(_) => "docker",
            RuntimeConfig::Devcontainer(_) => "devcontainer",
            RuntimeConfig::Incompatible { kind, .. } => kind,
        }
    }

    /// Resolve the legacy alias: `local` carrying a `srcBaseDir` is a
    /// worktree config that predates the explicit tag.
    pub fn normalized(self) -> RuntimeConfig {
        match self {
            RuntimeConfig::Local(LocalConfig { src_base_dir: Some(dir) }) => {
                RuntimeConfig::Worktree(WorktreeConfig { src_base_dir: dir })
            }
            other => other,
        }
    }
}

impl Serialize for RuntimeConfig {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        fn tagged<T: Serialize, E: serde::ser::Error>(kind: &str, body: &T) -> Result<Value, E> {
            let mut value = serde_json::to_value(body).map_err(E::custom)?;
            if let Value::Object(map) = &mut value {
                map.insert("type".into(), Value::String(kind.into()));
            }
            Ok(value)
        }

        let value = match self {
            RuntimeConfig::Local(c) => tagged("local", c)?,
            RuntimeConfig::Worktree(c) => tagged("worktree", c)?,
            RuntimeConfig::Ssh(c) => tagged("ssh", c)?,
            RuntimeConfig::Docker(c) => tagged("docker", c)?,
            RuntimeConfig::Devcontainer(c) => tagged("devcontainer", c)?,
            RuntimeConfig::Incompatible { raw, .. } => raw.clone(),
        };
        value.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RuntimeConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        let kind = raw
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| D::Error::custom("runtime config missing \"type\""))?
            .to_string();

        fn body<T, E>(raw: &Value) -> Result<T, E>
        where
            T: serde::de::DeserializeOwned,
            E: serde::de::Error,
        {
            serde_json::from_value(raw.clone()).map_err(E::custom)
        }

        Ok(match kind.as_str() {
            "local" => RuntimeConfig::Local(body(&raw)?),
            "worktree" => RuntimeConfig::Worktree(body(&raw)?),
            "ssh" => RuntimeConfig::Ssh(body(&raw)?),
            "docker" => RuntimeConfig::Docker(body(&raw)?),
            "devcontainer" => RuntimeConfig::Devcontainer(body(&raw)?),
            _ => RuntimeConfig::Incompatible { kind, raw },
        })
    }
}

#[cfg(test)]
#[path = "runtime_config_tests.rs"]
mod tests;
