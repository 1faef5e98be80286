// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SSH connection configuration, pool keys, and control-master paths.

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// Connection parameters for one remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshConfig {
    pub host: String,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub identity_file: Option<PathBuf>,
}

impl SshConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into(), port: None, user: None, identity_file: None }
    }

    /// `user@host` destination as the ssh CLI expects it.
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }
}

/// Identity of a pooled connection.
///
/// Differing `srcBaseDir`s (or any other workspace detail) share the same
/// key; only host, port, identity file, and the local user separate pools.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostKey {
    pub host: String,
    pub port: u16,
    pub identity: String,
    pub local_user: String,
}

impl HostKey {
    pub fn for_config(config: &SshConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port.unwrap_or(22),
            identity: config
                .identity_file
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|| "default".to_string()),
            local_user: local_username(),
        }
    }
}

impl std::fmt::Display for HostKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} ({})", self.host, self.port, self.identity)
    }
}

fn local_username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Control-master socket path for a config.
///
/// Includes the local user and a digest of (host, port, identity) so shared
/// temp directories on multi-user machines cannot collide.
pub fn control_path(config: &SshConfig) -> PathBuf {
    let key = HostKey::for_config(config);
    let mut hasher = Sha256::new();
    hasher.update(key.host.as_bytes());
    hasher.update([0]);
    hasher.update(key.port.to_string().as_bytes());
    hasher.update([0]);
    hasher.update(key.identity.as_bytes());
    hasher.update([0]);
    hasher.update(key.local_user.as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(12);
    for byte in digest.iter().take(6) {
        hex.push_str(&format!("{byte:02x}"));
    }
    std::env::temp_dir().join(format!("mux-ssh-{}-{}.sock", key.local_user, hex))
}

/// Host-key verification policy for spawned ssh processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostKeyPolicy {
    /// Respect known_hosts; prompts route through the askpass bridge.
    #[default]
    Strict,
    /// Accept anything; for headless environments with no resolver attached.
    HeadlessFallback,
}

/// Extra ssh arguments implied by a policy. Strict appends nothing.
pub fn policy_args(policy: HostKeyPolicy) -> &'static [&'static str] {
    match policy {
        HostKeyPolicy::Strict => &[],
        HostKeyPolicy::HeadlessFallback => {
            &["-o", "StrictHostKeyChecking=no", "-o", "UserKnownHostsFile=/dev/null"]
        }
    }
}

static PROCESS_POLICY: RwLock<HostKeyPolicy> = RwLock::new(HostKeyPolicy::Strict);

/// Current process-wide host-key policy.
pub fn host_key_policy() -> HostKeyPolicy {
    *PROCESS_POLICY.read()
}

/// Replace the process-wide host-key policy, returning the previous value.
///
/// Tests that change this must restore it (and run `#[serial]`).
pub fn set_host_key_policy(policy: HostKeyPolicy) -> HostKeyPolicy {
    std::mem::replace(&mut PROCESS_POLICY.write(), policy)
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
