// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! mux-ssh: SSH transport, connection pool, and askpass bridge

pub mod askpass;
pub mod config;
pub mod health;
pub mod pool;
pub mod transport;

pub use askpass::{
    classify_prompt, AskpassSession, HostKeyPrompt, PromptKind, PromptRequest, PromptResolver,
};
pub use config::{
    control_path, host_key_policy, policy_args, set_host_key_policy, HostKey, HostKeyPolicy,
    SshConfig,
};
pub use health::{ConnectionHealth, HealthStatus};
pub use pool::{AcquireOptions, ConnectionPool, PoolError, Prober};
pub use transport::{ExecRequest, RemoteStat, SshTransport, TransportError};
