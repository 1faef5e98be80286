// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! mux-core: shared types for the mux orchestration core

pub mod macros;

pub mod bus;
pub mod clock;
pub mod event;
pub mod exec;
pub mod id;
pub mod message;
pub mod paths;
pub mod runtime_config;
pub mod workspace;

pub use bus::EventBus;
pub use clock::{Clock, FakeClock, SystemClock};
pub use event::{AbortReason, ChatPayload, DeleteNotice, ErrorType, MuxEvent};
pub use exec::{ExecError, ExecExit, ExecOutput, ExecStream};
pub use id::{short, MessageId, ProcessId, ToolCallId};
pub use message::{
    CompactionSource, FileDiff, Message, Metadata, MuxMetadata, Part, Role, TokenUsage, ToolState,
};
pub use paths::{
    expand_tilde, looks_windowsish, map_host_path_to_container, normalize_against,
    quote_for_container, PathError,
};
pub use runtime_config::{CoderConfig, RuntimeConfig};
pub use workspace::{Workspace, WorkspaceId};
