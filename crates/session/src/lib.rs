// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! mux-session: per-workspace orchestration, history, streaming, compaction

pub mod compact;
pub mod history;
pub mod logging;
pub mod orchestrator;
pub mod provider;
pub mod queue;
pub mod registry;
pub mod scenario;
pub mod stream;
pub mod system_message;
pub mod tokens;

pub use compact::{CompactionEngine, StreamEndInfo};
pub use history::{HistoryError, HistoryLog, SessionLock};
pub use orchestrator::{ReadinessGate, SessionOrchestrator};
pub use provider::{Provider, ProviderEvent, StreamRequest, ToolDescriptor};
pub use queue::{MessageQueue, ProducedMessage, QueueError, SendOptions};
pub use registry::WorkspaceRegistry;
pub use scenario::{MockScenarioPlayer, ScenarioStep};
pub use stream::{NoTools, StreamManager, StreamOutcome, ToolCatalog, WorkspaceTools};
pub use system_message::{SystemMessageBuilder, SystemMessageSources};
pub use tokens::{approx_token_count, count_with_budget, Tokenizer};
