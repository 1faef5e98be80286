// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deterministic provider double for tests and demos.
//!
//! Plays scripted event sequences, one scenario per opened stream, with the
//! same shapes the stream manager consumes from real providers.

use crate::provider::{Provider, ProviderEvent, StreamRequest, STREAM_BUFFER};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;

/// One step of a scripted stream.
#[derive(Debug, Clone)]
pub enum ScenarioStep {
    Emit(ProviderEvent),
    /// Hold the stream open without emitting.
    Pause(Duration),
}

/// Scripted provider: each `open_stream` plays the next queued scenario.
/// With no scenario left, streams finish immediately with empty usage.
#[derive(Default)]
pub struct MockScenarioPlayer {
    scenarios: Mutex<VecDeque<Vec<ScenarioStep>>>,
}

impl MockScenarioPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scenario(scenario: Vec<ScenarioStep>) -> Self {
        let player = Self::default();
        player.push_scenario(scenario);
        player
    }

    pub fn push_scenario(&self, scenario: Vec<ScenarioStep>) {
        self.scenarios.lock().push_back(scenario);
    }

    /// Scripted scenarios not yet played.
    pub fn remaining(&self) -> usize {
        self.scenarios.lock().len()
    }
}

impl Provider for MockScenarioPlayer {
    fn open_stream(&self, _request: StreamRequest) -> mpsc::Receiver<ProviderEvent> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let scenario = self.scenarios.lock().pop_front().unwrap_or_else(|| {
            vec![ScenarioStep::Emit(ProviderEvent::Finish {
                usage: Default::default(),
                context_usage: None,
            })]
        });
        tokio::spawn(async move {
            for step in scenario {
                match step {
                    ScenarioStep::Emit(event) => {
                        if tx.send(event).await.is_err() {
                            return; // consumer aborted
                        }
                    }
                    ScenarioStep::Pause(duration) => tokio::time::sleep(duration).await,
                }
            }
        });
        rx
    }
}

#[cfg(test)]
#[path = "scenario_tests.rs"]
mod tests;
