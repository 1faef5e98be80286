// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coalesces user messages that arrive during an active stream.

use mux_core::message::{MuxMetadata, Part};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// A compaction request cannot coalesce with already-queued messages.
    #[error("compaction_busy: messages are already queued")]
    CompactionBusy,
}

/// Options carried with a queued message; later adds overwrite earlier ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendOptions {
    pub model: Option<String>,
    pub additional_instructions: Option<String>,
}

/// What `produce_message` hands back to the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct ProducedMessage {
    pub text: String,
    pub options: SendOptions,
    /// The first queued message's metadata, preserved across adds.
    pub mux_metadata: Option<MuxMetadata>,
    pub images: Vec<Part>,
}

#[derive(Default)]
pub struct MessageQueue {
    texts: Vec<String>,
    first_metadata: Option<MuxMetadata>,
    latest_options: SendOptions,
    images: Vec<Part>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty() && self.images.is_empty()
    }

    /// Queue a message. Empty text with no images is ignored.
    pub fn add(
        &mut self,
        text: &str,
        mux_metadata: Option<MuxMetadata>,
        options: SendOptions,
        images: Vec<Part>,
    ) -> Result<(), QueueError> {
        if text.is_empty() && images.is_empty() {
            return Ok(());
        }
        if matches!(mux_metadata, Some(MuxMetadata::CompactionRequest { .. })) && !self.is_empty()
        {
            return Err(QueueError::CompactionBusy);
        }

        if self.is_empty() {
            self.first_metadata = mux_metadata;
        }
        if !text.is_empty() {
            self.texts.push(text.to_string());
        }
        self.images.extend(images);
        self.latest_options = options;
        Ok(())
    }

    /// What the frontend shows for the queued batch: the raw command when a
    /// single compaction request is queued, joined texts otherwise.
    pub fn display_text(&self) -> String {
        if self.texts.len() == 1 {
            if let Some(MuxMetadata::CompactionRequest { raw_command: Some(raw), .. }) =
                &self.first_metadata
            {
                return raw.clone();
            }
        }
        self.texts.join("\n")
    }

    /// Drain into one message; `None` when nothing is queued.
    pub fn produce_message(&mut self) -> Option<ProducedMessage> {
        if self.is_empty() {
            return None;
        }
        let produced = ProducedMessage {
            text: self.texts.join("\n"),
            options: self.latest_options.clone(),
            mux_metadata: self.first_metadata.clone(),
            images: std::mem::take(&mut self.images),
        };
        self.clear();
        Some(produced)
    }

    pub fn clear(&mut self) {
        self.texts.clear();
        self.first_metadata = None;
        self.latest_options = SendOptions::default();
        self.images.clear();
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
