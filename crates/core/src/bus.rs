// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single in-process event emitter.
//!
//! Each emission is dispatched synchronously to all subscribers in
//! registration order. Emissions never propagate subscriber panics; a
//! misbehaving bridge is logged and the remaining subscribers still run.

use crate::event::MuxEvent;
use parking_lot::RwLock;
use std::sync::Arc;

type Subscriber = Box<dyn Fn(&MuxEvent) + Send + Sync>;

/// Process-wide typed emitter. Cheap to clone; clones share subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. Subscribers cannot be removed; bridges live for
    /// the life of the process.
    pub fn subscribe(&self, f: impl Fn(&MuxEvent) + Send + Sync + 'static) {
        self.subscribers.write().push(Box::new(f));
    }

    /// Dispatch an event to every subscriber, in registration order.
    pub fn emit(&self, event: MuxEvent) {
        let subscribers = self.subscribers.read();
        for subscriber in subscribers.iter() {
            let guard = std::panic::AssertUnwindSafe(|| subscriber(&event));
            if std::panic::catch_unwind(guard).is_err() {
                tracing::error!(event = ?event, "event subscriber panicked");
            }
        }
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
