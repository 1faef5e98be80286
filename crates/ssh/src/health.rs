// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-host connection health and backoff schedule.
//!
//! Transitions: `unknown → healthy` on probe success; any state plus a
//! failure → `unhealthy` with a fresh backoff window; an elapsed window
//! returns the host to `unknown` on the next acquire. `Degraded` exists in
//! the status vocabulary for observers but no acquire transition produces it.

use rand::Rng;
use std::time::{Duration, Instant};

pub const BACKOFF_BASE_MS: u64 = 250;
pub const BACKOFF_CAP_MS: u64 = 10_000;
pub const BACKOFF_JITTER: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
    Degraded,
}

mux_core::simple_display! {
    HealthStatus {
        Unknown => "unknown",
        Healthy => "healthy",
        Unhealthy => "unhealthy",
        Degraded => "degraded",
    }
}

/// Health record for one pooled host key.
#[derive(Debug, Clone, Default)]
pub struct ConnectionHealth {
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub backoff_until: Option<Instant>,
    pub last_error: Option<String>,
    pub last_success: Option<Instant>,
}

impl ConnectionHealth {
    pub fn record_success(&mut self, now: Instant) {
        self.status = HealthStatus::Healthy;
        self.consecutive_failures = 0;
        self.backoff_until = None;
        self.last_success = Some(now);
    }

    pub fn record_failure(&mut self, now: Instant, error: impl Into<String>, delay: Duration) {
        self.status = HealthStatus::Unhealthy;
        self.consecutive_failures += 1;
        self.backoff_until = Some(now + delay);
        self.last_error = Some(error.into());
    }

    /// Clear status back to `unknown`, preserving `last_error` as-is.
    pub fn reset(&mut self) {
        self.status = HealthStatus::Unknown;
        self.consecutive_failures = 0;
        self.backoff_until = None;
    }
}

/// Un-jittered backoff base for the Nth consecutive failure (1-based).
pub fn backoff_base(consecutive_failures: u32) -> Duration {
    let exp = consecutive_failures.saturating_sub(1).min(15);
    Duration::from_millis((BACKOFF_BASE_MS << exp).min(BACKOFF_CAP_MS))
}

/// Backoff with ±20% jitter applied.
pub fn backoff_delay(consecutive_failures: u32, rng: &mut impl Rng) -> Duration {
    let base = backoff_base(consecutive_failures).as_millis() as f64;
    let jitter: f64 = rng.random_range(-BACKOFF_JITTER..=BACKOFF_JITTER);
    Duration::from_millis((base * (1.0 + jitter)).round() as u64)
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod tests;
