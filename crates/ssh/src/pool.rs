// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection pool with singleflight probing and backoff.
//!
//! The pool owns the health map; runtimes observe through accessors and
//! bracket every transport call with [`ConnectionPool::acquire`]. At most one
//! physical probe is in flight per host key: concurrent callers await a
//! shared future and observe the same resolution, and exactly one of them
//! records the outcome.

use crate::config::{HostKey, SshConfig};
use crate::health::{backoff_delay, ConnectionHealth, HealthStatus};
use async_trait::async_trait;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use mux_core::clock::{Clock, SystemClock};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("in_backoff: host unavailable for another {retry_in:?}")]
    InBackoff { retry_in: Duration },
    #[error("probe_failed: {message}")]
    ProbeFailed { message: String },
}

/// Performs the physical reachability check for a host.
#[async_trait]
pub trait Prober: Send + Sync + 'static {
    async fn probe(&self, config: &SshConfig, timeout: Duration) -> Result<(), String>;
}

/// Options for one acquire call.
pub struct AcquireOptions {
    /// Budget for the physical probe.
    pub timeout: Duration,
    /// Longest single backoff sleep this caller will tolerate. Zero means
    /// fail fast with `in_backoff` instead of sleeping.
    pub max_wait: Duration,
    /// Invoked before each backoff sleep with the chosen wait.
    pub on_wait: Option<Box<dyn Fn(Duration) + Send + Sync>>,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(10), max_wait: Duration::from_secs(30), on_wait: None }
    }
}

type SharedProbe = Shared<BoxFuture<'static, Result<(), String>>>;
type Sleeper = Arc<dyn Fn(Duration) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Default)]
struct HostEntry {
    health: ConnectionHealth,
    in_flight: Option<SharedProbe>,
}

enum Action {
    Ready,
    Refuse(Duration),
    Wait(Duration),
    Probe(SharedProbe),
}

/// Shared per-process connection pool, safe under concurrent callers.
pub struct ConnectionPool<C: Clock = SystemClock> {
    clock: C,
    prober: Arc<dyn Prober>,
    sleeper: Sleeper,
    hosts: Mutex<HashMap<HostKey, HostEntry>>,
}

impl ConnectionPool<SystemClock> {
    pub fn new(prober: Arc<dyn Prober>) -> Self {
        Self::with_clock(SystemClock, prober)
    }
}

impl<C: Clock> ConnectionPool<C> {
    pub fn with_clock(clock: C, prober: Arc<dyn Prober>) -> Self {
        Self {
            clock,
            prober,
            sleeper: Arc::new(|d| tokio::time::sleep(d).boxed()),
            hosts: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the backoff sleeper. Test seam; production uses tokio time.
    #[cfg(any(test, feature = "test-support"))]
    pub fn set_sleeper(&mut self, sleeper: Sleeper) {
        self.sleeper = sleeper;
    }

    /// Stage an initial health record for a host key. Test seam.
    #[cfg(any(test, feature = "test-support"))]
    pub fn seed_health(&self, key: HostKey, health: ConnectionHealth) {
        self.hosts.lock().insert(key, HostEntry { health, in_flight: None });
    }

    /// Snapshot of a host's health, if it has ever been touched.
    pub fn health(&self, key: &HostKey) -> Option<ConnectionHealth> {
        self.hosts.lock().get(key).map(|e| e.health.clone())
    }

    /// Clear a host back to `unknown` so probe retries start fresh.
    pub fn reset_backoff(&self, key: &HostKey) {
        if let Some(entry) = self.hosts.lock().get_mut(key) {
            entry.health.reset();
        }
    }

    /// Ensure the host behind `config` is reachable, probing if necessary.
    pub async fn acquire(
        &self,
        config: &SshConfig,
        opts: &AcquireOptions,
    ) -> Result<(), PoolError> {
        let key = HostKey::for_config(config);
        loop {
            match self.next_action(&key, config, opts) {
                Action::Ready => return Ok(()),
                Action::Refuse(retry_in) => return Err(PoolError::InBackoff { retry_in }),
                Action::Wait(wait) => {
                    if let Some(on_wait) = &opts.on_wait {
                        on_wait(wait);
                    }
                    tracing::debug!(host = %key, wait_ms = wait.as_millis() as u64, "ssh backoff wait");
                    (self.sleeper)(wait).await;
                    // Re-read health after the sleep; another caller may have
                    // probed meanwhile.
                }
                Action::Probe(probe) => {
                    let result = probe.clone().await;
                    self.finish_probe(&key, &probe, &result);
                    return match result {
                        Ok(()) => Ok(()),
                        Err(message) => Err(PoolError::ProbeFailed { message }),
                    };
                }
            }
        }
    }

    fn next_action(&self, key: &HostKey, config: &SshConfig, opts: &AcquireOptions) -> Action {
        let mut hosts = self.hosts.lock();
        let entry = hosts.entry(key.clone()).or_default();

        if entry.health.status == HealthStatus::Healthy && entry.health.backoff_until.is_none() {
            return Action::Ready;
        }

        if let Some(until) = entry.health.backoff_until {
            let now = self.clock.now();
            if now < until {
                let remaining = until - now;
                let wait = remaining.min(opts.max_wait);
                if wait.is_zero() {
                    return Action::Refuse(remaining);
                }
                return Action::Wait(wait);
            }
            // Window elapsed: the host is unknown again.
            entry.health.status = HealthStatus::Unknown;
            entry.health.backoff_until = None;
        }

        if let Some(probe) = &entry.in_flight {
            return Action::Probe(probe.clone());
        }

        let prober = self.prober.clone();
        let config = config.clone();
        let timeout = opts.timeout;
        let probe: SharedProbe =
            async move { prober.probe(&config, timeout).await }.boxed().shared();
        entry.in_flight = Some(probe.clone());
        Action::Probe(probe)
    }

    /// Record the probe outcome exactly once per batch: only the caller that
    /// still finds this probe registered clears it and updates health. Every
    /// failure path lands here, so no probe error can skip the backoff.
    fn finish_probe(&self, key: &HostKey, probe: &SharedProbe, result: &Result<(), String>) {
        let mut hosts = self.hosts.lock();
        let Some(entry) = hosts.get_mut(key) else { return };
        let is_current = entry.in_flight.as_ref().is_some_and(|p| p.ptr_eq(probe));
        if !is_current {
            return;
        }
        entry.in_flight = None;
        match result {
            Ok(()) => {
                entry.health.record_success(self.clock.now());
                tracing::debug!(host = %key, "ssh probe ok");
            }
            Err(message) => {
                let delay =
                    backoff_delay(entry.health.consecutive_failures + 1, &mut rand::rng());
                entry.health.record_failure(self.clock.now(), message.clone(), delay);
                tracing::warn!(host = %key, error = %message, backoff_ms = delay.as_millis() as u64, "ssh probe failed");
            }
        }
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
