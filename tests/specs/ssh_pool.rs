// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SSH pool specs: herd release and backoff discipline.

use async_trait::async_trait;
use mux_ssh::config::{HostKey, SshConfig};
use mux_ssh::health::HealthStatus;
use mux_ssh::pool::{AcquireOptions, ConnectionPool, Prober};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Fails the first probe, then succeeds; every probe holds briefly so
/// concurrent callers can pile onto the same in-flight future.
struct RecoveringProber {
    probes: AtomicU32,
}

#[async_trait]
impl Prober for RecoveringProber {
    async fn probe(&self, _config: &SshConfig, _timeout: Duration) -> Result<(), String> {
        let n = self.probes.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(40)).await;
        if n == 0 {
            Err("connection refused".into())
        } else {
            Ok(())
        }
    }
}

/// Spec: given a host in backoff, three concurrent acquires sleep through
/// the window, exactly one recovery probe runs, and all three resolve Ok
/// with failures reset and the window cleared.
#[tokio::test]
async fn herd_sleeps_through_backoff_and_one_probe_releases_everyone() {
    let prober = Arc::new(RecoveringProber { probes: AtomicU32::new(0) });
    let pool = Arc::new(ConnectionPool::new(prober.clone()));
    let config = SshConfig::new("herd.spec.example");

    // Seed the backoff window (~250ms ± 20%).
    pool.acquire(&config, &AcquireOptions::default()).await.unwrap_err();
    assert_eq!(prober.probes.load(Ordering::SeqCst), 1);

    let mut callers = Vec::new();
    for _ in 0..3 {
        let pool = pool.clone();
        let config = config.clone();
        callers.push(tokio::spawn(async move {
            pool.acquire(&config, &AcquireOptions::default()).await
        }));
    }
    for caller in callers {
        caller.await.unwrap().unwrap();
    }

    // Exactly one probe for the whole batch.
    assert_eq!(prober.probes.load(Ordering::SeqCst), 2);

    let health = pool.health(&HostKey::for_config(&config)).unwrap();
    assert_eq!(health.status, HealthStatus::Healthy);
    assert_eq!(health.consecutive_failures, 0);
    assert!(health.backoff_until.is_none());
}

struct AlwaysDown;

#[async_trait]
impl Prober for AlwaysDown {
    async fn probe(&self, _config: &SshConfig, _timeout: Duration) -> Result<(), String> {
        Err("no route to host".into())
    }
}

/// Backoff windows grow with consecutive failures and stay within the
/// jitter envelope.
#[tokio::test]
async fn repeated_failures_double_the_window_within_jitter_bounds() {
    let pool = ConnectionPool::new(Arc::new(AlwaysDown));
    let config = SshConfig::new("down.spec.example");
    let key = HostKey::for_config(&config);

    let mut expected_base = 250u64;
    for attempt in 1..=4u32 {
        // Wait out any previous window so the acquire probes again.
        if let Some(health) = pool.health(&key) {
            if let Some(until) = health.backoff_until {
                let now = std::time::Instant::now();
                if until > now {
                    tokio::time::sleep(until - now + Duration::from_millis(10)).await;
                }
            }
        }
        pool.acquire(&config, &AcquireOptions::default()).await.unwrap_err();

        let health = pool.health(&key).unwrap();
        assert_eq!(health.consecutive_failures, attempt);
        let remaining = health.backoff_until.unwrap() - std::time::Instant::now();
        let base = Duration::from_millis(expected_base);
        assert!(remaining <= base.mul_f64(1.25), "window too long: {remaining:?}");
        expected_base = (expected_base * 2).min(10_000);
    }
}
