// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common utilities for lanlink integration tests

#![allow(dead_code)]

use lanlink_network::{SessionConfig, SessionEvent};
use once_cell::sync::Lazy;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{timeout, Instant};
use tracing_subscriber::EnvFilter;

// Initialize logging for tests
static INIT_LOGGING: Lazy<()> = Lazy::new(|| {
    // Only show warnings and errors unless RUST_LOG is explicitly set
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
});

/// Install the test subscriber once per test binary
pub fn init_logging() {
    Lazy::force(&INIT_LOGGING);
}

/// Loopback configuration with short intervals.
///
/// Discovery binds an ephemeral port; point a host's `beacon_target` at the
/// searcher's `local_discovery_addr()` to connect the two.
pub fn test_config() -> SessionConfig {
    let mut config = SessionConfig::loopback(0);
    config.beacon_interval = Duration::from_millis(100);
    config.connect_timeout = Duration::from_secs(2);
    config.shutdown_timeout = Duration::from_secs(2);
    config
}

/// Next event, failing the test after `limit`
pub async fn next_event(
    events: &mut broadcast::Receiver<SessionEvent>,
    limit: Duration,
) -> SessionEvent {
    timeout(limit, events.recv())
        .await
        .expect("event before timeout")
        .expect("event channel open")
}

/// Skip events until one matches `pred`
pub async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<SessionEvent>,
    limit: Duration,
    pred: F,
) -> SessionEvent
where
    F: Fn(&SessionEvent) -> bool,
{
    let deadline = Instant::now() + limit;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = next_event(events, remaining).await;
        if pred(&event) {
            return event;
        }
    }
}

/// Poll `cond` until it holds or `limit` passes
pub async fn wait_until<F>(limit: Duration, cond: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
