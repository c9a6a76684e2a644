use super::clock::{Clock, SystemClock};
use super::counter::{CounterError, WindowCounter};
use super::types::{CounterDecision, WINDOW};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct WindowState {
    started: Instant,
    count: u64,
}

/// Local (in-memory) window counter
///
/// Each identifier gets a fixed window that opens on its first hit and
/// resets once [`WINDOW`] has elapsed. State is per process, so this is only
/// suitable for tests and single-instance deployments.
///
/// Expired windows are swept from within `allow_minute` at most once per
/// window length, so memory tracks the clients seen in the last window.
pub struct LocalWindowCounter {
    windows: Arc<DashMap<String, WindowState>>,
    clock: Arc<dyn Clock>,
    window: Duration,
    created: Instant,
    /// Milliseconds after `created` of the last sweep
    last_purge_ms: AtomicU64,
}

impl LocalWindowCounter {
    /// Create a counter driven by the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a counter driven by the given clock
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let created = clock.now();
        Self {
            windows: Arc::new(DashMap::new()),
            clock,
            window: WINDOW,
            created,
            last_purge_ms: AtomicU64::new(0),
        }
    }

    /// Drop all window state, as if every window had rolled over
    pub fn flush(&self) {
        self.windows.clear();
    }

    /// Number of identifiers with live state
    pub fn active_windows(&self) -> usize {
        self.windows.len()
    }

    /// Remove state for identifiers whose window has elapsed
    pub fn purge_expired(&self) {
        self.purge_at(self.clock.now());
    }

    fn purge_at(&self, now: Instant) {
        let window = self.window;
        let before = self.windows.len();
        self.windows
            .retain(|_, state| now.saturating_duration_since(state.started) < window);

        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            debug!(removed = removed, "Purged expired windows");
        }
    }

    /// Sweep expired windows if a full window has passed since the last sweep
    fn maybe_purge(&self, now: Instant) {
        let since_created = now.saturating_duration_since(self.created).as_millis() as u64;
        let last = self.last_purge_ms.load(Ordering::Relaxed);
        if since_created.saturating_sub(last) < self.window.as_millis() as u64 {
            return;
        }

        // Only the caller that wins the swap sweeps
        if self
            .last_purge_ms
            .compare_exchange(last, since_created, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            self.purge_at(now);
        }
    }
}

impl Default for LocalWindowCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WindowCounter for LocalWindowCounter {
    async fn allow_minute(
        &self,
        identifier: &str,
        limit: u64,
    ) -> Result<CounterDecision, CounterError> {
        let now = self.clock.now();
        self.maybe_purge(now);

        let state = {
            let mut entry = self
                .windows
                .entry(identifier.to_string())
                .or_insert_with(|| {
                    debug!(identifier = %identifier, "Opening new window");
                    WindowState {
                        started: now,
                        count: 0,
                    }
                });

            if now.duration_since(entry.started) >= self.window {
                entry.started = now;
                entry.count = 0;
            }

            entry.count += 1;
            *entry
        };

        if state.count <= limit {
            Ok(CounterDecision::allowed(state.count))
        } else {
            let elapsed = now.duration_since(state.started);
            debug!(
                identifier = %identifier,
                count = state.count,
                limit = limit,
                "Window limit exceeded"
            );
            Ok(CounterDecision::denied(
                state.count,
                self.window.saturating_sub(elapsed),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::clock::ManualClock;

    #[tokio::test]
    async fn test_local_counter_allows_within_limit() {
        let counter = LocalWindowCounter::new();

        for i in 1..=10 {
            let decision = counter.allow_minute("192.168.1.1", 10).await.unwrap();
            assert!(decision.allowed, "Request {} should be allowed", i);
            assert_eq!(decision.count, i);
        }
    }

    #[tokio::test]
    async fn test_local_counter_denies_over_limit() {
        let counter = LocalWindowCounter::new();

        for _ in 0..5 {
            assert!(counter.allow_minute("192.168.1.2", 5).await.unwrap().allowed);
        }

        let decision = counter.allow_minute("192.168.1.2", 5).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.count, 6);
        assert!(decision.retry_after > Duration::ZERO);
        assert!(decision.retry_after <= WINDOW);
    }

    #[tokio::test]
    async fn test_local_counter_different_keys() {
        let counter = LocalWindowCounter::new();

        for _ in 0..2 {
            assert!(counter.allow_minute("192.168.1.1", 2).await.unwrap().allowed);
        }
        assert!(!counter.allow_minute("192.168.1.1", 2).await.unwrap().allowed);
        assert!(counter.allow_minute("192.168.1.2", 2).await.unwrap().allowed);

        assert_eq!(counter.active_windows(), 2);
    }

    #[tokio::test]
    async fn test_local_counter_zero_limit_never_allows() {
        let counter = LocalWindowCounter::new();
        let decision = counter.allow_minute("192.168.1.1", 0).await.unwrap();
        assert!(!decision.allowed);
    }

    #[tokio::test]
    async fn test_local_counter_window_rollover() {
        let clock = ManualClock::default();
        let counter = LocalWindowCounter::with_clock(Arc::new(clock.clone()));

        for _ in 0..2 {
            counter.allow_minute("user123", 2).await.unwrap();
        }
        let decision = counter.allow_minute("user123", 2).await.unwrap();
        assert!(!decision.allowed);

        clock.advance(Duration::from_secs(20));
        let decision = counter.allow_minute("user123", 2).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after, Duration::from_secs(40));

        clock.advance(Duration::from_secs(40));
        let decision = counter.allow_minute("user123", 2).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.count, 1);
    }

    #[tokio::test]
    async fn test_local_counter_flush() {
        let counter = LocalWindowCounter::new();

        counter.allow_minute("1.2.3.4", 1).await.unwrap();
        assert!(!counter.allow_minute("1.2.3.4", 1).await.unwrap().allowed);

        counter.flush();
        assert_eq!(counter.active_windows(), 0);
        assert!(counter.allow_minute("1.2.3.4", 1).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_local_counter_purge_expired() {
        let clock = ManualClock::default();
        let counter = LocalWindowCounter::with_clock(Arc::new(clock.clone()));

        counter.allow_minute("old", 5).await.unwrap();
        clock.advance(Duration::from_secs(30));
        counter.allow_minute("new", 5).await.unwrap();
        clock.advance(Duration::from_secs(30));

        counter.purge_expired();
        assert_eq!(counter.active_windows(), 1);
    }

    #[tokio::test]
    async fn test_local_counter_sweeps_idle_identifiers() {
        let clock = ManualClock::default();
        let counter = LocalWindowCounter::with_clock(Arc::new(clock.clone()));

        for i in 0..10_000 {
            counter.allow_minute(&format!("id-{}", i), 5).await.unwrap();
        }
        assert_eq!(counter.active_windows(), 10_000);

        clock.advance(Duration::from_secs(3600));
        counter.allow_minute("late", 5).await.unwrap();

        assert_eq!(counter.active_windows(), 1);
    }

    #[tokio::test]
    async fn test_local_counter_keeps_live_windows_on_sweep() {
        let clock = ManualClock::default();
        let counter = LocalWindowCounter::with_clock(Arc::new(clock.clone()));

        counter.allow_minute("stale", 1).await.unwrap();
        clock.advance(Duration::from_secs(30));
        counter.allow_minute("busy", 1).await.unwrap();
        assert!(!counter.allow_minute("busy", 1).await.unwrap().allowed);

        // First sweep happens one window after creation
        clock.advance(Duration::from_secs(30));
        assert!(!counter.allow_minute("busy", 1).await.unwrap().allowed);
        assert_eq!(counter.active_windows(), 1);
    }
}
