use super::counter::WindowCounter;
use super::types::{Admission, Classification, FailMode, THRESHOLD_KEY, WINDOW};
use crate::config::LimiterConfig;
use crate::error::{LimiterError, Result};
use crate::metrics;
use crate::settings::ConfigSource;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-identifier rate limiter with a remotely configured threshold
///
/// The threshold is the number of requests an identifier may make per
/// one-minute window. Zero disables limiting entirely. It only changes
/// through [`RateLimiter::refresh_threshold`]; all per-identifier state lives
/// in the window counter.
///
/// This struct is thread-safe and can be shared across tasks behind an `Arc`.
pub struct RateLimiter {
    threshold: AtomicU64,
    settings: Arc<dyn ConfigSource>,
    counter: Arc<dyn WindowCounter>,
    threshold_key: String,
    fail_mode: FailMode,
}

impl RateLimiter {
    /// Create a limiter with limiting disabled until the first refresh
    pub fn new(settings: Arc<dyn ConfigSource>, counter: Arc<dyn WindowCounter>) -> Self {
        Self {
            threshold: AtomicU64::new(0),
            settings,
            counter,
            threshold_key: THRESHOLD_KEY.to_string(),
            fail_mode: FailMode::default(),
        }
    }

    /// Create a limiter from the `limiter` configuration section
    pub fn from_config(
        config: &LimiterConfig,
        settings: Arc<dyn ConfigSource>,
        counter: Arc<dyn WindowCounter>,
    ) -> Self {
        Self::new(settings, counter)
            .with_threshold_key(config.threshold_key.clone())
            .with_initial_threshold(config.initial_threshold)
            .with_fail_mode(config.fail_mode)
    }

    pub fn with_threshold_key(mut self, key: impl Into<String>) -> Self {
        self.threshold_key = key.into();
        self
    }

    pub fn with_initial_threshold(self, threshold: u64) -> Self {
        self.threshold.store(threshold, Ordering::SeqCst);
        metrics::set_threshold(threshold);
        self
    }

    pub fn with_fail_mode(mut self, fail_mode: FailMode) -> Self {
        self.fail_mode = fail_mode;
        self
    }

    /// Current threshold
    pub fn threshold(&self) -> u64 {
        self.threshold.load(Ordering::SeqCst)
    }

    pub fn threshold_key(&self) -> &str {
        &self.threshold_key
    }

    pub fn fail_mode(&self) -> FailMode {
        self.fail_mode
    }

    /// Re-read the threshold from the settings source
    ///
    /// On any error the previous threshold stays in effect.
    pub async fn refresh_threshold(&self) -> Result<u64> {
        let raw = self.settings.get(&self.threshold_key).await?;
        let threshold = parse_threshold(&raw)?;

        let previous = self.threshold.swap(threshold, Ordering::SeqCst);
        metrics::set_threshold(threshold);

        if previous != threshold {
            info!(
                key = %self.threshold_key,
                previous = previous,
                threshold = threshold,
                "Rate threshold updated"
            );
        } else {
            debug!(threshold = threshold, "Rate threshold unchanged");
        }

        Ok(threshold)
    }

    /// Classify one request from `identifier`
    pub async fn classify(&self, identifier: &str) -> Result<Classification> {
        Ok(self.admit(identifier).await?.classification)
    }

    /// Classify one request and report how long a throttled client should wait
    pub async fn admit(&self, identifier: &str) -> Result<Admission> {
        let threshold = self.threshold();
        if threshold == 0 {
            metrics::record_classification(Classification::Normal);
            return Ok(Admission::normal());
        }

        let admission = match self.counter.allow_minute(identifier, threshold).await {
            Ok(decision) if decision.allowed => Admission::normal(),
            Ok(decision) => {
                debug!(
                    identifier = %identifier,
                    count = decision.count,
                    threshold = threshold,
                    retry_after_secs = decision.retry_after.as_secs(),
                    "Request rate too high"
                );
                Admission::too_high(decision.retry_after)
            }
            Err(e) => {
                metrics::record_counter_error();
                match self.fail_mode {
                    FailMode::Open => {
                        warn!(identifier = %identifier, error = %e, "Window counter failed, admitting request");
                        Admission::normal()
                    }
                    FailMode::Closed => {
                        warn!(identifier = %identifier, error = %e, "Window counter failed, throttling request");
                        Admission::too_high(WINDOW)
                    }
                    FailMode::Error => return Err(LimiterError::CounterBackend(e)),
                }
            }
        };

        debug!(
            identifier = %identifier,
            classification = %admission.classification,
            "Request classified"
        );
        metrics::record_classification(admission.classification);
        Ok(admission)
    }
}

/// Parse a threshold setting
///
/// Accepts a base-10 non-negative integer with an optional leading `+`,
/// ignoring surrounding whitespace.
pub fn parse_threshold(raw: &[u8]) -> Result<u64> {
    let text = String::from_utf8_lossy(raw);
    text.trim()
        .parse::<u64>()
        .map_err(|source| LimiterError::ConfigParse {
            value: text.into_owned(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::clock::ManualClock;
    use crate::rate_limit::counter::CounterError;
    use crate::rate_limit::local::LocalWindowCounter;
    use crate::rate_limit::types::CounterDecision;
    use crate::settings::StaticConfigSource;
    use async_trait::async_trait;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Counter that always fails and counts how often it was asked
    #[derive(Default)]
    struct FailingCounter {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl WindowCounter for FailingCounter {
        async fn allow_minute(
            &self,
            _identifier: &str,
            _limit: u64,
        ) -> std::result::Result<CounterDecision, CounterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(CounterError::Unavailable("connection refused".to_string()))
        }
    }

    fn limiter_with(settings: StaticConfigSource) -> RateLimiter {
        RateLimiter::new(Arc::new(settings), Arc::new(LocalWindowCounter::new()))
    }

    #[test]
    fn test_parse_threshold() {
        assert_eq!(parse_threshold(b"1000").unwrap(), 1000);
        assert_eq!(parse_threshold(b"0").unwrap(), 0);
        assert_eq!(parse_threshold(b" 42\n").unwrap(), 42);
        assert_eq!(parse_threshold(b"+5").unwrap(), 5);
        assert!(parse_threshold(b"a").is_err());
        assert!(parse_threshold(b"").is_err());
        assert!(parse_threshold(b"-1").is_err());
        assert!(parse_threshold(b"1.5").is_err());
        assert!(parse_threshold(&[0xff, 0xfe]).is_err());
    }

    #[tokio::test]
    async fn test_refresh_threshold() {
        let cases: Vec<(Option<&str>, u64, bool)> = vec![
            (Some("1000"), 1000, false),
            (Some("a"), 0, true),
            (None, 0, true),
        ];

        for (row, (value, expected, has_error)) in cases.into_iter().enumerate() {
            let settings = StaticConfigSource::new();
            match value {
                Some(v) => settings.set(THRESHOLD_KEY, v.to_string()),
                None => settings.set_unavailable(true),
            }

            let limiter = limiter_with(settings);
            let result = limiter.refresh_threshold().await;

            assert_eq!(result.is_err(), has_error, "row {}", row);
            assert_eq!(limiter.threshold(), expected, "row {}", row);
        }
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_previous_threshold() {
        let settings = StaticConfigSource::with_value(THRESHOLD_KEY, "25");
        let limiter = limiter_with(settings.clone());

        assert_eq!(limiter.refresh_threshold().await.unwrap(), 25);

        settings.set(THRESHOLD_KEY, "not-a-number");
        let err = limiter.refresh_threshold().await.unwrap_err();
        assert!(matches!(err, LimiterError::ConfigParse { .. }));
        assert_eq!(limiter.threshold(), 25);

        settings.set_unavailable(true);
        let err = limiter.refresh_threshold().await.unwrap_err();
        assert!(matches!(err, LimiterError::ConfigRead(_)));
        assert_eq!(limiter.threshold(), 25);

        settings.set_unavailable(false);
        settings.remove(THRESHOLD_KEY);
        let err = limiter.refresh_threshold().await.unwrap_err();
        assert!(matches!(
            err,
            LimiterError::ConfigRead(crate::settings::ConfigSourceError::KeyNotFound(_))
        ));
        assert_eq!(limiter.threshold(), 25);
    }

    #[tokio::test]
    async fn test_custom_threshold_key() {
        let settings = StaticConfigSource::with_value("limits/ip", "7");
        let limiter = limiter_with(settings).with_threshold_key("limits/ip");

        assert_eq!(limiter.refresh_threshold().await.unwrap(), 7);
        assert_eq!(limiter.threshold_key(), "limits/ip");
    }

    #[tokio::test]
    async fn test_classify() {
        let cases = vec![
            ("1.2.3.4", 10, 1, Classification::Normal),
            ("1.2.3.4", 3, 7, Classification::TooHigh),
            ("1.2.3.4", 0, 2, Classification::Normal),
        ];

        for (row, (id, threshold, times, expected)) in cases.into_iter().enumerate() {
            let limiter =
                limiter_with(StaticConfigSource::new()).with_initial_threshold(threshold);

            for _ in 0..times - 1 {
                limiter.classify(id).await.unwrap();
            }

            let state = limiter.classify(id).await.unwrap();
            assert_eq!(state, expected, "row {}", row);
        }
    }

    #[tokio::test]
    async fn test_classify_sequence() {
        let limiter = limiter_with(StaticConfigSource::new()).with_initial_threshold(3);

        let mut results = Vec::new();
        for _ in 0..7 {
            results.push(limiter.classify("1.2.3.4").await.unwrap());
        }

        assert_eq!(
            results,
            vec![
                Classification::Normal,
                Classification::Normal,
                Classification::Normal,
                Classification::TooHigh,
                Classification::TooHigh,
                Classification::TooHigh,
                Classification::TooHigh,
            ]
        );
    }

    #[tokio::test]
    async fn test_zero_threshold_skips_counter() {
        let counter = Arc::new(FailingCounter::default());
        let limiter = RateLimiter::new(Arc::new(StaticConfigSource::new()), counter.clone())
            .with_fail_mode(FailMode::Error);

        for _ in 0..5 {
            assert_eq!(
                limiter.classify("1.2.3.4").await.unwrap(),
                Classification::Normal
            );
        }
        assert_eq!(counter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_counter_failure_modes() {
        let settings: Arc<dyn ConfigSource> = Arc::new(StaticConfigSource::new());
        let counter: Arc<dyn WindowCounter> = Arc::new(FailingCounter::default());

        let open = RateLimiter::new(settings.clone(), counter.clone())
            .with_initial_threshold(5)
            .with_fail_mode(FailMode::Open);
        assert_eq!(open.classify("1.2.3.4").await.unwrap(), Classification::Normal);

        let closed = RateLimiter::new(settings.clone(), counter.clone())
            .with_initial_threshold(5)
            .with_fail_mode(FailMode::Closed);
        assert_eq!(
            closed.classify("1.2.3.4").await.unwrap(),
            Classification::TooHigh
        );

        let error = RateLimiter::new(settings, counter)
            .with_initial_threshold(5)
            .with_fail_mode(FailMode::Error);
        let err = error.classify("1.2.3.4").await.unwrap_err();
        assert!(matches!(err, LimiterError::CounterBackend(_)));
    }

    #[tokio::test]
    async fn test_threshold_change_applies_to_next_call() {
        let settings = StaticConfigSource::with_value(THRESHOLD_KEY, "1");
        let limiter = limiter_with(settings.clone());
        limiter.refresh_threshold().await.unwrap();

        assert_eq!(limiter.classify("10.0.0.1").await.unwrap(), Classification::Normal);
        assert_eq!(limiter.classify("10.0.0.1").await.unwrap(), Classification::TooHigh);

        settings.set(THRESHOLD_KEY, "0");
        limiter.refresh_threshold().await.unwrap();
        assert_eq!(limiter.classify("10.0.0.1").await.unwrap(), Classification::Normal);

        settings.set(THRESHOLD_KEY, "5");
        limiter.refresh_threshold().await.unwrap();
        // Two hits already counted in this window
        for _ in 0..3 {
            assert_eq!(limiter.classify("10.0.0.1").await.unwrap(), Classification::Normal);
        }
        assert_eq!(limiter.classify("10.0.0.1").await.unwrap(), Classification::TooHigh);
    }

    #[tokio::test]
    async fn test_admit_reports_retry_after() {
        let clock = ManualClock::default();
        let limiter = RateLimiter::new(
            Arc::new(StaticConfigSource::new()),
            Arc::new(LocalWindowCounter::with_clock(Arc::new(clock.clone()))),
        )
        .with_initial_threshold(1);

        assert_eq!(limiter.admit("1.2.3.4").await.unwrap(), Admission::normal());

        clock.advance(Duration::from_secs(45));
        let admission = limiter.admit("1.2.3.4").await.unwrap();
        assert_eq!(admission, Admission::too_high(Duration::from_secs(15)));
    }

    #[tokio::test]
    async fn test_fail_closed_waits_a_full_window() {
        let limiter = RateLimiter::new(
            Arc::new(StaticConfigSource::new()),
            Arc::new(FailingCounter::default()),
        )
        .with_initial_threshold(5)
        .with_fail_mode(FailMode::Closed);

        let admission = limiter.admit("1.2.3.4").await.unwrap();
        assert_eq!(admission, Admission::too_high(WINDOW));
    }

    #[test]
    fn test_initial_threshold_sets_gauge() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        ::metrics::with_local_recorder(&recorder, || {
            limiter_with(StaticConfigSource::new()).with_initial_threshold(25);
        });

        assert!(handle.render().contains("iplimit_threshold 25"));
    }

    #[tokio::test]
    async fn test_from_config() {
        let config = LimiterConfig {
            threshold_key: "custom".to_string(),
            refresh_interval_secs: 10,
            initial_threshold: 9,
            fail_mode: FailMode::Closed,
        };
        let limiter = RateLimiter::from_config(
            &config,
            Arc::new(StaticConfigSource::new()),
            Arc::new(LocalWindowCounter::new()),
        );

        assert_eq!(limiter.threshold(), 9);
        assert_eq!(limiter.threshold_key(), "custom");
        assert_eq!(limiter.fail_mode(), FailMode::Closed);
    }
}
