//! Rate limiting module
//!
//! Requests are classified per client identifier against a single global
//! threshold that is read from a remote settings store and can change while
//! the service runs.
//!
//! - [`RateLimiter`]: holds the threshold and classifies requests
//! - [`WindowCounter`]: per-minute increment-and-check, backed by Redis
//!   ([`RedisWindowCounter`]) or process memory ([`LocalWindowCounter`])
//! - [`ThresholdRefresher`]: re-reads the threshold on an interval
//! - [`admission_middleware`]: answers `429` for throttled clients
//!
//! # Example
//!
//! ```rust,no_run
//! use iplimit::rate_limit::{Classification, LocalWindowCounter, RateLimiter};
//! use iplimit::settings::StaticConfigSource;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let settings = StaticConfigSource::with_value("IP_RATE_THRESHOLD", "100");
//!     let limiter = RateLimiter::new(Arc::new(settings), Arc::new(LocalWindowCounter::new()));
//!
//!     limiter.refresh_threshold().await.unwrap();
//!     assert_eq!(limiter.classify("1.2.3.4").await.unwrap(), Classification::Normal);
//! }
//! ```

pub mod clock;
pub mod counter;
pub mod limiter;
pub mod local;
pub mod lua_scripts;
pub mod middleware;
pub mod redis;
pub mod refresher;
pub mod types;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use counter::{CounterError, WindowCounter};
pub use limiter::{parse_threshold, RateLimiter};
pub use local::LocalWindowCounter;
pub use middleware::{admission_middleware, AdmissionState};
pub use redis::RedisWindowCounter;
pub use refresher::{refresh_once, RefresherHandle, ThresholdRefresher};
pub use types::{
    Admission, Classification, CounterDecision, FailMode, THRESHOLD_KEY, WINDOW,
};
