use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Well-known settings key holding the per-minute threshold
pub const THRESHOLD_KEY: &str = "IP_RATE_THRESHOLD";

/// Length of a counting window
pub const WINDOW: Duration = Duration::from_secs(60);

/// Outcome of classifying a single request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    /// Admit the request
    Normal,
    /// Throttle the request
    TooHigh,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Normal => "normal",
            Classification::TooHigh => "too_high",
        }
    }

    pub fn is_admitted(&self) -> bool {
        matches!(self, Classification::Normal)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of one request plus how long a throttled client should wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub classification: Classification,
    /// Time until the client's window ends; zero when admitted
    pub retry_after: Duration,
}

impl Admission {
    pub fn normal() -> Self {
        Self {
            classification: Classification::Normal,
            retry_after: Duration::ZERO,
        }
    }

    pub fn too_high(retry_after: Duration) -> Self {
        Self {
            classification: Classification::TooHigh,
            retry_after,
        }
    }

    pub fn is_admitted(&self) -> bool {
        self.classification.is_admitted()
    }
}

/// What to do with a request when the window counter cannot be reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    /// Admit the request
    #[default]
    Open,
    /// Throttle the request
    Closed,
    /// Return the counter error to the caller
    Error,
}

/// Result of one increment-and-check against a window counter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterDecision {
    /// Count for the identifier in the current window, including this call
    pub count: u64,
    /// Time until the window ends; zero when allowed
    pub retry_after: Duration,
    /// Whether the count stays within the limit
    pub allowed: bool,
}

impl CounterDecision {
    /// Create an allowed decision
    pub fn allowed(count: u64) -> Self {
        Self {
            count,
            retry_after: Duration::ZERO,
            allowed: true,
        }
    }

    /// Create a denied decision
    pub fn denied(count: u64, retry_after: Duration) -> Self {
        Self {
            count,
            retry_after,
            allowed: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_display() {
        assert_eq!(Classification::Normal.to_string(), "normal");
        assert_eq!(Classification::TooHigh.to_string(), "too_high");
        assert!(Classification::Normal.is_admitted());
        assert!(!Classification::TooHigh.is_admitted());
    }

    #[test]
    fn test_admission() {
        let normal = Admission::normal();
        assert!(normal.is_admitted());
        assert_eq!(normal.retry_after, Duration::ZERO);

        let throttled = Admission::too_high(Duration::from_secs(12));
        assert!(!throttled.is_admitted());
        assert_eq!(throttled.classification, Classification::TooHigh);
        assert_eq!(throttled.retry_after, Duration::from_secs(12));
    }

    #[test]
    fn test_fail_mode_deserialize() {
        let mode: FailMode = serde_yaml::from_str("closed").unwrap();
        assert_eq!(mode, FailMode::Closed);
        let mode: FailMode = serde_yaml::from_str("error").unwrap();
        assert_eq!(mode, FailMode::Error);
        assert_eq!(FailMode::default(), FailMode::Open);
    }

    #[test]
    fn test_counter_decision() {
        let allowed = CounterDecision::allowed(3);
        assert!(allowed.allowed);
        assert_eq!(allowed.retry_after, Duration::ZERO);

        let denied = CounterDecision::denied(4, Duration::from_secs(30));
        assert!(!denied.allowed);
        assert_eq!(denied.count, 4);
        assert_eq!(denied.retry_after, Duration::from_secs(30));
    }
}
