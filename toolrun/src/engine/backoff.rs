//! Poll pacing and rate-limit backoff.

use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;

/// Matches "try again in 54.355s" or "try again in 20s", and the bare
/// "in 2m54.355s" form only when minutes and millis are both present.
static RATE_LIMIT_WAIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\btry again in (?:(\d+)m)?(\d+)(?:\.\d+)?s\b|\bin (\d+)m(\d+)\.\d+s\b")
        .expect("rate limit pattern is valid")
});

/// Extracts the backoff demanded by a rate-limit failure detail.
///
/// The delay is the advertised wait rounded up to the next whole second:
/// `(minutes * 60 + seconds + 1) * 1000` milliseconds; the fractional part is
/// dropped. Returns `None` when the detail carries no wait hint, i.e. the
/// failure is not a rate limit.
#[must_use]
pub fn rate_limit_backoff(detail: &str) -> Option<Duration> {
    let caps = RATE_LIMIT_WAIT.captures(detail)?;
    let (minutes, seconds) = match caps.get(2) {
        Some(seconds) => (caps.get(1), seconds),
        None => (caps.get(3), caps.get(4)?),
    };
    let minutes: u64 = minutes.map_or(Some(0), |m| m.as_str().parse().ok())?;
    let seconds: u64 = seconds.as_str().parse().ok()?;

    let total = minutes.checked_mul(60)?.checked_add(seconds)?.checked_add(1)?;
    Some(Duration::from_millis(total.checked_mul(1000)?))
}

/// Jitter applied to exponential poll delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    Equal,
}

/// How long the engine sleeps between status polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PollStrategy {
    /// The same interval every time.
    Fixed {
        /// Interval in milliseconds.
        interval_ms: u64,
    },
    /// delay = base * 2^attempt, capped, with optional jitter.
    Exponential {
        /// First delay in milliseconds.
        base_ms: u64,
        /// Cap in milliseconds.
        max_ms: u64,
        /// Jitter strategy.
        #[serde(default)]
        jitter: JitterStrategy,
    },
}

impl Default for PollStrategy {
    fn default() -> Self {
        Self::Fixed { interval_ms: 1000 }
    }
}

impl PollStrategy {
    /// A fixed interval.
    #[must_use]
    pub fn fixed(interval: Duration) -> Self {
        Self::Fixed {
            interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Exponential growth from `base` up to `max`, without jitter.
    #[must_use]
    pub fn exponential(base: Duration, max: Duration) -> Self {
        Self::Exponential {
            base_ms: u64::try_from(base.as_millis()).unwrap_or(u64::MAX),
            max_ms: u64::try_from(max.as_millis()).unwrap_or(u64::MAX),
            jitter: JitterStrategy::None,
        }
    }

    /// Sets the jitter of an exponential strategy; fixed strategies are unchanged.
    #[must_use]
    pub fn with_jitter(self, strategy: JitterStrategy) -> Self {
        match self {
            Self::Exponential { base_ms, max_ms, .. } => Self::Exponential {
                base_ms,
                max_ms,
                jitter: strategy,
            },
            fixed @ Self::Fixed { .. } => fixed,
        }
    }

    /// Delay before poll number `attempt` (0-indexed) of one waiting stretch.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed { interval_ms } => Duration::from_millis(interval_ms),
            Self::Exponential {
                base_ms,
                max_ms,
                jitter,
            } => {
                let delay = base_ms
                    .saturating_mul(2u64.saturating_pow(attempt))
                    .min(max_ms);
                let jittered = match jitter {
                    JitterStrategy::None => delay,
                    JitterStrategy::Full => {
                        if delay == 0 {
                            0
                        } else {
                            rand::thread_rng().gen_range(0..=delay)
                        }
                    }
                    JitterStrategy::Equal => {
                        let half = delay / 2;
                        if half == 0 {
                            delay
                        } else {
                            half + rand::thread_rng().gen_range(0..=half)
                        }
                    }
                };
                Duration::from_millis(jittered)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minutes_and_seconds() {
        let detail = "Rate limit reached for gpt-4 on tokens per min. Please try again in 2m54.355s.";
        assert_eq!(rate_limit_backoff(detail), Some(Duration::from_millis(175_000)));
    }

    #[test]
    fn test_seconds_only() {
        assert_eq!(
            rate_limit_backoff("Please try again in 9.3s."),
            Some(Duration::from_millis(10_000))
        );
        assert_eq!(
            rate_limit_backoff("try again in 20s"),
            Some(Duration::from_millis(21_000))
        );
    }

    #[test]
    fn test_not_a_rate_limit() {
        assert_eq!(rate_limit_backoff("The server had an error."), None);
        assert_eq!(rate_limit_backoff(""), None);
    }

    #[test]
    fn test_other_durations_are_not_rate_limits() {
        for detail in [
            "Tool execution timed out within 30s",
            "Run exceeded max duration in 600s",
            "Model failed to respond in 45s",
            "server_error: tool execution timed out in 30s",
            "retry budget spent in 1m5s",
        ] {
            assert_eq!(rate_limit_backoff(detail), None, "{detail}");
        }
    }

    #[test]
    fn test_bare_wait_needs_full_form() {
        assert_eq!(
            rate_limit_backoff("limit hit, resets in 1m2.5s"),
            Some(Duration::from_millis(63_000))
        );
        assert_eq!(
            rate_limit_backoff("Please TRY AGAIN IN 4s"),
            Some(Duration::from_millis(5_000))
        );
    }

    #[test]
    fn test_fixed_delay() {
        let strategy = PollStrategy::default();
        assert_eq!(strategy.delay(0), Duration::from_secs(1));
        assert_eq!(strategy.delay(7), Duration::from_secs(1));
        assert_eq!(strategy.with_jitter(JitterStrategy::Full), strategy);
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let strategy =
            PollStrategy::exponential(Duration::from_millis(100), Duration::from_millis(1000));
        assert_eq!(strategy.delay(0), Duration::from_millis(100));
        assert_eq!(strategy.delay(2), Duration::from_millis(400));
        assert_eq!(strategy.delay(10), Duration::from_millis(1000));
        assert_eq!(strategy.delay(u32::MAX), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_bounds() {
        let full = PollStrategy::exponential(Duration::from_millis(100), Duration::from_secs(1))
            .with_jitter(JitterStrategy::Full);
        let equal = full.with_jitter(JitterStrategy::Equal);
        for _ in 0..50 {
            assert!(full.delay(1) <= Duration::from_millis(200));
            let d = equal.delay(1);
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(200));
        }
    }

    #[test]
    fn test_strategy_serde() {
        let strategy: PollStrategy =
            serde_json::from_str(r#"{"kind": "exponential", "base_ms": 250, "max_ms": 4000}"#)
                .unwrap();
        assert_eq!(
            strategy,
            PollStrategy::exponential(Duration::from_millis(250), Duration::from_secs(4))
        );
    }
}
