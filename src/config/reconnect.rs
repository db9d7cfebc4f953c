//! Reconnection policy
//!
//! Decides, for the Nth consecutive failed attempt to restore a lost link,
//! whether to try again and how long to wait first.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Delay added per attempt by the default policy
pub const BACKOFF_STEP: Duration = Duration::from_millis(100);
/// Upper bound on the default policy's delay
pub const BACKOFF_MAX: Duration = Duration::from_millis(3_000);

/// Caller-supplied policy: attempt number (1-based) to delay, or `None` to give up
pub type ReconnectFn = Arc<dyn Fn(u32) -> Option<Duration> + Send + Sync>;

#[derive(Clone, Default)]
pub enum ReconnectStrategy {
    /// Never reconnect; a lost link is closed immediately.
    Disabled,
    /// Same delay before every attempt, up to `max_retries` attempts.
    FixedDelay(Duration),
    /// `min(attempt * 100ms, 3s)`, up to `max_retries` attempts.
    #[default]
    LinearBackoff,
    /// Fully caller-defined; `max_retries` is not consulted.
    Custom(ReconnectFn),
}

impl ReconnectStrategy {
    pub fn custom(f: impl Fn(u32) -> Option<Duration> + Send + Sync + 'static) -> Self {
        ReconnectStrategy::Custom(Arc::new(f))
    }

    /// Delay before reconnect `attempt`, or `None` when reconnection is abandoned.
    pub fn next_delay(&self, attempt: u32, max_retries: u32) -> Option<Duration> {
        debug_assert!(attempt >= 1, "reconnect attempts are 1-based");
        match self {
            ReconnectStrategy::Disabled => None,
            ReconnectStrategy::FixedDelay(delay) => (attempt <= max_retries).then_some(*delay),
            ReconnectStrategy::LinearBackoff => {
                (attempt <= max_retries).then(|| (BACKOFF_STEP * attempt).min(BACKOFF_MAX))
            }
            ReconnectStrategy::Custom(f) => f(attempt),
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, ReconnectStrategy::Disabled)
    }
}

impl fmt::Debug for ReconnectStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconnectStrategy::Disabled => f.write_str("Disabled"),
            ReconnectStrategy::FixedDelay(d) => f.debug_tuple("FixedDelay").field(d).finish(),
            ReconnectStrategy::LinearBackoff => f.write_str("LinearBackoff"),
            ReconnectStrategy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_backoff_grows_and_caps() {
        let s = ReconnectStrategy::LinearBackoff;
        assert_eq!(s.next_delay(1, 10), Some(Duration::from_millis(100)));
        assert_eq!(s.next_delay(5, 10), Some(Duration::from_millis(500)));
        assert_eq!(s.next_delay(10, 10), Some(Duration::from_millis(1000)));
        assert_eq!(s.next_delay(40, 50), Some(BACKOFF_MAX));
    }

    #[test]
    fn test_linear_backoff_abandons_after_cap() {
        let s = ReconnectStrategy::LinearBackoff;
        assert!(s.next_delay(10, 10).is_some());
        assert_eq!(s.next_delay(11, 10), None);
    }

    #[test]
    fn test_fixed_delay() {
        let s = ReconnectStrategy::FixedDelay(Duration::from_millis(250));
        assert_eq!(s.next_delay(1, 3), Some(Duration::from_millis(250)));
        assert_eq!(s.next_delay(3, 3), Some(Duration::from_millis(250)));
        assert_eq!(s.next_delay(4, 3), None);
    }

    #[test]
    fn test_disabled_never_retries() {
        assert_eq!(ReconnectStrategy::Disabled.next_delay(1, 10), None);
        assert!(ReconnectStrategy::Disabled.is_disabled());
    }

    #[test]
    fn test_custom_ignores_max_retries() {
        let s = ReconnectStrategy::custom(|attempt| {
            (attempt < 100).then(|| Duration::from_millis(attempt as u64))
        });
        assert_eq!(s.next_delay(50, 1), Some(Duration::from_millis(50)));
        assert_eq!(s.next_delay(100, 1), None);
    }
}
