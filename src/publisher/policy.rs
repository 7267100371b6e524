//! Reconnect delay policy for the command channel supervisor.

use std::time::Duration;

/// Delay between reconnect attempts.
///
/// The delay for attempt `n` is `first × factor^n`, clamped to `max`.
/// With `factor = 1.0` the delay is fixed, which is what the command
/// channel uses.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub first: Duration,
    /// Upper bound on any delay.
    pub max: Duration,
    /// Multiplicative growth per attempt.
    pub factor: f64,
}

impl ReconnectPolicy {
    /// A constant delay between attempts.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            first: delay,
            max: delay,
            factor: 1.0,
        }
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn next(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(5))
    }
}
