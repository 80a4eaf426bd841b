//! Reconnection Backoff
//!
//! Exponential backoff with jitter for the live socket. The delay for
//! attempt `n` is `initial * multiplier^(n-1)`, capped at `max_delay`, then
//! spread by up to `jitter_factor` in either direction.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::ReconnectSettings;

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any delay before jitter.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::from(&ReconnectSettings::default())
    }
}

impl From<&ReconnectSettings> for ReconnectConfig {
    fn from(settings: &ReconnectSettings) -> Self {
        Self {
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            multiplier: settings.multiplier,
            jitter_factor: settings.jitter_factor,
            max_attempts: settings.max_attempts,
        }
    }
}

impl ReconnectConfig {
    /// Un-jittered delay before attempt `attempt` (1-based).
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let seconds = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(seconds).map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    fn jitter(&self, delay: Duration) -> Duration {
        if self.jitter_factor <= 0.0 {
            return delay;
        }
        let spread = rand::rng().random_range(-self.jitter_factor..=self.jitter_factor);
        Duration::try_from_secs_f64(delay.as_secs_f64() * (1.0 + spread))
            .unwrap_or(delay)
            .max(Duration::from_millis(1))
    }
}

/// Attempt counter over a [`ReconnectConfig`].
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempts: u32,
}

impl ReconnectPolicy {
    /// Fresh policy with no attempts spent.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Spend one attempt and return how long to wait before it.
    ///
    /// # Errors
    ///
    /// [`ReconnectError::MaxAttemptsExceeded`] once `max_attempts` is reached.
    pub fn next_delay(&mut self) -> Result<Duration, ReconnectError> {
        let max = self.config.max_attempts;
        if max > 0 && self.attempts >= max {
            return Err(ReconnectError::MaxAttemptsExceeded(max));
        }
        self.attempts += 1;
        Ok(self.config.jitter(self.config.base_delay(self.attempts)))
    }

    /// Forget spent attempts after a successful connection.
    pub const fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Attempts spent since the last reset.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Reconnection failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconnectError {
    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    MaxAttemptsExceeded(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_attempts: u32, jitter_factor: f64) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
            multiplier: 2.0,
            jitter_factor,
            max_attempts,
        }
    }

    #[test]
    fn base_delay_grows_and_caps() {
        let config = config(0, 0.0);
        assert_eq!(config.base_delay(1), Duration::from_millis(100));
        assert_eq!(config.base_delay(2), Duration::from_millis(200));
        assert_eq!(config.base_delay(4), Duration::from_millis(800));
        assert_eq!(config.base_delay(5), Duration::from_millis(1_000));
        assert_eq!(config.base_delay(u32::MAX), Duration::from_millis(1_000));
    }

    #[test]
    fn policy_without_jitter_is_deterministic() {
        let mut policy = ReconnectPolicy::new(config(0, 0.0));
        assert_eq!(policy.next_delay(), Ok(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(), Ok(Duration::from_millis(200)));
        assert_eq!(policy.attempts(), 2);

        policy.reset();
        assert_eq!(policy.next_delay(), Ok(Duration::from_millis(100)));
    }

    #[test]
    fn jitter_stays_in_band() {
        let mut policy = ReconnectPolicy::new(config(0, 0.1));
        for _ in 0..50 {
            policy.reset();
            let delay = policy.next_delay().unwrap();
            assert!(delay >= Duration::from_millis(89), "{delay:?}");
            assert!(delay <= Duration::from_millis(111), "{delay:?}");
        }
    }

    #[test]
    fn attempts_are_bounded() {
        let mut policy = ReconnectPolicy::new(config(2, 0.0));
        assert!(policy.next_delay().is_ok());
        assert!(policy.next_delay().is_ok());
        assert_eq!(
            policy.next_delay(),
            Err(ReconnectError::MaxAttemptsExceeded(2))
        );
    }

    #[test]
    fn default_follows_settings() {
        let config = ReconnectConfig::default();
        let settings = ReconnectSettings::default();
        assert_eq!(config.initial_delay, Duration::from_millis(settings.initial_delay_ms));
        assert_eq!(config.max_attempts, settings.max_attempts);
    }
}
