use std::time::Duration;

use rand::Rng;

/// Automatic reconnection after an unexpected transport loss.
///
/// Delays grow as `initial_delay * factor^attempt`, capped at `max_delay`,
/// blended with a random share of `jitter` (0.0 = none, 1.0 = full).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: 8,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
            jitter: 0.2,
        }
    }
}

impl ReconnectPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if self.initial_delay.is_zero() {
            return Err("Initial reconnect delay must be > 0".to_string());
        }
        if self.max_delay < self.initial_delay {
            return Err("Max reconnect delay must be >= initial reconnect delay".to_string());
        }
        if self.factor < 1.0 || !self.factor.is_finite() {
            return Err("Backoff factor must be >= 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err("Jitter must be between 0.0 and 1.0".to_string());
        }
        Ok(())
    }

    /// Delay before the given (zero-based) attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter == 0.0 {
            return base;
        }

        let base = base.as_secs_f64();
        let randomized = rand::thread_rng().gen_range(0.0..=base);
        Duration::from_secs_f64(base * (1.0 - self.jitter) + randomized * self.jitter)
    }

    fn base_delay(&self, attempt: u32) -> Duration {
        let initial = self.initial_delay.as_secs_f64();
        let max = self.max_delay.as_secs_f64();
        let exponent = self.factor.powi(attempt.min(64) as i32);
        Duration::from_secs_f64((initial * exponent).min(max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: f64) -> ReconnectPolicy {
        ReconnectPolicy {
            enabled: true,
            jitter,
            ..ReconnectPolicy::default()
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let p = policy(0.0);
        assert_eq!(p.delay_for(0), Duration::from_millis(500));
        assert_eq!(p.delay_for(1), Duration::from_secs(1));
        assert_eq!(p.delay_for(2), Duration::from_secs(2));
        assert_eq!(p.delay_for(20), Duration::from_secs(30));
        assert_eq!(p.delay_for(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_stays_within_base() {
        let p = policy(0.5);
        for attempt in 0..6 {
            let base = p.base_delay(attempt);
            let delay = p.delay_for(attempt);
            assert!(delay <= base);
            assert!(delay >= base.mul_f64(0.5) - Duration::from_micros(1));
        }
    }

    #[test]
    fn test_validate() {
        assert!(policy(0.2).validate().is_ok());
        assert!(ReconnectPolicy {
            factor: 0.5,
            ..policy(0.0)
        }
        .validate()
        .is_err());
        assert!(ReconnectPolicy {
            max_delay: Duration::from_millis(1),
            ..policy(0.0)
        }
        .validate()
        .is_err());
    }
}
