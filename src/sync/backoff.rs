use std::time::Duration;

use tokio::time::Instant;

const MAX_DOUBLINGS: u32 = 16;

/// Capped exponential delay for the periodic refresh after failed fetches.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: u32,
    retry_at: Option<Instant>,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: 0,
            retry_at: None,
        }
    }

    /// Delay applied after `failures` consecutive failures.
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let doublings = (failures - 1).min(MAX_DOUBLINGS);
        self.base.saturating_mul(1u32 << doublings).min(self.max)
    }

    pub fn record_failure(&mut self, now: Instant) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let delay = self.delay_for(self.failures);
        self.retry_at = Some(now + delay);
        delay
    }

    pub fn reset(&mut self) {
        self.failures = 0;
        self.retry_at = None;
    }

    pub fn allows(&self, now: Instant) -> bool {
        self.retry_at.map_or(true, |at| now >= at)
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_capped() {
        let b = Backoff::new(Duration::from_secs(10), Duration::from_secs(60));
        assert_eq!(b.delay_for(0), Duration::ZERO);
        assert_eq!(b.delay_for(1), Duration::from_secs(10));
        assert_eq!(b.delay_for(2), Duration::from_secs(20));
        assert_eq!(b.delay_for(3), Duration::from_secs(40));
        assert_eq!(b.delay_for(4), Duration::from_secs(60));
        assert_eq!(b.delay_for(500), Duration::from_secs(60));
    }

    #[test]
    fn gates_until_retry_time_then_resets() {
        let mut b = Backoff::new(Duration::from_secs(10), Duration::from_secs(60));
        let t0 = Instant::now();
        assert!(b.allows(t0));

        assert_eq!(b.record_failure(t0), Duration::from_secs(10));
        assert!(!b.allows(t0 + Duration::from_secs(9)));
        assert!(b.allows(t0 + Duration::from_secs(10)));

        b.record_failure(t0);
        assert_eq!(b.failures(), 2);
        assert!(!b.allows(t0 + Duration::from_secs(19)));

        b.reset();
        assert_eq!(b.failures(), 0);
        assert!(b.allows(t0));
    }
}
