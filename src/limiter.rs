//! Token-bucket rate limiting for send attempts.
//!
//! The coordinator consults the limiter before every lease. A token is only
//! consumed when it is immediately available; otherwise the limiter reports
//! how long until the next token so the wait can feed the coordinator's
//! wakeup computation.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::{DispatchError, DispatchResult};

/// Token-bucket gate on how often sends may be attempted
///
/// The bucket holds at most `burst` tokens and refills at `qps` tokens per
/// second. It starts full. The default limiter is unlimited.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    qps: f64,
    burst: f64,
    tokens: f64,
    last_refill: Option<Instant>,
}

impl RateLimiter {
    /// Create a limiter allowing `qps` sends per second with the given burst
    pub fn new(qps: f64, burst: usize) -> DispatchResult<Self> {
        if !qps.is_finite() || qps <= 0.0 {
            return Err(DispatchError::config("rate limiter qps must be > 0"));
        }
        if burst == 0 {
            return Err(DispatchError::config("rate limiter burst must be > 0"));
        }
        Ok(Self {
            qps,
            burst: burst as f64,
            tokens: burst as f64,
            last_refill: None,
        })
    }

    /// Create a limiter that never delays a send
    pub fn unlimited() -> Self {
        Self {
            qps: f64::INFINITY,
            burst: f64::INFINITY,
            tokens: f64::INFINITY,
            last_refill: None,
        }
    }

    /// Check if this limiter is the unlimited sentinel
    pub fn is_unlimited(&self) -> bool {
        self.qps.is_infinite()
    }

    /// Take one token if immediately available, otherwise report the wait
    ///
    /// `Ok(())` commits a token. `Err(wait)` consumes nothing; `wait` is the
    /// time until the next token accrues at `now`.
    pub fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        if self.is_unlimited() {
            return Ok(());
        }
        self.refill(now);
        let deficit = 1.0 - self.tokens;
        let wait = Duration::from_secs_f64((deficit / self.qps).max(0.0));
        if wait.is_zero() {
            // Covers both a full token and a sub-nanosecond rounding
            // shortfall; a zero wait must always mean "granted".
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(wait)
        }
    }

    fn refill(&mut self, now: Instant) {
        let last = match self.last_refill {
            Some(last) => last,
            None => {
                // First consultation starts the clock with a full bucket.
                self.last_refill = Some(now);
                return;
            }
        };
        let elapsed = now.saturating_duration_since(last).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.qps).min(self.burst);
        self.last_refill = Some(now);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_always_grants() {
        let mut limiter = RateLimiter::unlimited();
        let now = Instant::now();
        for _ in 0..10_000 {
            assert!(limiter.try_acquire(now).is_ok());
        }
    }

    #[test]
    fn test_validation() {
        assert!(RateLimiter::new(0.0, 1).is_err());
        assert!(RateLimiter::new(-1.0, 1).is_err());
        assert!(RateLimiter::new(f64::NAN, 1).is_err());
        assert!(RateLimiter::new(10.0, 0).is_err());
        assert!(RateLimiter::new(10.0, 1).is_ok());
    }

    #[test]
    fn test_burst_then_deny() {
        let mut limiter = RateLimiter::new(1.0, 3).unwrap();
        let now = Instant::now();

        // Full bucket grants the burst
        assert!(limiter.try_acquire(now).is_ok());
        assert!(limiter.try_acquire(now).is_ok());
        assert!(limiter.try_acquire(now).is_ok());

        // Fourth acquisition at the same instant must wait a full period
        let wait = limiter.try_acquire(now).unwrap_err();
        assert!(wait > Duration::from_millis(900));
        assert!(wait <= Duration::from_secs(1));
    }

    #[test]
    fn test_denied_acquire_consumes_nothing() {
        let mut limiter = RateLimiter::new(1.0, 1).unwrap();
        let now = Instant::now();

        assert!(limiter.try_acquire(now).is_ok());
        let first_wait = limiter.try_acquire(now).unwrap_err();
        let second_wait = limiter.try_acquire(now).unwrap_err();
        // Repeated denied consultations do not push the wait out further
        assert_eq!(first_wait, second_wait);
    }

    #[test]
    fn test_refill_over_time() {
        let mut limiter = RateLimiter::new(10.0, 1).unwrap();
        let start = Instant::now();

        assert!(limiter.try_acquire(start).is_ok());
        assert!(limiter.try_acquire(start).is_err());

        // One token accrues every 100ms at 10 qps
        let later = start + Duration::from_millis(150);
        assert!(limiter.try_acquire(later).is_ok());
        assert!(limiter.try_acquire(later).is_err());
    }

    #[test]
    fn test_tokens_cap_at_burst() {
        let mut limiter = RateLimiter::new(100.0, 2).unwrap();
        let start = Instant::now();
        limiter.try_acquire(start).ok();

        // A long idle period refills to burst, not beyond
        let later = start + Duration::from_secs(60);
        assert!(limiter.try_acquire(later).is_ok());
        assert!(limiter.try_acquire(later).is_ok());
        assert!(limiter.try_acquire(later).is_err());
    }
}
