use futures_timer::Delay;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{ErrorKind, Result};

/// Cooperative cancellation shared across a whole operation
///
/// Every bounded wait checks the token between polls; a fired token makes
/// in-flight waits return `Cancelled` unchanged, and nothing rolls back.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Error out of the current wait if the token has fired
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(ErrorKind::Cancelled.into());
        }
        Ok(())
    }
}

/// Exponential backoff with full jitter and an attempt ceiling
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Backoff {
            base,
            cap,
            max_attempts,
            attempt: 0,
        }
    }

    /// Short retries for kube reads of current state
    pub fn reads() -> Self {
        Backoff::new(Duration::from_millis(200), Duration::from_secs(3), 5)
    }

    /// The machine readiness poll cadence (1s floor, 1min ceiling)
    pub fn machine_wait() -> Self {
        Backoff::new(Duration::from_secs(1), Duration::from_secs(60), u32::max_value())
    }

    pub fn with_bounds(mut self, base: Duration, cap: Duration) -> Self {
        self.base = base;
        self.cap = cap;
        self
    }

    /// Whether another attempt is allowed after the ones taken so far
    pub fn retryable(&self) -> bool {
        self.attempt + 1 < self.max_attempts
    }

    /// The next delay: exp growth capped, then jittered down
    fn next_delay(&mut self) -> Duration {
        let exp = self.base.as_millis().saturating_mul(1u128 << self.attempt.min(20)) as u64;
        let capped = exp.min(self.cap.as_millis() as u64).max(1);
        self.attempt += 1;
        let jittered = rand::thread_rng().gen_range(capped / 2, capped + 1);
        Duration::from_millis(jittered)
    }

    pub async fn sleep(&mut self) {
        let d = self.next_delay();
        trace!("backing off {}ms (attempt {})", d.as_millis(), self.attempt);
        Delay::new(d).await;
    }
}

#[cfg(test)]
mod tests {
    use super::{Backoff, CancellationToken};
    use std::time::Duration;

    #[test]
    fn token_check() {
        let token = CancellationToken::new();
        assert!(token.check().is_ok());
        let other = token.clone();
        other.cancel();
        assert!(token.check().is_err());
        assert!(token.is_cancelled());
    }

    #[test]
    fn backoff_grows_and_caps() {
        let mut b = Backoff::new(Duration::from_millis(100), Duration::from_secs(1), 4);
        assert!(b.retryable());
        let mut last = Duration::from_millis(0);
        for _ in 0..8 {
            let d = b.next_delay();
            assert!(d <= Duration::from_secs(1));
            assert!(d >= Duration::from_millis(50)); // never below half the base
            last = d;
        }
        // capped region: jitter keeps us within [cap/2, cap]
        assert!(last >= Duration::from_millis(500));
        assert!(!b.retryable());
    }
}
