//! Token-bucket rate limiter for the exchange adapter.
//!
//! A fixed-point-token, refill-by-elapsed-time design; `acquire()` is
//! an async suspension point rather than a synchronous `allow()` bool --
//! it is meant to be the only suspension point in the adapter besides
//! I/O, so callers await it instead of polling.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Fixed-point scale: tokens are tracked as `value * 1000` so fractional
/// refill rates don't need floats on the hot path.
const SCALE: u64 = 1_000;

struct State {
    tokens: u64,
    last_refill: Instant,
}

/// A token bucket shared by every call this adapter makes for one
/// `(process, venue)` pair.
pub struct RateLimiter {
    rps: f64,
    burst: u64,
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new(rps: f64, burst: u32) -> Self {
        Self {
            rps,
            burst: burst as u64,
            state: Mutex::new(State {
                tokens: (burst as u64) * SCALE,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, state: &mut State) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill);
        if elapsed.is_zero() {
            return;
        }
        let added = (self.rps * elapsed.as_secs_f64() * SCALE as f64) as u64;
        if added > 0 {
            state.tokens = (state.tokens + added).min(self.burst * SCALE);
            state.last_refill = now;
        }
    }

    /// Try to take one token without waiting. Used internally by
    /// `acquire`; exposed for callers that want a non-blocking check.
    fn try_take(&self) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens >= SCALE {
            state.tokens -= SCALE;
            true
        } else {
            false
        }
    }

    /// Estimated wait until the next token is available, given the
    /// current deficit. Used to avoid a tight poll loop.
    fn estimated_wait(&self) -> Duration {
        let state = self.state.lock();
        let deficit = SCALE.saturating_sub(state.tokens);
        if deficit == 0 || self.rps <= 0.0 {
            return Duration::from_millis(1);
        }
        Duration::from_secs_f64(deficit as f64 / SCALE as f64 / self.rps)
    }

    /// Suspend until a token is available, then consume it. This is the
    /// adapter's rate-limiting suspension point: it must precede every
    /// outbound call.
    pub async fn acquire(&self) {
        loop {
            if self.try_take() {
                return;
            }
            tokio::time::sleep(self.estimated_wait()).await;
        }
    }

    pub fn available_tokens(&self) -> u64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens / SCALE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_full_burst_capacity() {
        let limiter = RateLimiter::new(10.0, 5);
        assert_eq!(limiter.available_tokens(), 5);
    }

    #[tokio::test]
    async fn acquire_drains_burst_then_waits_for_refill() {
        let limiter = RateLimiter::new(1_000.0, 2);
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(limiter.available_tokens(), 0);

        // Third acquire must wait for a refill rather than panic or spin forever.
        limiter.acquire().await;
    }

    #[test]
    fn try_take_respects_burst_limit() {
        let limiter = RateLimiter::new(0.001, 1);
        assert!(limiter.try_take());
        assert!(!limiter.try_take());
    }
}
