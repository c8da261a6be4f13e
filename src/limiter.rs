//! Global token-bucket rate limiter
//!
//! One bucket is shared by every worker and bounds the aggregate outbound
//! request rate. Tokens accrue with wall-clock time up to a burst capacity,
//! so an idle period buys a short burst, after which requests settle at the
//! configured requests-per-minute rate.

use std::time::Duration;
use tokio::{sync::Mutex, time::Instant};

/// Shared token bucket gating every outbound request
///
/// All bucket state lives under a single mutex. Callers block (await) in
/// [`acquire`](Self::acquire) until a token is available; tokens accrue
/// monotonically with time regardless of who is waiting, so no caller can be
/// starved beyond the configured rate.
#[derive(Debug)]
pub struct TokenBucket {
    /// Token accrual rate, in tokens per second
    rate: f64,

    /// Maximum number of stockpiled tokens
    capacity: f64,

    /// Minimum enforced sleep after taking a token, to smooth bursts
    min_sleep: Duration,

    /// Mutable bucket state
    state: Mutex<BucketState>,
}

/// Mutable part of the bucket, guarded by the mutex
#[derive(Debug)]
struct BucketState {
    /// Currently stockpiled tokens
    tokens: f64,

    /// Time of the last refill computation
    last_refill: Instant,
}
//
impl TokenBucket {
    /// Set up a bucket for a given requests-per-minute rate and burst capacity
    ///
    /// The bucket starts full, so a fresh run may burst immediately.
    pub fn new(rpm: u32, capacity: u32, min_sleep: Duration) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            rate: f64::from(rpm).max(0.006) / 60.0,
            capacity,
            min_sleep,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Block until a token is available, then consume it
    pub async fn acquire(&self) {
        loop {
            let (took, sleep_for) = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill);
                state.last_refill = now;
                state.tokens =
                    (state.tokens + elapsed.as_secs_f64() * self.rate).min(self.capacity);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    (true, self.min_sleep)
                } else {
                    let need = 1.0 - state.tokens;
                    let wait = Duration::from_secs_f64(need / self.rate) + self.min_sleep;
                    (false, wait)
                }
                // Mutex released before sleeping
            };
            if !sleep_for.is_zero() {
                tokio::time::sleep(sleep_for).await;
            }
            if took {
                return;
            }
        }
    }
}
