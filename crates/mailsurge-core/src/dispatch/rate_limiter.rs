//! Send rate limiter - token bucket shared by all dispatch tasks
//!
//! The sending provider enforces a messages-per-second cap across the
//! whole account, so every concurrent batch task draws from one bucket.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};

/// Maximum single sleep while waiting for a token. Short slices keep
/// sends responsive to pause and cancel checks between recipients.
const MAX_WAIT_SLICE: Duration = Duration::from_millis(250);

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket limiter capping the account-wide send rate
#[derive(Clone)]
pub struct SendRateLimiter {
    rate_per_sec: f64,
    capacity: f64,
    bucket: Arc<Mutex<Bucket>>,
}

impl SendRateLimiter {
    /// Create a limiter allowing `rate_per_sec` sends per second, with
    /// a burst capacity of one second's worth of tokens
    pub fn new(rate_per_sec: u32) -> Self {
        let rate = rate_per_sec.max(1) as f64;
        Self {
            rate_per_sec: rate,
            capacity: rate,
            bucket: Arc::new(Mutex::new(Bucket {
                tokens: rate,
                last_refill: Instant::now(),
            })),
        }
    }

    /// Wait until a send token is available, then consume it
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                self.refill(&mut bucket);

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }

                let deficit = 1.0 - bucket.tokens;
                Duration::from_secs_f64(deficit / self.rate_per_sec)
            };

            sleep(wait.min(MAX_WAIT_SLICE)).await;
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate_per_sec).min(self.capacity);
        bucket.last_refill = now;
    }
}
