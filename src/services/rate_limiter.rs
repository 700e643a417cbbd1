//! Token-bucket gate in front of the metadata provider.
//!
//! `acquire()` refills `rate / period` tokens per elapsed second (capped at
//! `rate`) and suspends the caller when less than one token is available.
//! A log of recent grant instants additionally enforces the hard bound: no
//! more than `rate` grants inside any rolling `period`.
//!
//! All accounting happens under one async mutex that is held across the
//! suspension, so waiters are served in FIFO order and two callers can never
//! be handed the same token.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Float slack so a wait computed from the refill rate is not retried for rounding noise
const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Maximum tokens per period (also the burst size)
    pub rate: u32,
    pub period: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            rate: 40,
            period: Duration::from_secs(10),
        }
    }
}

struct Bucket {
    allowance: f64,
    last_refill: Instant,
    grants: VecDeque<Instant>,
}

pub struct RateLimiter {
    rate: f64,
    capacity: usize,
    period: Duration,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let rate = config.rate.max(1);
        Self {
            rate: rate as f64,
            capacity: rate as usize,
            period: config.period,
            bucket: Mutex::new(Bucket {
                allowance: rate as f64,
                last_refill: Instant::now(),
                grants: VecDeque::with_capacity(rate as usize),
            }),
        }
    }

    /// Suspends until a token is available, then consumes it
    pub async fn acquire(&self) {
        let mut bucket = self.bucket.lock().await;
        let period_secs = self.period.as_secs_f64();

        loop {
            let now = Instant::now();

            let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
            bucket.allowance = (bucket.allowance + elapsed * self.rate / period_secs).min(self.rate);
            bucket.last_refill = now;

            while let Some(&oldest) = bucket.grants.front() {
                if oldest + self.period <= now {
                    bucket.grants.pop_front();
                } else {
                    break;
                }
            }

            let refill_wait = if bucket.allowance + EPSILON < 1.0 {
                Duration::from_secs_f64((1.0 - bucket.allowance) * period_secs / self.rate)
            } else {
                Duration::ZERO
            };

            let window_wait = match bucket.grants.front() {
                Some(&oldest) if bucket.grants.len() >= self.capacity => {
                    (oldest + self.period).saturating_duration_since(now)
                }
                _ => Duration::ZERO,
            };

            let wait = refill_wait.max(window_wait);
            if wait.is_zero() {
                bucket.allowance = (bucket.allowance - 1.0).max(0.0);
                bucket.grants.push_back(now);
                return;
            }

            tracing::trace!(wait_ms = wait.as_millis() as u64, "Rate limiter suspending caller");
            tokio::time::sleep(wait).await;
        }
    }

    /// Tokens currently available without waiting (refill applied, nothing consumed)
    pub async fn available(&self) -> f64 {
        let bucket = self.bucket.lock().await;
        let elapsed = Instant::now()
            .duration_since(bucket.last_refill)
            .as_secs_f64();
        (bucket.allowance + elapsed * self.rate / self.period.as_secs_f64()).min(self.rate)
    }
}
