//! Rate limiting of inbound view messages using a token bucket

use parking_lot::Mutex;
use std::time::Instant;

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Sustained messages per second; 0 disables limiting
    pub messages_per_second: u32,
    /// Burst capacity (max tokens)
    pub burst_size: u32,
}

impl RateLimitConfig {
    pub fn new(messages_per_second: u32, burst_size: u32) -> Self {
        Self {
            messages_per_second,
            burst_size,
        }
    }

    /// Create from a rate with default burst = 2x rate
    pub fn from_rate(messages_per_second: u32) -> Self {
        Self::new(messages_per_second, messages_per_second.saturating_mul(2))
    }

    /// No limiting at all
    pub fn unlimited() -> Self {
        Self::new(0, 0)
    }

    pub fn is_unlimited(&self) -> bool {
        self.messages_per_second == 0
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        // Pointer moves arrive as whole strokes, so a view sends few messages
        Self::from_rate(200)
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket rate limiter
///
/// Allows bursting up to `burst_size` messages, then limits to
/// `messages_per_second`. Tokens refill continuously.
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            bucket: Mutex::new(Bucket {
                tokens: config.burst_size as f64,
                last_refill: Instant::now(),
            }),
            config,
        }
    }

    /// Try to take a token. Returns false if the message must be rejected.
    pub fn try_acquire(&self) -> bool {
        if self.config.is_unlimited() {
            return true;
        }

        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Check if the next message would be limited, without consuming a token
    pub fn would_limit(&self) -> bool {
        if self.config.is_unlimited() {
            return false;
        }

        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        bucket.tokens < 1.0
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.last_refill = now;

        let refilled = bucket.tokens + elapsed * self.config.messages_per_second as f64;
        bucket.tokens = refilled.min(self.config.burst_size as f64);
    }

    /// Whole tokens currently available
    pub fn available_tokens(&self) -> u32 {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket);
        bucket.tokens as u32
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Refill to full capacity
    pub fn reset(&self) {
        let mut bucket = self.bucket.lock();
        bucket.tokens = self.config.burst_size as f64;
        bucket.last_refill = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_burst_then_limit() {
        let limiter = RateLimiter::new(RateLimitConfig::new(10, 5));

        for _ in 0..5 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn test_token_refill() {
        let limiter = RateLimiter::new(RateLimitConfig::new(1000, 10));

        for _ in 0..10 {
            limiter.try_acquire();
        }
        assert!(!limiter.try_acquire());

        // 1000/s refills one token per millisecond
        thread::sleep(Duration::from_millis(20));
        assert!(limiter.try_acquire());
        assert!(limiter.available_tokens() <= 10);
    }

    #[test]
    fn test_would_limit() {
        let limiter = RateLimiter::new(RateLimitConfig::new(1, 2));

        assert!(!limiter.would_limit());
        limiter.try_acquire();
        limiter.try_acquire();
        assert!(limiter.would_limit());
    }

    #[test]
    fn test_unlimited() {
        let limiter = RateLimiter::new(RateLimitConfig::unlimited());
        for _ in 0..10_000 {
            assert!(limiter.try_acquire());
        }
    }

    #[test]
    fn test_reset() {
        let limiter = RateLimiter::new(RateLimitConfig::new(1, 5));
        for _ in 0..5 {
            limiter.try_acquire();
        }
        assert_eq!(limiter.available_tokens(), 0);

        limiter.reset();
        assert_eq!(limiter.available_tokens(), 5);
    }
}
