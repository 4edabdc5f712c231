//! Per-account sliding-window rate limiter with exponential backoff on
//! throttling responses.
//!
//! Ported near-verbatim from `bybit_adapter.rate_limiter.RateLimiter`. This
//! replaces the teacher's token-bucket limiter, which models a different
//! (constant-refill) algorithm than the exchange's actual sliding window.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    Order,
    Query,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub order_rate: usize,
    pub query_rate: usize,
    pub window: Duration,
    pub backoff_base: Duration,
    pub max_backoff: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            order_rate: 10,
            query_rate: 20,
            window: Duration::from_secs_f64(1.0),
            backoff_base: Duration::from_secs_f64(1.0),
            max_backoff: Duration::from_secs_f64(60.0),
        }
    }
}

struct Inner {
    order_timestamps: VecDeque<Instant>,
    query_timestamps: VecDeque<Instant>,
    consecutive_429s: u32,
    backoff_until: Option<Instant>,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    inner: Mutex<Inner>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                order_timestamps: VecDeque::new(),
                query_timestamps: VecDeque::new(),
                consecutive_429s: 0,
                backoff_until: None,
            }),
        }
    }

    fn cleanup_old_timestamps(deque: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(&front) = deque.front() {
            if now.duration_since(front) >= window {
                deque.pop_front();
            } else {
                break;
            }
        }
    }

    fn deque_for<'a>(inner: &'a mut Inner, kind: RequestType) -> &'a mut VecDeque<Instant> {
        match kind {
            RequestType::Order => &mut inner.order_timestamps,
            RequestType::Query => &mut inner.query_timestamps,
        }
    }

    fn limit_for(&self, kind: RequestType) -> usize {
        match kind {
            RequestType::Order => self.config.order_rate,
            RequestType::Query => self.config.query_rate,
        }
    }

    /// Whether a request of `kind` may be issued right now.
    pub fn can_request(&self, kind: RequestType) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        if let Some(until) = inner.backoff_until {
            if now < until {
                return false;
            }
        }

        let window = self.config.window;
        let limit = self.limit_for(kind);
        let deque = Self::deque_for(&mut inner, kind);
        Self::cleanup_old_timestamps(deque, now, window);
        deque.len() < limit
    }

    /// Record that a request of `kind` was issued at `Instant::now()`.
    pub fn record_request(&self, kind: RequestType) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let window = self.config.window;
        let deque = Self::deque_for(&mut inner, kind);
        Self::cleanup_old_timestamps(deque, now, window);
        deque.push_back(now);
    }

    /// Seconds until the next slot opens for `kind` (0 if available now).
    pub fn wait_time(&self, kind: RequestType) -> Duration {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        if let Some(until) = inner.backoff_until {
            if now < until {
                return until - now;
            }
        }

        let window = self.config.window;
        let limit = self.limit_for(kind);
        let deque = Self::deque_for(&mut inner, kind);
        Self::cleanup_old_timestamps(deque, now, window);
        if deque.len() < limit {
            return Duration::ZERO;
        }
        let oldest = *deque.front().unwrap();
        window.saturating_sub(now.duration_since(oldest))
    }

    /// Record a throttling response (HTTP 429 or equivalent): sets
    /// `backoff_until = now + base * 2^(consecutive-1)`, capped at `max_backoff`.
    pub fn record_rate_limit_hit(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.consecutive_429s += 1;
        let exponent = inner.consecutive_429s.saturating_sub(1);
        let raw = self.config.backoff_base.as_secs_f64() * 2f64.powi(exponent as i32);
        let capped = raw.min(self.config.max_backoff.as_secs_f64());
        inner.backoff_until = Some(now + Duration::from_secs_f64(capped));
    }

    /// Reset the consecutive-429 counter after a successful request.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_429s = 0;
    }

    pub fn backoff_remaining(&self) -> Duration {
        let now = Instant::now();
        let inner = self.inner.lock();
        match inner.backoff_until {
            Some(until) if until > now => until - now,
            _ => Duration::ZERO,
        }
    }

    pub fn available_capacity(&self, kind: RequestType) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let window = self.config.window;
        let limit = self.limit_for(kind);
        let deque = Self::deque_for(&mut inner, kind);
        Self::cleanup_old_timestamps(deque, now, window);
        limit.saturating_sub(deque.len())
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.order_timestamps.clear();
        inner.query_timestamps.clear();
        inner.consecutive_429s = 0;
        inner.backoff_until = None;
    }

    pub fn consecutive_429s(&self) -> u32 {
        self.inner.lock().consecutive_429s
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn third_order_in_window_is_throttled() {
        let limiter = RateLimiter::new(RateLimitConfig {
            order_rate: 2,
            query_rate: 20,
            window: Duration::from_secs_f64(1.0),
            backoff_base: Duration::from_secs_f64(1.0),
            max_backoff: Duration::from_secs_f64(60.0),
        });

        assert!(limiter.can_request(RequestType::Order));
        limiter.record_request(RequestType::Order);
        assert!(limiter.can_request(RequestType::Order));
        limiter.record_request(RequestType::Order);
        assert!(!limiter.can_request(RequestType::Order));
        assert!(limiter.wait_time(RequestType::Order) > Duration::ZERO);
    }

    #[test]
    fn rate_limit_hit_sets_exponential_backoff() {
        let limiter = RateLimiter::default();
        limiter.record_rate_limit_hit();
        assert!(limiter.backoff_remaining() > Duration::ZERO);
        assert!(!limiter.can_request(RequestType::Order));
    }

    #[test]
    fn success_resets_consecutive_counter() {
        let limiter = RateLimiter::default();
        limiter.record_rate_limit_hit();
        limiter.record_rate_limit_hit();
        assert_eq!(limiter.consecutive_429s(), 2);
        limiter.record_success();
        assert_eq!(limiter.consecutive_429s(), 0);
    }
}
