use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Non-blocking admission verdict. When `allowed` is false the caller may
/// sleep `wait` (bounded) and retry once before surfacing a rate limit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Admission {
    pub allowed: bool,
    pub wait: Duration,
}

impl Admission {
    fn granted() -> Self {
        Self {
            allowed: true,
            wait: Duration::ZERO,
        }
    }

    fn denied(wait: Duration) -> Self {
        Self {
            allowed: false,
            wait,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub max_per_minute: u32,
    pub max_per_second: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_per_minute: 50,
            max_per_second: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterSnapshot {
    pub requests_in_minute: usize,
    pub requests_in_second: usize,
    pub max_per_minute: u32,
    pub max_per_second: u32,
}

/// Sliding-window request limiter over a log of dispatch timestamps.
/// `try_acquire` reports intent and records the slot atomically when
/// granted; it never blocks.
pub struct RateLimiter {
    config: RateLimiterConfig,
    minute_window: Duration,
    second_window: Duration,
    log: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self::with_windows(config, Duration::from_secs(60), Duration::from_secs(1))
    }

    /// Window durations are injectable so tests don't sleep for a minute
    pub fn with_windows(
        config: RateLimiterConfig,
        minute_window: Duration,
        second_window: Duration,
    ) -> Self {
        Self {
            config,
            minute_window,
            second_window,
            log: Mutex::new(VecDeque::with_capacity(config.max_per_minute as usize + 1)),
        }
    }

    pub async fn try_acquire(&self) -> Admission {
        let now = Instant::now();
        let mut log = self.log.lock().await;

        Self::prune(&mut log, now, self.minute_window);

        if log.len() >= self.config.max_per_minute as usize {
            // Oldest entry leaving the window frees the next slot
            let wait = log
                .front()
                .map(|oldest| self.minute_window.saturating_sub(now - *oldest))
                .unwrap_or(self.minute_window);
            return Admission::denied(wait.max(Duration::from_millis(1)));
        }

        let in_second = Self::count_since(&log, now, self.second_window);
        if in_second >= self.config.max_per_second as usize {
            let oldest_in_second = log
                .iter()
                .rev()
                .take(in_second)
                .last()
                .copied()
                .unwrap_or(now);
            let wait = self.second_window.saturating_sub(now - oldest_in_second);
            return Admission::denied(wait.max(Duration::from_millis(1)));
        }

        log.push_back(now);
        Admission::granted()
    }

    pub async fn snapshot(&self) -> RateLimiterSnapshot {
        let now = Instant::now();
        let mut log = self.log.lock().await;
        Self::prune(&mut log, now, self.minute_window);

        let in_second = Self::count_since(&log, now, self.second_window);

        RateLimiterSnapshot {
            requests_in_minute: log.len(),
            requests_in_second: in_second,
            max_per_minute: self.config.max_per_minute,
            max_per_second: self.config.max_per_second,
        }
    }

    fn count_since(log: &VecDeque<Instant>, now: Instant, window: Duration) -> usize {
        match now.checked_sub(window) {
            Some(floor) => log.iter().rev().take_while(|t| **t > floor).count(),
            // Clock younger than the window: everything is recent
            None => log.len(),
        }
    }

    fn prune(log: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        // Clock younger than the window: nothing can be expired yet
        let Some(floor) = now.checked_sub(window) else {
            return;
        };
        // Boundary counts as expired: a caller that slept the reported
        // wait must find its slot free
        while let Some(front) = log.front() {
            if *front <= floor {
                log.pop_front();
            } else {
                break;
            }
        }
    }
}
