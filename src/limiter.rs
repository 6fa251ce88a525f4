#![forbid(unsafe_code)]

//! Fixed-window request limiter keyed by API key.

use std::{
    collections::HashMap,
    fmt,
    str::FromStr,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use thiserror::Error;

/// `<count>/<unit>` such as `5/minute`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max_requests: u32,
    pub window: Duration,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RateLimitParseError {
    #[error("expected <count>/<unit>, e.g. 5/minute")]
    Format,
    #[error("request count must be a positive integer")]
    Count,
    #[error("unknown window unit {0:?} (use second, minute, hour or day)")]
    Unit(String),
}

impl FromStr for RateLimit {
    type Err = RateLimitParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (count, unit) = raw.trim().split_once('/').ok_or(RateLimitParseError::Format)?;
        let max_requests = count
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|count| *count > 0)
            .ok_or(RateLimitParseError::Count)?;
        let unit = unit.trim().to_ascii_lowercase();
        let seconds = match unit.as_str() {
            "s" | "sec" | "second" | "seconds" => 1,
            "m" | "min" | "minute" | "minutes" => 60,
            "h" | "hour" | "hours" => 60 * 60,
            "d" | "day" | "days" => 24 * 60 * 60,
            _ => return Err(RateLimitParseError::Unit(unit)),
        };
        Ok(Self {
            max_requests,
            window: Duration::from_secs(seconds),
        })
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}s", self.max_requests, self.window.as_secs())
    }
}

/// Returned when a key has used up its window. Carries the time until the
/// window resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAfter(pub Duration);

struct Window {
    started: Instant,
    used: u32,
}

pub struct FixedWindowLimiter {
    limit: RateLimit,
    windows: Mutex<HashMap<String, Window>>,
}

impl FixedWindowLimiter {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, key: &str) -> Result<(), RetryAfter> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> Result<(), RetryAfter> {
        let mut windows = self.windows.lock();
        // Expired windows are dropped lazily so the table stays bounded by the
        // number of keys active within one window.
        windows.retain(|_, window| now.duration_since(window.started) < self.limit.window);

        let window = windows.entry(key.to_string()).or_insert(Window {
            started: now,
            used: 0,
        });
        if window.used >= self.limit.max_requests {
            let elapsed = now.duration_since(window.started);
            return Err(RetryAfter(self.limit.window.saturating_sub(elapsed)));
        }
        window.used += 1;
        Ok(())
    }
}
