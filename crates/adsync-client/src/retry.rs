//! Retry classification and back-off timing for the request engine.
//!
//! Which statuses are retried is a fixed set, never inferred from the body.
//! Network failures share the same budget as retryable statuses. A 401 is not
//! part of this budget: the engine handles it with a single token refresh.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;

/// Statuses that indicate a transient condition worth retrying.
pub const RETRYABLE_STATUSES: [u16; 8] = [408, 409, 425, 429, 500, 502, 503, 504];

/// Returns `true` for statuses in [`RETRYABLE_STATUSES`].
#[must_use]
pub fn is_retryable_status(status: StatusCode) -> bool {
    RETRYABLE_STATUSES.contains(&status.as_u16())
}

/// Retry budget and back-off schedule for one logical call.
///
/// Back-off schedule with the defaults (`unit = 1s`, `base = 1.5`):
///
/// | Retry | Sleep before it                |
/// |-------|--------------------------------|
/// | 1     | 1 s × 1.5⁰ ± 20 % jitter       |
/// | 2     | 1 s × 1.5¹ ± 20 % jitter       |
/// | 3     | 1 s × 1.5² ± 20 % jitter       |
///
/// A `Retry-After` header replaces the computed delay. Every delay is capped
/// at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts allowed after the first.
    pub max_retries: u32,
    /// Exponent base: the n-th retry waits `unit * base^(n-1)`.
    pub backoff_base: f64,
    /// Scale of the schedule; zero disables sleeping (tests).
    pub unit: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: 1.5,
            unit: Duration::from_secs(1),
            max_delay: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Un-jittered delay before retry number `retry` (1-based).
    #[must_use]
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.backoff_base.powi(exponent);
        self.scaled(factor)
    }

    /// Delay before retry number `retry` with ±20 % jitter applied.
    #[must_use]
    pub fn jittered_delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let jitter = rand::random::<f64>() * 0.4 + 0.8;
        self.scaled(self.backoff_base.powi(exponent) * jitter)
    }

    /// Delay before retry number `retry` given the failed response's headers.
    ///
    /// A parseable `Retry-After` wins; an unparseable one falls back to the
    /// un-jittered schedule; no header uses the jittered schedule.
    #[must_use]
    pub fn delay_for(&self, retry: u32, headers: &HeaderMap, now: DateTime<Utc>) -> Duration {
        match headers.get(RETRY_AFTER).map(|v| v.to_str().map(str::trim)) {
            Some(Ok(raw)) => match parse_retry_after(raw, now) {
                Some(delay) => delay.min(self.max_delay),
                None => self.base_delay(retry),
            },
            Some(Err(_)) => self.base_delay(retry),
            None => self.jittered_delay(retry),
        }
    }

    fn scaled(&self, factor: f64) -> Duration {
        let secs = self.unit.as_secs_f64() * factor;
        if !secs.is_finite() || secs < 0.0 {
            return self.max_delay;
        }
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Parses a `Retry-After` value: delta-seconds (integer or decimal) or an
/// HTTP-date. Dates in the past yield a zero delay.
#[must_use]
pub fn parse_retry_after(raw: &str, now: DateTime<Utc>) -> Option<Duration> {
    if let Ok(secs) = raw.parse::<f64>() {
        if secs.is_finite() && secs >= 0.0 {
            return Duration::try_from_secs_f64(secs).ok();
        }
        return None;
    }
    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}
