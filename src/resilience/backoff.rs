//! Exponential backoff with server-supplied overrides.
//!
//! Everything here is a pure function of the attempt index, the configured
//! bounds and the previous response head. Sleeping and cancellation live in
//! [`super::timeouts`].

use std::time::{Duration, SystemTime};

use axum::http::{header::RETRY_AFTER, HeaderMap, Response, StatusCode};

/// Wait before retry number `attempt` (0-based).
///
/// A `Retry-After` header on a 429 or 503 response wins over the exponential
/// schedule and is not clamped to `max`.
pub fn backoff<B>(
    min: Duration,
    max: Duration,
    attempt: u32,
    response: Option<&Response<B>>,
) -> Duration {
    retry_after_override(response, SystemTime::now())
        .unwrap_or_else(|| exponential(min, max, attempt))
}

/// `min * 2^attempt`, clamped to `max` (also on overflow).
pub fn exponential(min: Duration, max: Duration, attempt: u32) -> Duration {
    2u32.checked_pow(attempt)
        .and_then(|factor| min.checked_mul(factor))
        .map_or(max, |delay| delay.min(max))
}

/// The server-requested delay, if `response` is a 429/503 with a usable
/// `Retry-After` header.
pub fn retry_after_override<B>(response: Option<&Response<B>>, now: SystemTime) -> Option<Duration> {
    let response = response?;
    match response.status() {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
            parse_retry_after(response.headers(), now)
        }
        _ => None,
    }
}

/// Parse the first `Retry-After` value as delta-seconds or an HTTP-date.
///
/// Negative or unparseable values yield `None`. A date in the past yields a
/// zero delay.
pub fn parse_retry_after(headers: &HeaderMap, now: SystemTime) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(seconds) = value.parse::<i64>() {
        return u64::try_from(seconds).ok().map(Duration::from_secs);
    }

    let at = httpdate::parse_http_date(value).ok()?;
    Some(at.duration_since(now).unwrap_or(Duration::ZERO))
}

/// Add up to `factor * delay` of random jitter. `factor` is clamped to `[0, 1]`.
pub fn jittered(delay: Duration, factor: f64) -> Duration {
    let factor = factor.clamp(0.0, 1.0);
    if factor == 0.0 || delay.is_zero() {
        return delay;
    }
    delay + delay.mul_f64(factor * fastrand::f64())
}
