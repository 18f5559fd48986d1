//! Lockout period computation.
//!
//! Server-driven throttling wins: `Retry-After` (numeric seconds or an
//! HTTP-date) and `X-Rate-Limit-Reset` (Unix seconds) are honored on 429
//! and 503 responses. Otherwise retries back off linearly, except when a
//! connection failure can fail over to another domain immediately.

use chrono::{DateTime, Utc};
use wireline::HttpResponse;

const TOO_MANY_REQUESTS: i32 = 429;
const SERVICE_UNAVAILABLE: i32 = 503;

const LOCKOUT_MINIMUM_SECONDS: f64 = 5.0;
const LOCKOUT_ESCALATION_SECONDS: f64 = 2.5;
const LOCKOUT_MAX_SECONDS: f64 = 30.0;

/// Seconds the server asked us to hold off, read from throttling headers.
/// `None` when the response carries no throttling information.
fn read_throttled_time(
    response_code: i32,
    get_header: impl Fn(&str) -> Option<String>,
    now_utc: DateTime<Utc>,
) -> Option<f64> {
    if response_code != TOO_MANY_REQUESTS && response_code != SERVICE_UNAVAILABLE {
        return None;
    }
    if let Some(retry_after) = get_header("Retry-After") {
        let retry_after = retry_after.trim();
        if let Ok(seconds) = retry_after.parse::<f64>() {
            return Some(seconds);
        }
        if let Ok(server_time) = DateTime::parse_from_rfc2822(retry_after) {
            let delta = server_time.with_timezone(&Utc) - now_utc;
            return Some(delta.num_milliseconds() as f64 / 1000.0);
        }
        return None;
    }
    if let Some(reset) = get_header("X-Rate-Limit-Reset") {
        if let Ok(reset_unix) = reset.trim().parse::<i64>() {
            return Some((reset_unix - now_utc.timestamp()) as f64);
        }
    }
    None
}

/// Seconds the server asked us to hold off, from a response.
pub fn throttled_time_from_response(response: &HttpResponse) -> Option<f64> {
    read_throttled_time(
        response.response_code(),
        |name| response.header(name),
        Utc::now(),
    )
}

/// The lockout before the next attempt.
///
/// `retry_count` is the number of attempts already retried; the escalating
/// backoff only applies from the first retry on. `skip_backoff` is set when
/// the failure was a connection error and other domains remain to try.
pub(crate) fn lockout_period_seconds(
    response: Option<&HttpResponse>,
    retry_count: u32,
    skip_backoff: bool,
) -> f64 {
    let mut lockout = response
        .and_then(throttled_time_from_response)
        .unwrap_or(0.0);
    if retry_count >= 1 && lockout <= 0.0 && !skip_backoff {
        lockout = (LOCKOUT_MINIMUM_SECONDS + LOCKOUT_ESCALATION_SECONDS * (retry_count - 1) as f64)
            .min(LOCKOUT_MAX_SECONDS);
    }
    lockout
}
