//! Retry and lifecycle policy: what happens to an event after an attempt.

use chrono::{DateTime, TimeDelta, Utc};
use hookclock_core::RetryConf;

use crate::dispatch::DispatchOutcome;
use crate::events::StateUpdate;

/// Longest delay a retry can be pushed out by, whatever the server asks for.
pub const MAX_RETRY_DELAY_SECS: u64 = 7 * 24 * 3600;

fn seconds(secs: u64) -> Option<TimeDelta> {
    TimeDelta::try_seconds(i64::try_from(secs).ok()?)
}

/// True when the event is further behind its scheduled time than it tolerates.
/// A tolerance too large to represent never expires.
pub fn is_expired(now: DateTime<Utc>, scheduled_time: DateTime<Utc>, tolerance_seconds: u64) -> bool {
    match seconds(tolerance_seconds) {
        Some(tolerance) => now.signed_duration_since(scheduled_time) > tolerance,
        None => false,
    }
}

/// `Retry-After` as whole non-negative seconds. HTTP-date values are ignored.
pub fn retry_after_seconds(headers: &[(String, String)]) -> Option<u64> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("retry-after"))
        .and_then(|(_, value)| value.trim().parse::<u64>().ok())
}

fn retry_time(now: DateTime<Utc>, delay_secs: u64) -> DateTime<Utc> {
    let capped = delay_secs.min(MAX_RETRY_DELAY_SECS);
    seconds(capped)
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(now)
}

/// Next state for an event that was dispatched.
///
/// `tries_before` is the attempt count before this attempt was recorded.
/// After `k` failures the event is retried while `k < num_retries` and
/// moves to `error` at `k = num_retries` (one attempt when it is 0), unless
/// the server sent `Retry-After`. Delays are capped at [`MAX_RETRY_DELAY_SECS`].
pub fn decide(
    outcome: &DispatchOutcome,
    tries_before: u32,
    conf: &RetryConf,
    now: DateTime<Utc>,
) -> StateUpdate {
    if outcome.is_success() {
        return StateUpdate::Delivered;
    }
    let failures = tries_before.saturating_add(1);
    let hint = retry_after_seconds(outcome.response_headers());
    if failures >= conf.num_retries && hint.is_none() {
        return StateUpdate::Error;
    }
    let delay = hint.unwrap_or(conf.retry_interval_seconds);
    StateUpdate::RetryAt(retry_time(now, delay))
}
