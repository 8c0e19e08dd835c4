//! Refresh timing decision.

use chrono::{DateTime, Duration, Utc};

/// Default safety margin before expiry at which a token is refreshed.
pub const DEFAULT_REFRESH_BUFFER_SECS: i64 = 300;

/// Returns true when the token must be refreshed before use.
///
/// A refresh is due once `now` passes `expires_at - buffer`; the boundary
/// itself is not due. The buffer covers the time a consumer's downstream
/// request takes after the token was judged valid.
pub fn is_refresh_due(expires_at: DateTime<Utc>, now: DateTime<Utc>, buffer: Duration) -> bool {
    // A threshold below the representable range is always due
    expires_at
        .checked_sub_signed(buffer)
        .map_or(true, |threshold| now > threshold)
}

/// Expiry `secs` seconds after `now`.
///
/// `None` when `secs` is not positive or the result is out of range, so
/// untrusted lifetimes never panic and never yield an already-expired token.
pub fn expiry_after(now: DateTime<Utc>, secs: i64) -> Option<DateTime<Utc>> {
    if secs <= 0 {
        return None;
    }
    now.checked_add_signed(Duration::try_seconds(secs)?)
}
