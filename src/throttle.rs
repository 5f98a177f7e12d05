use std::time::Duration;

use tokio::time::Instant;

/// Decides whether an accumulated partial text is due for a transport edit.
///
/// Returns true iff strictly more than `min_interval` has elapsed between
/// `last_flush` and `now`. The final flush at stream end bypasses this gate
/// entirely; see `relay`.
pub fn should_flush(last_flush: Instant, now: Instant, min_interval: Duration) -> bool {
    now.saturating_duration_since(last_flush) > min_interval
}
