//! Saturating deadline arithmetic.
//!
//! TTLs, delays and backoffs are caller-supplied and may be arbitrarily
//! large. Deadlines past the representable range clamp to a far-future
//! instant instead of overflowing.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::Instant;

/// Roughly 30 years; used when `now + duration` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `Instant::now() + after`, clamped to a far-future instant.
pub(crate) fn instant_after(after: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(after)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// `now + millis`, clamped to the latest representable UTC time.
pub(crate) fn utc_after_millis(now: DateTime<Utc>, millis: u64) -> DateTime<Utc> {
    i64::try_from(millis)
        .ok()
        .and_then(TimeDelta::try_milliseconds)
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `now + after`, clamped to the latest representable UTC time.
pub(crate) fn utc_after(now: DateTime<Utc>, after: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(after)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_offsets_are_exact() {
        let now = Utc::now();
        assert_eq!(utc_after_millis(now, 1500), now + TimeDelta::milliseconds(1500));
        assert_eq!(utc_after(now, Duration::from_secs(2)), now + TimeDelta::seconds(2));
    }

    #[test]
    fn huge_offsets_clamp_instead_of_wrapping() {
        let now = Utc::now();
        assert_eq!(utc_after_millis(now, u64::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(utc_after_millis(now, 1 << 62), DateTime::<Utc>::MAX_UTC);
        assert_eq!(utc_after(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }

    #[tokio::test(start_paused = true)]
    async fn instant_saturates() {
        let far = instant_after(Duration::MAX);
        assert!(far > Instant::now() + Duration::from_secs(86_400 * 365));
        assert_eq!(
            instant_after(Duration::from_millis(5)),
            Instant::now() + Duration::from_millis(5)
        );
    }
}
