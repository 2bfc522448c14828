use chrono::{DateTime, Duration, Utc};

use crate::types::hours_to_duration;

/// True while a rule is inside its cool-down window after the last trigger.
///
/// A rule that never triggered is never snoozed.
pub fn is_snoozed(
    last_triggered: Option<DateTime<Utc>>,
    snooze_hours: f64,
    now: DateTime<Utc>,
) -> bool {
    match last_triggered {
        Some(at) => now - at < hours_to_duration(snooze_hours),
        None => false,
    }
}

/// End of the cool-down window, if the rule has one running at `now`.
pub fn snoozed_until(
    last_triggered: Option<DateTime<Utc>>,
    snooze_hours: f64,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let at = last_triggered?;
    let window = hours_to_duration(snooze_hours);
    let until = match at.checked_add_signed(window) {
        Some(until) => until,
        // An end past the representable range means the window never closes.
        None if window > Duration::zero() => DateTime::<Utc>::MAX_UTC,
        None => return None,
    };
    (until > now).then_some(until)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_triggered_is_not_snoozed() {
        assert!(!is_snoozed(None, 24.0, Utc::now()));
    }

    #[test]
    fn recent_trigger_is_snoozed() {
        let now = Utc::now();
        assert!(is_snoozed(Some(now - Duration::hours(1)), 24.0, now));
        assert_eq!(
            snoozed_until(Some(now - Duration::hours(1)), 24.0, now),
            Some(now + Duration::hours(23))
        );
    }

    #[test]
    fn snooze_expires_after_window() {
        let t0 = Utc::now();
        let last = Some(t0);
        for hours in [0.5, 1.0, 24.0, 72.0] {
            assert!(is_snoozed(last, hours, t0));
            let later = t0 + hours_to_duration(hours) + Duration::milliseconds(1);
            assert!(!is_snoozed(last, hours, later), "still snoozed after {hours}h");
            assert!(snoozed_until(last, hours, later).is_none());
        }
    }

    #[test]
    fn unrepresentable_window_stays_snoozed() {
        let now = Utc::now();
        assert!(is_snoozed(Some(now), 1e12, now));
        assert_eq!(snoozed_until(Some(now), 1e12, now), Some(DateTime::<Utc>::MAX_UTC));
        assert_eq!(snoozed_until(Some(now), f64::INFINITY, now), Some(DateTime::<Utc>::MAX_UTC));
    }

    #[test]
    fn negative_window_is_never_snoozed() {
        let now = Utc::now();
        assert!(!is_snoozed(Some(now), -1e300, now));
        assert!(snoozed_until(Some(now), -1e300, now).is_none());
    }

    #[test]
    fn zero_window_never_snoozes() {
        let now = Utc::now();
        assert!(!is_snoozed(Some(now), 0.0, now));
    }
}
