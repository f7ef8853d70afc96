//! Lease schedules: wall-clock windows a group is entitled to.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, Result};

/// How a schedule's intervals recur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleClass {
    /// A single interval.
    Once,
    /// A fixed number of equally-spaced repetitions of the interval.
    Repeat,
}

/// A half-open wall-clock interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    /// Interval begin.
    pub start: DateTime<Utc>,
    /// Interval end; always after `start`.
    pub stop: DateTime<Utc>,
}

/// The concrete schedule of a group.
///
/// `start` is the first interval's begin and `stop` the last interval's
/// end; lease expiry is governed by `stop`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Recurrence class.
    pub class: ScheduleClass,
    /// Overall window begin.
    pub start: DateTime<Utc>,
    /// Overall window end.
    pub stop: DateTime<Utc>,
    /// The concrete intervals; a single entry for `Once`.
    pub repeat_dates: Vec<Interval>,
}

impl Schedule {
    /// Build a one-shot schedule.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidSchedule` unless `stop > start`.
    pub fn once(start: DateTime<Utc>, stop: DateTime<Utc>) -> Result<Self> {
        if stop <= start {
            return Err(ControlError::InvalidSchedule);
        }
        Ok(Self {
            class: ScheduleClass::Once,
            start,
            stop,
            repeat_dates: vec![Interval { start, stop }],
        })
    }

    /// Build a repeating schedule: `count` copies of the first interval,
    /// each shifted by `every` from the previous one.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidSchedule` unless `stop > start`,
    /// `every` is positive, and `count >= 1`.
    pub fn repeat(
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
        every: Duration,
        count: u32,
    ) -> Result<Self> {
        if stop <= start || every <= Duration::zero() || count == 0 {
            return Err(ControlError::InvalidSchedule);
        }
        let repeat_dates: Vec<Interval> = (0..count)
            .map(|i| {
                let shift = every * i32::try_from(i).unwrap_or(i32::MAX);
                Interval {
                    start: start + shift,
                    stop: stop + shift,
                }
            })
            .collect();
        let overall_stop = repeat_dates.last().map_or(stop, |interval| interval.stop);
        Ok(Self {
            class: ScheduleClass::Repeat,
            start,
            stop: overall_stop,
            repeat_dates,
        })
    }

    /// True once the lease window is over.
    #[must_use]
    pub fn is_past(&self, now: DateTime<Utc>) -> bool {
        now >= self.stop
    }

    /// Milliseconds remaining until expiry (zero if already past).
    #[must_use]
    pub fn remaining_ms(&self, now: DateTime<Utc>) -> u64 {
        (self.stop - now)
            .num_milliseconds()
            .try_into()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-06-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn once_is_a_single_interval() {
        let start = t0();
        let stop = start + Duration::minutes(40);
        let schedule = Schedule::once(start, stop).unwrap();

        assert_eq!(schedule.class, ScheduleClass::Once);
        assert_eq!(schedule.repeat_dates.len(), 1);
        assert_eq!(schedule.stop, stop);
    }

    #[test]
    fn once_rejects_inverted_window() {
        let start = t0();
        assert!(matches!(
            Schedule::once(start, start),
            Err(ControlError::InvalidSchedule)
        ));
        assert!(matches!(
            Schedule::once(start, start - Duration::seconds(1)),
            Err(ControlError::InvalidSchedule)
        ));
    }

    #[test]
    fn repeat_produces_equally_spaced_intervals() {
        let start = t0();
        let stop = start + Duration::hours(1);
        let schedule = Schedule::repeat(start, stop, Duration::days(1), 3).unwrap();

        assert_eq!(schedule.repeat_dates.len(), 3);
        assert_eq!(schedule.repeat_dates[0].start, start);
        assert_eq!(schedule.repeat_dates[1].start, start + Duration::days(1));
        assert_eq!(schedule.repeat_dates[2].start, start + Duration::days(2));
        // Overall stop is the last interval's end.
        assert_eq!(schedule.stop, stop + Duration::days(2));
    }

    #[test]
    fn repeat_rejects_degenerate_rules() {
        let start = t0();
        let stop = start + Duration::hours(1);
        assert!(Schedule::repeat(start, stop, Duration::zero(), 3).is_err());
        assert!(Schedule::repeat(start, stop, Duration::days(1), 0).is_err());
    }

    #[test]
    fn expiry_clock() {
        let start = t0();
        let stop = start + Duration::minutes(40);
        let schedule = Schedule::once(start, stop).unwrap();

        assert!(!schedule.is_past(start));
        assert!(!schedule.is_past(stop - Duration::seconds(1)));
        assert!(schedule.is_past(stop));
        assert_eq!(schedule.remaining_ms(stop), 0);
        assert_eq!(
            schedule.remaining_ms(stop - Duration::seconds(2)),
            2_000
        );
    }
}
