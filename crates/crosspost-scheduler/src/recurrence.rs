//! Recurrence calculation for repeating posts.
//!
//! All computations are pure and keep the anchor's time of day. Weekdays are
//! numbered 0 (Sunday) through 6 (Saturday).

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Days, Duration, Months, NaiveDate, Utc};
use rand::Rng;

use crate::types::Repeat;

/// Upper bound on rule applications when skipping forward past a reference.
pub const MAX_SKIP_ITERATIONS: usize = 366;

/// Repeat settings of an item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecurrenceRule {
    pub repeat: Repeat,
    /// Configured weekdays for weekly repeats.
    pub days_of_week: BTreeSet<u8>,
    /// Single stored weekday, used when `days_of_week` is empty.
    pub day_of_week: Option<u8>,
    /// Target day of month for monthly repeats; defaults to the anchor's day.
    pub day_of_month: Option<u32>,
}

impl RecurrenceRule {
    pub fn daily() -> Self {
        Self {
            repeat: Repeat::Daily,
            ..Self::default()
        }
    }

    pub fn weekly(days: impl IntoIterator<Item = u8>) -> Self {
        Self {
            repeat: Repeat::Weekly,
            days_of_week: days.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn monthly(day: Option<u32>) -> Self {
        Self {
            repeat: Repeat::Monthly,
            day_of_month: day,
            ..Self::default()
        }
    }

    /// Next occurrence strictly after `anchor`.
    ///
    /// Returns `None` for non-repeating rules and when the calendar overflows.
    pub fn next_occurrence(&self, anchor: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.repeat {
            Repeat::None => None,
            Repeat::Daily => anchor.checked_add_days(Days::new(1)),
            Repeat::Weekly => anchor.checked_add_days(Days::new(self.weekly_offset(anchor))),
            Repeat::Monthly => next_monthly(anchor, self.day_of_month),
        }
    }

    /// First occurrence strictly after `reference`, stepping from `anchor`.
    ///
    /// Gives up after [`MAX_SKIP_ITERATIONS`] steps.
    pub fn next_occurrence_after(
        &self,
        anchor: DateTime<Utc>,
        reference: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let mut current = anchor;
        for _ in 0..MAX_SKIP_ITERATIONS {
            let next = self.next_occurrence(current)?;
            if next > reference {
                return Some(next);
            }
            current = next;
        }
        None
    }

    fn weekly_offset(&self, anchor: DateTime<Utc>) -> u64 {
        let current = anchor.weekday().num_days_from_sunday() as u64;

        if !self.days_of_week.is_empty() {
            return (1..=7u64)
                .find(|offset| {
                    let day = ((current + offset) % 7) as u8;
                    self.days_of_week.contains(&day)
                })
                .unwrap_or(7);
        }

        match self.day_of_week {
            Some(desired) => {
                let delta = (desired as u64 % 7 + 7 - current) % 7;
                if delta == 0 { 7 } else { delta }
            }
            None => 7,
        }
    }
}

/// Shift a fire time by a uniformly random offset within `±bound_minutes`.
///
/// Only fire times are jittered; anchors stay exact so offsets never accumulate.
pub fn apply_jitter<R: Rng + ?Sized>(
    at: DateTime<Utc>,
    bound_minutes: u32,
    rng: &mut R,
) -> DateTime<Utc> {
    if bound_minutes == 0 {
        return at;
    }
    let bound_secs = i64::from(bound_minutes) * 60;
    let offset = rng.gen_range(-bound_secs..=bound_secs);
    at.checked_add_signed(Duration::seconds(offset))
        .unwrap_or(at)
}

/// Number of days in the given month.
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

fn next_monthly(anchor: DateTime<Utc>, day_of_month: Option<u32>) -> Option<DateTime<Utc>> {
    let desired = day_of_month.unwrap_or_else(|| anchor.day());
    let first_of_month = anchor.with_day(1)?;
    let next_month = first_of_month.checked_add_months(Months::new(1))?;
    let last_day = days_in_month(next_month.year(), next_month.month());
    next_month.with_day(desired.clamp(1, last_day))
}
