//! Period resolution: turning a reference instant into the daily, weekly or monthly window it
//! falls in.
//!
//! Stored timestamps are UTC. Bucketing happens in the operating [`Zone`] so that "today"
//! matches what the patient sees on the wall clock, and the resulting bounds are converted back
//! to UTC for store queries.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, Local, NaiveDate, NaiveDateTime, NaiveTime,
    Offset, TimeZone, Timelike, Utc,
};
use serde::Serialize;

use crate::model::{MetricSample, PeriodKind};

/// The time zone periods are computed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    /// The host's configured local zone, including its daylight-saving rules.
    Local,
    Fixed(FixedOffset),
}

impl Zone {
    pub fn utc() -> Self {
        Zone::Fixed(Utc.fix())
    }

    /// Wall-clock time in this zone at `instant`.
    pub fn to_local(self, instant: DateTime<Utc>) -> NaiveDateTime {
        match self {
            Zone::Local => instant.with_timezone(&Local).naive_local(),
            Zone::Fixed(offset) => instant.with_timezone(&offset).naive_local(),
        }
    }

    /// The UTC instant of a wall-clock time in this zone.
    pub fn from_local(self, local: NaiveDateTime) -> DateTime<Utc> {
        match self {
            Zone::Local => resolve_local(&Local, local),
            Zone::Fixed(offset) => resolve_local(&offset, local),
        }
    }

    pub fn local_date(self, instant: DateTime<Utc>) -> NaiveDate {
        self.to_local(instant).date()
    }

    /// The UTC instant of local midnight on `date`.
    pub fn midnight(self, date: NaiveDate) -> DateTime<Utc> {
        self.from_local(date.and_time(NaiveTime::default()))
    }
}

/// Ambiguous wall-clock times resolve to the earlier instant. Times inside a daylight-saving
/// gap move forward to the first valid instant after the gap.
fn resolve_local<Tz: TimeZone>(tz: &Tz, local: NaiveDateTime) -> DateTime<Utc> {
    let mut candidate = local;
    for _ in 0..4 {
        if let Some(resolved) = tz.from_local_datetime(&candidate).earliest() {
            return resolved.with_timezone(&Utc);
        }
        candidate += Duration::hours(1);
    }
    local.and_utc()
}

/// A time window. Calendar periods are half-open `[start, end)`; the long-term span of a
/// history includes its last sample, so `end` is inclusive there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub end_inclusive: bool,
}

impl Window {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start
            && (instant < self.end || (self.end_inclusive && instant == self.end))
    }

    /// The samples of an ordered history that fall inside the window.
    pub fn filter<'a>(&self, history: &'a [MetricSample]) -> Vec<&'a MetricSample> {
        history
            .iter()
            .filter(|sample| self.contains(sample.recorded_at))
            .collect()
    }
}

/// Resolve the calendar period containing `reference`.
///
/// Returns `None` for [`PeriodKind::LongTerm`], which has no calendar bounds.
pub fn resolve_period(reference: DateTime<Utc>, kind: PeriodKind, zone: Zone) -> Option<Window> {
    let today = zone.local_date(reference);

    let (start, end) = match kind {
        PeriodKind::Daily => (today, today + Duration::days(1)),
        PeriodKind::Weekly => {
            let monday =
                today - Duration::days(i64::from(today.weekday().num_days_from_monday()));
            (monday, monday + Duration::days(7))
        }
        PeriodKind::Monthly => {
            let first = first_of_month(today);
            // 31 days past the 1st always lands inside the following month.
            let next = first_of_month(first + Duration::days(31));
            (first, next)
        }
        PeriodKind::LongTerm => return None,
    };

    Some(Window {
        start: zone.midnight(start),
        end: zone.midnight(end),
        end_inclusive: false,
    })
}

/// The span from the first to the last sample of an ordered history, last sample included.
pub fn history_span(history: &[MetricSample]) -> Option<Window> {
    let first = history.first()?;
    let last = history.last()?;
    Some(Window {
        start: first.recorded_at,
        end: last.recorded_at,
        end_inclusive: true,
    })
}

/// The window a goal of `kind` is measured over: the calendar period containing `reference`,
/// or the whole history for non-calendar periods.
pub fn goal_window(
    reference: DateTime<Utc>,
    kind: PeriodKind,
    zone: Zone,
    history: &[MetricSample],
) -> Option<Window> {
    resolve_period(reference, kind, zone).or_else(|| history_span(history))
}

/// A rolling lookback ending at `now`, used by leaderboards. `None` means unbounded.
pub fn rolling_lookback(now: DateTime<Utc>, kind: PeriodKind) -> Option<DateTime<Utc>> {
    match kind {
        PeriodKind::Daily => Some(now - Duration::days(1)),
        PeriodKind::Weekly => Some(now - Duration::weeks(1)),
        PeriodKind::Monthly => Some(now - Duration::days(30)),
        PeriodKind::LongTerm => None,
    }
}

/// Start of the local hour containing `instant`, as a UTC instant.
pub fn hour_bucket(instant: DateTime<Utc>, zone: Zone) -> DateTime<Utc> {
    let local = zone.to_local(instant);
    let hour = local.date().and_time(NaiveTime::default()) + Duration::hours(i64::from(local.hour()));
    zone.from_local(hour)
}

/// Local midnight of the day containing `instant`, as a UTC instant.
pub fn day_bucket(instant: DateTime<Utc>, zone: Zone) -> DateTime<Utc> {
    zone.midnight(zone.local_date(instant))
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.day0()))
}
