//! Timeslot catalog
//!
//! A static table of day codes and time codes. A compound code (day + time,
//! e.g. `SB`) names one weekly session. Resolution turns a code into the next
//! concrete session start in the booking timezone.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};

use crate::error::{JourneyError, Result};

/// Minimum lead time between "now" and a resolved occurrence.
pub const RESOLVE_EPSILON_MINUTES: i64 = 1;

/// A bookable day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayEntry {
    /// Single-character code
    pub code: char,
    /// Weekday in the booking timezone
    pub weekday: Weekday,
    /// Display name
    pub name: &'static str,
}

/// A bookable time of day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeEntry {
    /// Single-character code
    pub code: char,
    /// Local start time
    pub start: NaiveTime,
    /// Session length in minutes
    pub duration_minutes: i64,
    /// Open-door session; displayed as a range
    pub walk_in: bool,
}

impl TimeEntry {
    fn label(&self) -> String {
        if self.walk_in {
            let end = self.start + Duration::minutes(self.duration_minutes);
            format!("{}–{} walk-in", self.start.format("%H:%M"), end.format("%H:%M"))
        } else {
            self.start.format("%H:%M").to_string()
        }
    }
}

/// Catalog entry for a compound code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeslot<'a> {
    /// Day half of the code
    pub day: &'a DayEntry,
    /// Time half of the code
    pub time: &'a TimeEntry,
}

impl Timeslot<'_> {
    /// Compound code, e.g. `SA`
    #[must_use]
    pub fn code(&self) -> String {
        format!("{}{}", self.day.code, self.time.code)
    }
}

/// The catalog of bookable sessions in one timezone.
#[derive(Debug, Clone)]
pub struct TimeslotCatalog {
    offset: FixedOffset,
    days: Vec<DayEntry>,
    times: Vec<TimeEntry>,
}

impl TimeslotCatalog {
    /// Build a catalog from explicit entries.
    pub fn new(utc_offset_hours: i32, days: Vec<DayEntry>, times: Vec<TimeEntry>) -> Result<Self> {
        let offset = FixedOffset::east_opt(utc_offset_hours * 3600).ok_or_else(|| {
            JourneyError::InvalidConfig(format!("UTC offset out of range: {utc_offset_hours}"))
        })?;
        Ok(Self { offset, days, times })
    }

    /// Weekend sessions: Saturday/Sunday, 15:30 and a 19:30 walk-in.
    pub fn standard(utc_offset_hours: i32) -> Result<Self> {
        let afternoon = NaiveTime::from_hms_opt(15, 30, 0)
            .ok_or_else(|| JourneyError::Other("invalid afternoon start".to_string()))?;
        let evening = NaiveTime::from_hms_opt(19, 30, 0)
            .ok_or_else(|| JourneyError::Other("invalid evening start".to_string()))?;

        Self::new(
            utc_offset_hours,
            vec![
                DayEntry { code: 'S', weekday: Weekday::Sat, name: "Saturday" },
                DayEntry { code: 'U', weekday: Weekday::Sun, name: "Sunday" },
            ],
            vec![
                TimeEntry { code: 'A', start: afternoon, duration_minutes: 30, walk_in: false },
                TimeEntry { code: 'B', start: evening, duration_minutes: 120, walk_in: true },
            ],
        )
    }

    /// Booking timezone
    #[must_use]
    pub const fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Look up a day code; input is expected to be normalized already.
    #[must_use]
    pub fn day(&self, code: char) -> Option<&DayEntry> {
        self.days.iter().find(|d| d.code == code)
    }

    /// Look up a time code; input is expected to be normalized already.
    #[must_use]
    pub fn time(&self, code: char) -> Option<&TimeEntry> {
        self.times.iter().find(|t| t.code == code)
    }

    /// Look up a compound code such as `SB`.
    #[must_use]
    pub fn lookup(&self, code: &str) -> Option<Timeslot<'_>> {
        let mut chars = code.chars();
        let (day, time) = (chars.next()?, chars.next()?);
        if chars.next().is_some() {
            return None;
        }
        Some(Timeslot { day: self.day(day)?, time: self.time(time)? })
    }

    /// All compound codes in catalog order.
    #[must_use]
    pub fn codes(&self) -> Vec<String> {
        self.days
            .iter()
            .flat_map(|d| self.times.iter().map(move |t| format!("{}{}", d.code, t.code)))
            .collect()
    }

    /// Next start of `code` at least [`RESOLVE_EPSILON_MINUTES`] after `now`.
    ///
    /// Pure: the same code at the same instant always resolves to the same value.
    pub fn resolve(&self, code: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let slot = self.lookup(code).ok_or_else(|| JourneyError::UnknownTimeslot(code.to_string()))?;
        Ok(self.next_occurrence(slot.day.weekday, slot.time.start, now))
    }

    /// Human-readable label, e.g. `Saturday 15:30 (UTC+7)`.
    pub fn display(&self, code: &str) -> Result<String> {
        let slot = self.lookup(code).ok_or_else(|| JourneyError::UnknownTimeslot(code.to_string()))?;
        Ok(format!("{} {} ({})", slot.day.name, slot.time.label(), self.offset_label()))
    }

    /// Calendar date of an instant in the booking timezone, e.g. `24 October 2026`.
    #[must_use]
    pub fn local_date(&self, instant: DateTime<Utc>) -> String {
        instant.with_timezone(&self.offset).format("%-d %B %Y").to_string()
    }

    /// `UTC+7`, `UTC-5`, `UTC+0`
    #[must_use]
    pub fn offset_label(&self) -> String {
        let hours = self.offset.local_minus_utc() / 3600;
        if hours < 0 {
            format!("UTC{hours}")
        } else {
            format!("UTC+{hours}")
        }
    }

    /// `S = Saturday, U = Sunday`
    #[must_use]
    pub fn day_options(&self) -> String {
        self.days.iter().map(|d| format!("{} = {}", d.code, d.name)).collect::<Vec<_>>().join(", ")
    }

    /// `A = 15:30, B = 19:30–21:30 walk-in`
    #[must_use]
    pub fn time_options(&self) -> String {
        self.times.iter().map(|t| format!("{} = {}", t.code, t.label())).collect::<Vec<_>>().join(", ")
    }

    /// Next instant that falls on `weekday` at local `time`, at least
    /// [`RESOLVE_EPSILON_MINUTES`] after `now`.
    #[must_use]
    pub fn next_occurrence(&self, weekday: Weekday, time: NaiveTime, now: DateTime<Utc>) -> DateTime<Utc> {
        next_weekly(self.offset, weekday, time, now)
    }
}

/// Next instant that falls on `weekday` at `time` in `offset`, at least
/// [`RESOLVE_EPSILON_MINUTES`] after `now`.
#[must_use]
pub fn next_weekly(offset: FixedOffset, weekday: Weekday, time: NaiveTime, now: DateTime<Utc>) -> DateTime<Utc> {
    let earliest = now + Duration::minutes(RESOLVE_EPSILON_MINUTES);
    let local = now.with_timezone(&offset);
    let days_ahead = (i64::from(weekday.num_days_from_monday()) - i64::from(local.weekday().num_days_from_monday()))
        .rem_euclid(7);

    let start = local_to_utc(offset, local.date_naive() + Duration::days(days_ahead), time);
    if start < earliest {
        start + Duration::days(7)
    } else {
        start
    }
}

/// `time` on the local calendar day after `instant`.
#[must_use]
pub fn next_day_at(offset: FixedOffset, instant: DateTime<Utc>, time: NaiveTime) -> DateTime<Utc> {
    let date = instant.with_timezone(&offset).date_naive() + Duration::days(1);
    local_to_utc(offset, date, time)
}

fn local_to_utc(offset: FixedOffset, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    // A fixed offset has exactly one mapping; subtracting it cannot be ambiguous
    Utc.from_utc_datetime(&(date.and_time(time) - Duration::seconds(i64::from(offset.local_minus_utc()))))
}
