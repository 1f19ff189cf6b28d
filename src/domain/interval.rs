use std::fmt::{Debug, Formatter};

use chrono::{DateTime, Utc};

use crate::domain::error::EnergyError;
use crate::domain::models::{ActivityReport, StorageJobReport, WeatherReport};

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// Query window. Both bounds take part in record selection, see [`TimeWindow::selects`].
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Debug for TimeWindow {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}..{:?}", self.start, self.end)
    }
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, EnergyError> {
        if start > end {
            return Err(EnergyError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    pub const fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub const fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// A record is selected when it starts inside the window, ends inside the
    /// window, spans the whole window, or is still open at the window end.
    pub fn selects(&self, start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> bool {
        let starts_inside = self.start <= start && start <= self.end;
        match end {
            Some(end) => {
                let ends_inside = self.start <= end && end <= self.end;
                let spans = start < self.start && end > self.end;
                starts_inside || ends_inside || spans
            }
            None => starts_inside || start < self.end,
        }
    }
}

/// A record with a start and an optional (still open) end.
pub trait Timespan {
    fn span_start(&self) -> DateTime<Utc>;
    fn span_end(&self) -> Option<DateTime<Utc>>;
}

impl Timespan for ActivityReport {
    fn span_start(&self) -> DateTime<Utc> {
        self.turned_on
    }

    fn span_end(&self) -> Option<DateTime<Utc>> {
        self.turned_off
    }
}

impl Timespan for WeatherReport {
    fn span_start(&self) -> DateTime<Utc> {
        self.datetime_from
    }

    fn span_end(&self) -> Option<DateTime<Utc>> {
        self.datetime_to
    }
}

impl Timespan for StorageJobReport {
    fn span_start(&self) -> DateTime<Utc> {
        self.date_time_from
    }

    fn span_end(&self) -> Option<DateTime<Utc>> {
        self.date_time_to
    }
}

/// A record narrowed to a window. The original record is left untouched.
#[derive(Debug, PartialEq)]
pub struct Clipped<'a, T> {
    pub record: &'a T,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl<T> Clipped<'_, T> {
    pub fn hours(&self) -> f64 {
        (self.end - self.start).num_milliseconds() as f64 / MILLIS_PER_HOUR
    }
}

/// Selects the records touching `window` and narrows each one to it. Open
/// records are closed at the window end. Input order is preserved.
pub fn clip<'a, T: Timespan>(records: &'a [T], window: &TimeWindow) -> Vec<Clipped<'a, T>> {
    records
        .iter()
        .filter(|record| window.selects(record.span_start(), record.span_end()))
        .map(|record| {
            let start = record.span_start().max(window.start);
            let end = record
                .span_end()
                .map_or(window.end, |end| end.min(window.end))
                .max(start);
            Clipped { record, start, end }
        })
        .collect()
}

pub fn total_hours<T>(clipped: &[Clipped<'_, T>]) -> f64 {
    clipped.iter().map(Clipped::hours).sum()
}
