//! Calendar layout: month grid cells, multi-day row packing for the month
//! view, continuous-time positioning for the day and week views, and the
//! agenda and year overviews.
//!
//! Everything here is pure. Layout works in local wall-clock time; callers
//! convert stored `Ms` timestamps with [`to_local`] first.

mod grid;
mod month;
mod overview;
mod timeline;

pub use grid::{
    calendar_cells, first_day_of_month, last_day_of_month, week_days, weeks, CalendarCell,
};
pub use month::{
    layout_week, month_event_positions, rows_per_week, week_heights, EventPosition,
    MONTH_BASE_HEIGHT, MONTH_ROW_HEIGHT,
};
pub use overview::{agenda, year_overview, AgendaDay, MiniMonth, MiniMonthCell};
pub use timeline::{day_layout, week_layout, TimedEvent, TimelineMetrics, DAY_VIEW, WEEK_VIEW};

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use ulid::Ulid;

use crate::model::{Ms, Reservation, ReservationStatus};

/// Anything that can be placed on the calendar.
pub trait CalendarEvent {
    fn start(&self) -> NaiveDateTime;
    fn end(&self) -> NaiveDateTime;
    fn location_id(&self) -> Ulid;

    fn duration(&self) -> Duration {
        self.end() - self.start()
    }
}

/// Local wall-clock time of a unix-ms instant.
pub fn to_local(ms: Ms, offset: &FixedOffset) -> NaiveDateTime {
    DateTime::from_timestamp_millis(ms)
        .unwrap_or_default()
        .with_timezone(offset)
        .naive_local()
}

/// Unix ms of a local wall-clock time.
pub fn from_local(local: NaiveDateTime, offset: &FixedOffset) -> Ms {
    (local - Duration::seconds(offset.local_minus_utc() as i64))
        .and_utc()
        .timestamp_millis()
}

fn day_start(day: NaiveDate) -> NaiveDateTime {
    day.and_time(NaiveTime::MIN)
}

fn next_day_start(day: NaiveDate) -> NaiveDateTime {
    day_start(day) + Duration::days(1)
}

/// Starts before the end of `day` and ends at or after its start.
fn touches_day<E: CalendarEvent>(event: &E, day: NaiveDate) -> bool {
    event.start() < next_day_start(day) && event.end() >= day_start(day)
}

/// Events touching `day`.
pub fn events_for_day<E: CalendarEvent>(events: &[E], day: NaiveDate) -> Vec<&E> {
    events.iter().filter(|e| touches_day(*e, day)).collect()
}

/// Events touching the month that contains `date`.
pub fn events_for_month<E: CalendarEvent>(events: &[E], date: NaiveDate) -> Vec<&E> {
    let from = day_start(first_day_of_month(date));
    let until = next_day_start(last_day_of_month(date));
    events
        .iter()
        .filter(|e| e.start() < until && e.end() >= from)
        .collect()
}

/// A reservation projected into local time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarEntry {
    pub id: Ulid,
    pub location_id: Ulid,
    pub title: String,
    pub status: ReservationStatus,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl CalendarEntry {
    pub fn from_reservation(r: &Reservation, offset: &FixedOffset) -> Self {
        Self {
            id: r.id,
            location_id: r.location_id,
            title: r.title.clone(),
            status: r.status,
            start: to_local(r.span.start, offset),
            end: to_local(r.span.end, offset),
        }
    }
}

impl CalendarEvent for CalendarEntry {
    fn start(&self) -> NaiveDateTime {
        self.start
    }

    fn end(&self) -> NaiveDateTime {
        self.end
    }

    fn location_id(&self) -> Ulid {
        self.location_id
    }
}
