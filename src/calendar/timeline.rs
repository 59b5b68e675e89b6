use chrono::{NaiveDate, NaiveDateTime, Timelike};

use super::grid::week_days;
use super::{events_for_day, CalendarEvent};

/// Vertical scale of a time-grid view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimelineMetrics {
    /// Pixels per hour.
    pub hour_height: f64,
    /// Floor for very short events.
    pub min_height: f64,
}

pub const DAY_VIEW: TimelineMetrics = TimelineMetrics {
    hour_height: 80.0,
    min_height: 30.0,
};

pub const WEEK_VIEW: TimelineMetrics = TimelineMetrics {
    hour_height: 60.0,
    min_height: 20.0,
};

#[derive(Debug, PartialEq)]
pub struct TimedEvent<'a, E> {
    pub event: &'a E,
    /// Fractional hours from midnight, clipped to the day.
    pub start_hour: f64,
    pub end_hour: f64,
    pub top: f64,
    pub height: f64,
}

fn hour_of(t: NaiveDateTime) -> f64 {
    t.hour() as f64 + t.minute() as f64 / 60.0
}

fn position<'a, E: CalendarEvent>(event: &'a E, day: NaiveDate, metrics: &TimelineMetrics) -> TimedEvent<'a, E> {
    let start_hour = if event.start().date() == day {
        hour_of(event.start())
    } else {
        0.0
    };
    let end_hour = if event.end().date() == day {
        hour_of(event.end())
    } else {
        24.0
    };
    TimedEvent {
        event,
        start_hour,
        end_hour,
        top: start_hour * metrics.hour_height,
        height: ((end_hour - start_hour) * metrics.hour_height).max(metrics.min_height),
    }
}

/// Events of one day positioned on a 24h column. Events from a neighbouring
/// day are clipped at midnight.
pub fn day_layout<'a, E: CalendarEvent>(
    events: &'a [E],
    day: NaiveDate,
    metrics: &TimelineMetrics,
) -> Vec<TimedEvent<'a, E>> {
    events_for_day(events, day)
        .into_iter()
        .map(|e| position(e, day, metrics))
        .collect()
}

/// One column per day of the Sunday-first week containing `date`.
pub fn week_layout<'a, E: CalendarEvent>(
    events: &'a [E],
    date: NaiveDate,
    metrics: &TimelineMetrics,
) -> [(NaiveDate, Vec<TimedEvent<'a, E>>); 7] {
    week_days(date).map(|day| (day, day_layout(events, day, metrics)))
}
