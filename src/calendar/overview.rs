use chrono::NaiveDate;
use serde::Serialize;

use super::{
    calendar_cells, events_for_month, first_day_of_month, last_day_of_month, touches_day,
    CalendarCell, CalendarEvent,
};

/// One day of the agenda list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgendaDay<'a, E> {
    pub date: NaiveDate,
    pub events: Vec<&'a E>,
}

/// Days of the month containing `date` that have at least one event, in
/// order, each with the events touching it.
pub fn agenda<E: CalendarEvent>(events: &[E], date: NaiveDate) -> Vec<AgendaDay<'_, E>> {
    let in_month = events_for_month(events, date);
    let last = last_day_of_month(date);
    first_day_of_month(date)
        .iter_days()
        .take_while(|d| *d <= last)
        .filter_map(|day| {
            let events: Vec<&E> = in_month
                .iter()
                .copied()
                .filter(|e| touches_day(*e, day))
                .collect();
            (!events.is_empty()).then_some(AgendaDay { date: day, events })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MiniMonthCell {
    pub cell: CalendarCell,
    /// Events touching the day. Always 0 for padding days of other months.
    pub event_count: usize,
}

impl MiniMonthCell {
    pub fn has_events(&self) -> bool {
        self.event_count > 0
    }
}

/// A compact month grid for the year view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MiniMonth {
    /// First day of the month.
    pub month: NaiveDate,
    pub cells: Vec<MiniMonthCell>,
}

/// Twelve Sunday-first month grids for `year`. Empty when the year is out
/// of chrono's range.
pub fn year_overview<E: CalendarEvent>(events: &[E], year: i32, today: NaiveDate) -> Vec<MiniMonth> {
    (1..=12)
        .filter_map(|m| NaiveDate::from_ymd_opt(year, m, 1))
        .map(|month| {
            let in_month = events_for_month(events, month);
            let cells = calendar_cells(month, today)
                .into_iter()
                .map(|cell| MiniMonthCell {
                    event_count: if cell.is_current_month {
                        in_month.iter().filter(|e| touches_day(**e, cell.date)).count()
                    } else {
                        0
                    },
                    cell,
                })
                .collect();
            MiniMonth { month, cells }
        })
        .collect()
}
