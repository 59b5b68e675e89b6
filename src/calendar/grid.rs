use chrono::{Datelike, Duration, Months, NaiveDate};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CalendarCell {
    pub date: NaiveDate,
    pub is_current_month: bool,
    pub is_today: bool,
}

pub fn first_day_of_month(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.day0() as i64)
}

pub fn last_day_of_month(date: NaiveDate) -> NaiveDate {
    first_day_of_month(date)
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(NaiveDate::MAX)
}

/// Sunday on or before `date`.
fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_sunday() as i64)
}

/// Saturday on or after `date`.
fn week_end(date: NaiveDate) -> NaiveDate {
    date + Duration::days(6 - date.weekday().num_days_from_sunday() as i64)
}

/// Full Sunday-to-Saturday weeks covering the month of `date`. Always a
/// multiple of 7 cells: 28, 35 or 42.
pub fn calendar_cells(date: NaiveDate, today: NaiveDate) -> Vec<CalendarCell> {
    let month_start = first_day_of_month(date);
    let last = week_end(last_day_of_month(date));
    week_start(month_start)
        .iter_days()
        .take_while(|d| *d <= last)
        .map(|d| CalendarCell {
            date: d,
            is_current_month: d.year() == month_start.year() && d.month() == month_start.month(),
            is_today: d == today,
        })
        .collect()
}

pub fn weeks(cells: &[CalendarCell]) -> Vec<&[CalendarCell]> {
    cells.chunks(7).collect()
}

/// The Sunday-first week containing `date`.
pub fn week_days(date: NaiveDate) -> [NaiveDate; 7] {
    let start = week_start(date);
    std::array::from_fn(|i| start + Duration::days(i as i64))
}
