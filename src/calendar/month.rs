use chrono::NaiveDate;

use super::grid::calendar_cells;
use super::CalendarEvent;

/// Fixed part of a month-view week row, in pixels.
pub const MONTH_BASE_HEIGHT: u32 = 100;
/// Extra height per stacked event row.
pub const MONTH_ROW_HEIGHT: u32 = 32;

/// Placement of one event inside one week of the month grid. An event that
/// crosses a week boundary gets one position per week it touches.
#[derive(Debug, PartialEq)]
pub struct EventPosition<'a, E> {
    pub event: &'a E,
    pub week_index: usize,
    /// 0 = Sunday.
    pub start_col: u32,
    /// Columns covered within this week, at least 1.
    pub span: u32,
    pub row: u32,
}

/// Row packing for one week.
///
/// Events are ordered by start, longer first on ties, then each takes the
/// lowest row whose last occupied column is before its own start column.
/// This is a greedy heuristic: it does not guarantee the minimum row count.
pub fn layout_week<'a, E: CalendarEvent>(
    events: &'a [E],
    week_start: NaiveDate,
    week_end: NaiveDate,
    week_index: usize,
) -> Vec<EventPosition<'a, E>> {
    let mut in_week: Vec<&E> = events
        .iter()
        .filter(|e| e.start().date() <= week_end && e.end().date() >= week_start)
        .collect();
    in_week.sort_by(|a, b| {
        a.start()
            .cmp(&b.start())
            .then_with(|| b.duration().cmp(&a.duration()))
    });

    let mut row_end: Vec<i64> = Vec::new();
    let mut positions = Vec::with_capacity(in_week.len());
    for event in in_week {
        let first = event.start().date().max(week_start);
        let last = event.end().date().min(week_end);
        let start_col = (first - week_start).num_days();
        let end_col = start_col + (last - first).num_days();

        let row = match row_end.iter().position(|&end| end < start_col) {
            Some(r) => {
                row_end[r] = end_col;
                r
            }
            None => {
                row_end.push(end_col);
                row_end.len() - 1
            }
        };
        positions.push(EventPosition {
            event,
            week_index,
            start_col: start_col as u32,
            span: (end_col - start_col + 1) as u32,
            row: row as u32,
        });
    }
    positions
}

/// Positions for every week of the month grid containing `date`.
pub fn month_event_positions<E: CalendarEvent>(events: &[E], date: NaiveDate) -> Vec<EventPosition<'_, E>> {
    let cells = calendar_cells(date, date);
    cells
        .chunks(7)
        .enumerate()
        .flat_map(|(week_index, week)| {
            layout_week(events, week[0].date, week[week.len() - 1].date, week_index)
        })
        .collect()
}

/// Stacked rows used by each of `week_count` weeks.
pub fn rows_per_week<E>(positions: &[EventPosition<'_, E>], week_count: usize) -> Vec<u32> {
    let mut rows = vec![0; week_count];
    for p in positions {
        if let Some(slot) = rows.get_mut(p.week_index) {
            *slot = (*slot).max(p.row + 1);
        }
    }
    rows
}

/// Pixel height of each week row: base plus one row height per stacked row.
pub fn week_heights<E>(positions: &[EventPosition<'_, E>], week_count: usize) -> Vec<u32> {
    rows_per_week(positions, week_count)
        .into_iter()
        .map(|rows| MONTH_BASE_HEIGHT + rows * MONTH_ROW_HEIGHT)
        .collect()
}
