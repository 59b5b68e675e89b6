//! Dashboard aggregates over one user's reservations.

use std::collections::HashMap;

use chrono::{Datelike, FixedOffset, Months, NaiveDate};
use serde::Serialize;
use ulid::Ulid;

use crate::calendar::{first_day_of_month, to_local};
use crate::model::{Ms, Reservation, ReservationStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: usize,
    pub pending: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    fn record(&mut self, status: ReservationStatus) {
        self.total += 1;
        match status {
            ReservationStatus::Pending => self.pending += 1,
            ReservationStatus::Accepted => self.accepted += 1,
            ReservationStatus::Rejected => self.rejected += 1,
            ReservationStatus::Cancelled => self.cancelled += 1,
        }
    }

    /// Share of accepted requests, in whole percent.
    pub fn acceptance_rate(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        (self.accepted as f64 / self.total as f64 * 100.0).round() as u32
    }
}

pub fn status_counts(reservations: &[Reservation]) -> StatusCounts {
    let mut counts = StatusCounts::default();
    for r in reservations {
        counts.record(r.status);
    }
    counts
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyCount {
    pub year: i32,
    pub month: u32,
    /// Short French month name, as shown on the chart axis.
    pub label: &'static str,
    pub counts: StatusCounts,
}

fn month_label(month: u32) -> &'static str {
    match month {
        1 => "janv.",
        2 => "févr.",
        3 => "mars",
        4 => "avr.",
        5 => "mai",
        6 => "juin",
        7 => "juil.",
        8 => "août",
        9 => "sept.",
        10 => "oct.",
        11 => "nov.",
        _ => "déc.",
    }
}

/// Requests per creation month for the `months` months ending with the
/// current one, oldest first. Months without activity are present with
/// zero counts.
pub fn monthly_breakdown(
    reservations: &[Reservation],
    now: Ms,
    months: u32,
    offset: &FixedOffset,
) -> Vec<MonthlyCount> {
    let this_month = first_day_of_month(to_local(now, offset).date());
    let mut by_month: HashMap<NaiveDate, StatusCounts> = HashMap::new();
    for r in reservations {
        let created = first_day_of_month(to_local(r.created_at, offset).date());
        by_month.entry(created).or_default().record(r.status);
    }
    (0..months)
        .rev()
        .filter_map(|back| this_month.checked_sub_months(Months::new(back)))
        .map(|month| MonthlyCount {
            year: month.year(),
            month: month.month(),
            label: month_label(month.month()),
            counts: by_month.get(&month).copied().unwrap_or_default(),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LocationCount {
    pub location_id: Ulid,
    pub count: usize,
}

/// Most requested locations, busiest first.
pub fn top_locations(reservations: &[Reservation], limit: usize) -> Vec<LocationCount> {
    let mut counts: HashMap<Ulid, usize> = HashMap::new();
    for r in reservations {
        *counts.entry(r.location_id).or_default() += 1;
    }
    let mut ranked: Vec<LocationCount> = counts
        .into_iter()
        .map(|(location_id, count)| LocationCount { location_id, count })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then(a.location_id.cmp(&b.location_id)));
    ranked.truncate(limit);
    ranked
}

/// Accepted reservations that have not started yet, soonest first.
pub fn upcoming(reservations: &[Reservation], now: Ms, limit: usize) -> Vec<&Reservation> {
    let mut next: Vec<&Reservation> = reservations
        .iter()
        .filter(|r| r.status == ReservationStatus::Accepted && r.span.start >= now)
        .collect();
    next.sort_by_key(|r| (r.span.start, r.id));
    next.truncate(limit);
    next
}

/// Most recently changed reservations first.
pub fn recent_activity(reservations: &[Reservation], limit: usize) -> Vec<&Reservation> {
    let mut recent: Vec<&Reservation> = reservations.iter().collect();
    recent.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
    recent.truncate(limit);
    recent
}

/// Change from `previous` to `current`, in whole percent.
pub fn growth_percentage(current: usize, previous: usize) -> i64 {
    match (current, previous) {
        (0, 0) => 0,
        (_, 0) => 100,
        _ => ((current as f64 - previous as f64) / previous as f64 * 100.0).round() as i64,
    }
}
