use futures::future::join_all;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::Engine;

/// Clamp paging parameters: page ≥ 1, 1 ≤ limit ≤ `MAX_PAGE_SIZE`, 0 means default.
fn page_bounds(page: usize, limit: usize) -> (usize, usize) {
    let limit = match limit {
        0 => DEFAULT_PAGE_SIZE,
        n => n.min(MAX_PAGE_SIZE),
    };
    (page.max(1), limit)
}

fn paginate<T>(items: Vec<T>, page: usize, limit: usize) -> Page<T> {
    let (page, limit) = page_bounds(page, limit);
    let total = items.len();
    let total_pages = total.div_ceil(limit);
    let items = items
        .into_iter()
        .skip((page - 1).saturating_mul(limit))
        .take(limit)
        .collect();
    Page {
        items,
        total,
        page,
        limit,
        total_pages,
    }
}

fn matches_filter(r: &Reservation, filter: &ReservationFilter, needle: Option<&str>) -> bool {
    if let Some(status) = filter.status
        && r.status != status
    {
        return false;
    }
    let Some(needle) = needle else { return true };
    r.title.to_lowercase().contains(needle)
        || r
            .description
            .as_deref()
            .is_some_and(|d| d.to_lowercase().contains(needle))
}

impl Engine {
    /// Reservations of one location in the given statuses, by start time.
    /// An unknown location has none.
    pub async fn find_reservations(
        &self,
        location_id: Ulid,
        statuses: &[ReservationStatus],
    ) -> Vec<Reservation> {
        let Some(ls) = self.get_location_state(&location_id) else {
            return Vec::new();
        };
        let guard = ls.read().await;
        guard
            .reservations
            .iter()
            .filter(|r| statuses.contains(&r.status))
            .cloned()
            .collect()
    }

    pub async fn get_reservation(&self, id: Ulid) -> Option<Reservation> {
        let ls = self.get_location_state(&self.location_of(&id)?)?;
        let guard = ls.read().await;
        guard.get(&id).cloned()
    }

    pub async fn get_location(&self, id: Ulid) -> Option<Location> {
        let ls = self.get_location_state(&id)?;
        let guard = ls.read().await;
        Some(guard.location.clone())
    }

    /// All locations, by name.
    pub async fn list_locations(&self) -> Vec<Location> {
        let states: Vec<_> = self.locations.iter().map(|e| e.value().clone()).collect();
        let mut locations: Vec<Location> =
            join_all(states.iter().map(|ls| async move { ls.read().await.location.clone() })).await;
        locations.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        locations
    }

    pub fn get_commission(&self, id: Ulid) -> Option<Commission> {
        self.commissions.get(&id).map(|c| c.clone())
    }

    /// All commissions, by name.
    pub fn list_commissions(&self) -> Vec<Commission> {
        let mut commissions: Vec<Commission> =
            self.commissions.iter().map(|c| c.value().clone()).collect();
        commissions.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        commissions
    }

    /// Every reservation matching `keep`, across all locations.
    async fn collect_reservations(&self, keep: impl Fn(&Reservation) -> bool) -> Vec<Reservation> {
        let states: Vec<_> = self.locations.iter().map(|e| e.value().clone()).collect();
        let keep = &keep;
        join_all(states.iter().map(|ls| async move {
            let guard = ls.read().await;
            guard
                .reservations
                .iter()
                .filter(|r| keep(*r))
                .cloned()
                .collect::<Vec<_>>()
        }))
        .await
        .into_iter()
        .flatten()
        .collect()
    }

    /// Everything a user ever requested, newest first.
    pub async fn all_user_reservations(&self, user_id: Ulid) -> Vec<Reservation> {
        let mut mine = self.collect_reservations(|r| r.user_id == user_id).await;
        mine.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        mine
    }

    /// A user's reservations, filtered by status and a case-insensitive
    /// search over title and description, newest first, one page at a time.
    pub async fn user_reservations(&self, user_id: Ulid, filter: &ReservationFilter) -> Page<Reservation> {
        let needle = filter
            .search
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());
        let mine: Vec<Reservation> = self
            .all_user_reservations(user_id)
            .await
            .into_iter()
            .filter(|r| matches_filter(r, filter, needle.as_deref()))
            .collect();
        paginate(mine, filter.page, filter.limit)
    }

    /// Accepted reservations for the public calendar, by start time.
    /// `None` covers every location.
    pub async fn calendar_reservations(&self, location_id: Option<Ulid>) -> Vec<Reservation> {
        let mut accepted = match location_id {
            Some(id) => self.find_reservations(id, &[ReservationStatus::Accepted]).await,
            None => {
                self.collect_reservations(|r| r.status == ReservationStatus::Accepted)
                    .await
            }
        };
        accepted.sort_by(|a, b| a.span.start.cmp(&b.span.start).then(a.id.cmp(&b.id)));
        accepted
    }

    /// Every reservation in the system, for reporting.
    pub async fn all_reservations(&self) -> Vec<Reservation> {
        self.collect_reservations(|_| true).await
    }
}
