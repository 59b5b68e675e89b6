use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type outside the calendar layer.
pub type Ms = i64;

pub const HOUR_MS: Ms = 3_600_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Exact fractional hours.
    pub fn duration_hours(&self) -> f64 {
        self.duration_ms() as f64 / HOUR_MS as f64
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Accepted,
    Rejected,
    Cancelled,
}

impl ReservationStatus {
    pub const ALL: [ReservationStatus; 4] = [
        ReservationStatus::Pending,
        ReservationStatus::Accepted,
        ReservationStatus::Rejected,
        ReservationStatus::Cancelled,
    ];

    /// Statuses that occupy the location's timeline and take part in conflict checks.
    pub fn holds_slot(self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Accepted)
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ReservationStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "PENDING",
            ReservationStatus::Accepted => "ACCEPTED",
            ReservationStatus::Rejected => "REJECTED",
            ReservationStatus::Cancelled => "CANCELLED",
        }
    }

    /// Display label shown to students.
    pub fn label(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "En attente",
            ReservationStatus::Accepted => "Acceptée",
            ReservationStatus::Rejected => "Refusée",
            ReservationStatus::Cancelled => "Annulée",
        }
    }

    /// Case-insensitive parse of the wire name (`"pending"`, `"ACCEPTED"`, ...).
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Student,
    /// Commission member.
    Cee,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "STUDENT",
            Role::Cee => "CEE",
            Role::Admin => "ADMIN",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Role::Student => "Étudiant",
            Role::Cee => "Membre CEE",
            Role::Admin => "Administrateur",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub email: String,
}

/// The identity attached to every mutating call. Trusted as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Ulid,
    pub role: Role,
    pub contact: Contact,
}

impl Actor {
    pub fn new(user_id: Ulid, role: Role, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            user_id,
            role,
            contact: Contact {
                name: name.into(),
                email: email.into(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub location_id: Ulid,
    pub user_id: Ulid,
    pub requester: Contact,
    pub title: String,
    pub description: Option<String>,
    pub span: Span,
    pub status: ReservationStatus,
    /// Present only when `status == Rejected`.
    pub rejection_reason: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Reservation {
    pub fn holds_slot(&self) -> bool {
        self.status.holds_slot()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: Ulid,
    pub commission_id: Ulid,
    pub name: String,
    pub description: Option<String>,
    pub max_duration_hours: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub user_id: Ulid,
    pub contact: Contact,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commission {
    pub id: Ulid,
    pub name: String,
    pub color: String,
    pub members: Vec<Member>,
}

impl Commission {
    pub fn is_member(&self, user_id: &Ulid) -> bool {
        self.members.iter().any(|m| m.user_id == *user_id)
    }
}

#[derive(Debug, Clone)]
pub struct LocationState {
    pub location: Location,
    /// Every reservation ever made here (all statuses), sorted by `span.start`.
    pub reservations: Vec<Reservation>,
}

impl LocationState {
    pub fn new(location: Location) -> Self {
        Self {
            location,
            reservations: Vec::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.location.id
    }

    /// Insert reservation maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.span.start <= reservation.span.start);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    /// Pending or accepted reservations; terminal records don't count.
    pub fn slot_holders(&self) -> usize {
        self.reservations.iter().filter(|r| r.holds_slot()).count()
    }

    pub fn get(&self, id: &Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == *id)
    }

    pub fn get_mut(&mut self, id: &Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == *id)
    }

    /// Reservations (any status) whose span overlaps the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }
}

/// WAL record format. Flat, one variant per state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CommissionCreated {
        id: Ulid,
        name: String,
        color: String,
    },
    CommissionMemberAdded {
        commission_id: Ulid,
        user_id: Ulid,
        contact: Contact,
    },
    CommissionMemberRemoved {
        commission_id: Ulid,
        user_id: Ulid,
    },
    LocationCreated {
        id: Ulid,
        commission_id: Ulid,
        name: String,
        description: Option<String>,
        max_duration_hours: Option<u32>,
    },
    LocationUpdated {
        id: Ulid,
        name: String,
        description: Option<String>,
        max_duration_hours: Option<u32>,
    },
    ReservationCreated {
        id: Ulid,
        location_id: Ulid,
        user_id: Ulid,
        requester: Contact,
        title: String,
        description: Option<String>,
        span: Span,
        at: Ms,
    },
    ReservationStatusChanged {
        id: Ulid,
        location_id: Ulid,
        status: ReservationStatus,
        rejection_reason: Option<String>,
        at: Ms,
    },
    ReservationDeleted {
        id: Ulid,
        location_id: Ulid,
    },
}

impl Event {
    /// The location whose state this event mutates, if any.
    pub fn location_id(&self) -> Option<Ulid> {
        match self {
            Event::LocationCreated { id, .. } | Event::LocationUpdated { id, .. } => Some(*id),
            Event::ReservationCreated { location_id, .. }
            | Event::ReservationStatusChanged { location_id, .. }
            | Event::ReservationDeleted { location_id, .. } => Some(*location_id),
            Event::CommissionCreated { .. }
            | Event::CommissionMemberAdded { .. }
            | Event::CommissionMemberRemoved { .. } => None,
        }
    }
}

// ── Query types ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    pub status: Option<ReservationStatus>,
    /// Case-insensitive substring match on title or description.
    pub search: Option<String>,
    /// 1-based.
    pub page: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub total_pages: usize,
}

impl<T> Page<T> {
    pub fn has_next(&self) -> bool {
        self.page < self.total_pages
    }

    pub fn has_previous(&self) -> bool {
        self.page > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reservation(start: Ms, end: Ms, status: ReservationStatus) -> Reservation {
        Reservation {
            id: Ulid::new(),
            location_id: Ulid::nil(),
            user_id: Ulid::new(),
            requester: Contact {
                name: "Awa".into(),
                email: "awa@esp.sn".into(),
            },
            title: "Club meeting".into(),
            description: None,
            span: Span::new(start, end),
            status,
            rejection_reason: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn state() -> LocationState {
        LocationState::new(Location {
            id: Ulid::new(),
            commission_id: Ulid::new(),
            name: "Amphi A".into(),
            description: None,
            max_duration_hours: None,
        })
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent
        assert!(a.overlaps(&a));
    }

    #[test]
    fn span_duration_hours_is_fractional() {
        let s = Span::new(0, 3 * HOUR_MS + HOUR_MS / 2);
        assert_eq!(s.duration_hours(), 3.5);
    }

    #[test]
    fn status_slot_and_terminal() {
        assert!(ReservationStatus::Pending.holds_slot());
        assert!(ReservationStatus::Accepted.holds_slot());
        assert!(!ReservationStatus::Rejected.holds_slot());
        assert!(!ReservationStatus::Cancelled.holds_slot());

        assert!(!ReservationStatus::Pending.is_terminal());
        assert!(ReservationStatus::Accepted.is_terminal());
    }

    #[test]
    fn status_parse_is_case_insensitive() {
        assert_eq!(ReservationStatus::parse("pending"), Some(ReservationStatus::Pending));
        assert_eq!(ReservationStatus::parse(" ACCEPTED "), Some(ReservationStatus::Accepted));
        assert_eq!(ReservationStatus::parse("done"), None);
        for status in ReservationStatus::ALL {
            assert_eq!(ReservationStatus::parse(&status.to_string()), Some(status));
        }
    }

    #[test]
    fn reservations_kept_sorted() {
        let mut ls = state();
        ls.insert_reservation(reservation(300, 400, ReservationStatus::Pending));
        ls.insert_reservation(reservation(100, 200, ReservationStatus::Accepted));
        ls.insert_reservation(reservation(200, 300, ReservationStatus::Rejected));
        let starts: Vec<Ms> = ls.reservations.iter().map(|r| r.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn slot_holders_ignore_rejected_and_cancelled() {
        let mut ls = state();
        ls.insert_reservation(reservation(100, 200, ReservationStatus::Pending));
        ls.insert_reservation(reservation(200, 300, ReservationStatus::Accepted));
        ls.insert_reservation(reservation(100, 200, ReservationStatus::Rejected));
        ls.insert_reservation(reservation(100, 200, ReservationStatus::Cancelled));
        assert_eq!(ls.reservations.len(), 4);
        assert_eq!(ls.slot_holders(), 2);
    }

    #[test]
    fn remove_and_lookup() {
        let mut ls = state();
        let r = reservation(100, 200, ReservationStatus::Pending);
        let id = r.id;
        ls.insert_reservation(r);
        assert!(ls.get(&id).is_some());
        assert!(ls.remove_reservation(Ulid::new()).is_none());
        assert_eq!(ls.remove_reservation(id).map(|r| r.id), Some(id));
        assert!(ls.reservations.is_empty());
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut ls = state();
        ls.insert_reservation(reservation(100, 200, ReservationStatus::Pending));
        ls.insert_reservation(reservation(450, 600, ReservationStatus::Accepted));
        ls.insert_reservation(reservation(1000, 1100, ReservationStatus::Pending));

        let hits: Vec<_> = ls.overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut ls = state();
        ls.insert_reservation(reservation(100, 200, ReservationStatus::Pending));
        assert_eq!(ls.overlapping(&Span::new(200, 300)).count(), 0);
        assert_eq!(ls.overlapping(&Span::new(0, 100)).count(), 0);
    }

    #[test]
    fn overlapping_long_reservation_spanning_query() {
        let mut ls = state();
        ls.insert_reservation(reservation(0, 10_000, ReservationStatus::Accepted));
        assert_eq!(ls.overlapping(&Span::new(500, 600)).count(), 1);
    }

    #[test]
    fn event_location_id() {
        let lid = Ulid::new();
        let ev = Event::ReservationDeleted {
            id: Ulid::new(),
            location_id: lid,
        };
        assert_eq!(ev.location_id(), Some(lid));
        let ev = Event::CommissionCreated {
            id: Ulid::new(),
            name: "Culture".into(),
            color: "#3b82f6".into(),
        };
        assert_eq!(ev.location_id(), None);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ReservationStatusChanged {
            id: Ulid::new(),
            location_id: Ulid::new(),
            status: ReservationStatus::Rejected,
            rejection_reason: Some("Salle en travaux".into()),
            at: 42,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
