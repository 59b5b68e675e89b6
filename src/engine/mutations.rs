use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::mail::{Envelope, Notification};
use crate::model::*;
use crate::observability::{
    record_operation, LOCATIONS_ACTIVE, RESERVATIONS_CREATED_TOTAL, RESERVATION_CONFLICTS_TOTAL,
    RESERVATION_DECISIONS_TOTAL, WAL_COMPACTIONS_TOTAL,
};

use super::conflict::{
    check_no_conflict, now_ms, validate_color, validate_duration, validate_name, validate_request,
    validate_span, NewReservation,
};
use super::lifecycle::{check_delete, check_status_change, transition, Transition};
use super::{Engine, EngineError, WalCommand};

fn clean_description(description: Option<String>) -> Result<Option<String>, EngineError> {
    let description = description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());
    if let Some(d) = &description
        && d.chars().count() > MAX_DESCRIPTION_LEN
    {
        return Err(EngineError::LimitExceeded("description too long"));
    }
    Ok(description)
}

impl Engine {
    // ── Commissions ──────────────────────────────────────────

    pub async fn create_commission(
        &self,
        id: Ulid,
        name: &str,
        color: Option<&str>,
    ) -> Result<(), EngineError> {
        let name = validate_name(name, "commission name")?;
        let color = validate_color(color.unwrap_or(DEFAULT_COMMISSION_COLOR))?;

        let _catalog = self.catalog_lock.lock().await;
        if self.commissions.len() >= MAX_COMMISSIONS {
            return Err(EngineError::LimitExceeded("too many commissions"));
        }
        if self.commissions.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        self.persist_commission_event(&Event::CommissionCreated { id, name, color })
            .await
    }

    pub async fn add_commission_member(
        &self,
        commission_id: Ulid,
        user_id: Ulid,
        contact: Contact,
    ) -> Result<(), EngineError> {
        let _catalog = self.catalog_lock.lock().await;
        let commission = self
            .commissions
            .get(&commission_id)
            .map(|c| c.clone())
            .ok_or(EngineError::NotFound(commission_id))?;
        if commission.is_member(&user_id) {
            return Err(EngineError::AlreadyExists(user_id));
        }
        if commission.members.len() >= MAX_MEMBERS_PER_COMMISSION {
            return Err(EngineError::LimitExceeded("too many commission members"));
        }
        self.persist_commission_event(&Event::CommissionMemberAdded {
            commission_id,
            user_id,
            contact,
        })
        .await
    }

    pub async fn remove_commission_member(
        &self,
        commission_id: Ulid,
        user_id: Ulid,
    ) -> Result<(), EngineError> {
        let _catalog = self.catalog_lock.lock().await;
        let is_member = self
            .commissions
            .get(&commission_id)
            .map(|c| c.is_member(&user_id))
            .ok_or(EngineError::NotFound(commission_id))?;
        if !is_member {
            return Err(EngineError::NotFound(user_id));
        }
        self.persist_commission_event(&Event::CommissionMemberRemoved {
            commission_id,
            user_id,
        })
        .await
    }

    // ── Locations ────────────────────────────────────────────

    pub async fn create_location(
        &self,
        id: Ulid,
        commission_id: Ulid,
        name: &str,
        description: Option<String>,
        max_duration_hours: Option<u32>,
    ) -> Result<(), EngineError> {
        let name = validate_name(name, "location name")?;
        let description = clean_description(description)?;
        if max_duration_hours == Some(0) {
            return Err(EngineError::validation("maximum duration must be at least 1h"));
        }

        let _catalog = self.catalog_lock.lock().await;
        if self.locations.len() >= MAX_LOCATIONS {
            return Err(EngineError::LimitExceeded("too many locations"));
        }
        if self.locations.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if !self.commissions.contains_key(&commission_id) {
            return Err(EngineError::NotFound(commission_id));
        }

        let event = Event::LocationCreated {
            id,
            commission_id,
            name: name.clone(),
            description: description.clone(),
            max_duration_hours,
        };
        self.wal_append(&event).await?;
        let ls = LocationState::new(Location {
            id,
            commission_id,
            name,
            description,
            max_duration_hours,
        });
        self.locations.insert(id, Arc::new(RwLock::new(ls)));
        metrics::gauge!(LOCATIONS_ACTIVE).set(self.locations.len() as f64);
        self.notify.send(id, &event);
        Ok(())
    }

    /// Change name, description or length cap. Existing reservations are not
    /// re-checked against a lowered cap.
    pub async fn update_location(
        &self,
        id: Ulid,
        name: &str,
        description: Option<String>,
        max_duration_hours: Option<u32>,
    ) -> Result<(), EngineError> {
        let name = validate_name(name, "location name")?;
        let description = clean_description(description)?;
        if max_duration_hours == Some(0) {
            return Err(EngineError::validation("maximum duration must be at least 1h"));
        }
        let ls = self
            .get_location_state(&id)
            .ok_or(EngineError::NotFound(id))?;
        let mut guard = ls.write().await;
        let event = Event::LocationUpdated {
            id,
            name,
            description,
            max_duration_hours,
        };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    // ── Reservations ─────────────────────────────────────────

    /// Submit a request. Validation, the duration cap, the conflict check
    /// and the WAL append all happen under the location's write lock.
    pub async fn create_reservation(
        &self,
        actor: &Actor,
        request: NewReservation,
    ) -> Result<Reservation, EngineError> {
        let started = Instant::now();
        let result = self.create_reservation_inner(actor, request).await;
        record_operation("create_reservation", started, &result);
        match &result {
            Ok(r) => {
                metrics::counter!(RESERVATIONS_CREATED_TOTAL).increment(1);
                info!(id = %r.id, location = %r.location_id, user = %r.user_id, "reservation created");
            }
            Err(EngineError::Conflict(with)) => {
                metrics::counter!(RESERVATION_CONFLICTS_TOTAL).increment(1);
                debug!(user = %actor.user_id, %with, "reservation refused: slot taken");
            }
            Err(e) => debug!(user = %actor.user_id, "reservation refused: {e}"),
        }
        result
    }

    async fn create_reservation_inner(
        &self,
        actor: &Actor,
        request: NewReservation,
    ) -> Result<Reservation, EngineError> {
        if actor.role != Role::Student {
            return Err(EngineError::Unauthorized);
        }
        let request = validate_request(&request)?;
        let span = Span::new(request.start, request.end);
        validate_span(&span)?;

        let ls = self
            .get_location_state(&request.location_id)
            .ok_or(EngineError::NotFound(request.location_id))?;
        let mut guard = ls.write().await;
        validate_duration(span.start, span.end, guard.location.max_duration_hours)?;
        if guard.slot_holders() >= MAX_RESERVATIONS_PER_LOCATION {
            return Err(EngineError::LimitExceeded("too many reservations on location"));
        }
        check_no_conflict(&guard, &span)?;

        let id = Ulid::new();
        let event = Event::ReservationCreated {
            id,
            location_id: request.location_id,
            user_id: actor.user_id,
            requester: actor.contact.clone(),
            title: request.title,
            description: request.description,
            span,
            at: now_ms(),
        };
        self.persist_and_apply(request.location_id, &mut guard, &event)
            .await?;
        let created = guard.get(&id).cloned().ok_or(EngineError::NotFound(id))?;
        let location = guard.location.clone();
        drop(guard);

        self.notify_commission(&location, &created);
        Ok(created)
    }

    fn notify_commission(&self, location: &Location, reservation: &Reservation) {
        let Some(commission) = self.commissions.get(&location.commission_id).map(|c| c.clone())
        else {
            return;
        };
        for member in &commission.members {
            self.outbox.enqueue(Envelope {
                to: member.contact.email.clone(),
                notification: Notification::ReservationCreated {
                    member_name: member.contact.name.clone(),
                    requester: reservation.requester.clone(),
                    title: reservation.title.clone(),
                    description: reservation.description.clone(),
                    location_name: location.name.clone(),
                    commission_name: commission.name.clone(),
                    span: reservation.span,
                },
            });
        }
    }

    pub async fn accept_reservation(&self, actor: &Actor, id: Ulid) -> Result<Reservation, EngineError> {
        self.decide(actor, id, Transition::Accept).await
    }

    pub async fn reject_reservation(
        &self,
        actor: &Actor,
        id: Ulid,
        reason: &str,
    ) -> Result<Reservation, EngineError> {
        self.decide(
            actor,
            id,
            Transition::Reject {
                reason: reason.to_string(),
            },
        )
        .await
    }

    /// Owner withdraws a pending request. The record stays, as `Cancelled`.
    pub async fn cancel_reservation(&self, actor: &Actor, id: Ulid) -> Result<Reservation, EngineError> {
        self.decide(actor, id, Transition::Cancel).await
    }

    async fn decide(
        &self,
        actor: &Actor,
        id: Ulid,
        requested: Transition,
    ) -> Result<Reservation, EngineError> {
        let started = Instant::now();
        let action = requested.action();
        let result = self.decide_inner(actor, id, requested).await;
        record_operation("decide_reservation", started, &result);
        match &result {
            Ok(r) => {
                metrics::counter!(RESERVATION_DECISIONS_TOTAL, "status" => r.status.as_str())
                    .increment(1);
                info!(%id, by = %actor.user_id, status = %r.status, "reservation updated");
            }
            Err(e) => debug!(%id, by = %actor.user_id, "{action} refused: {e}"),
        }
        result
    }

    async fn decide_inner(
        &self,
        actor: &Actor,
        id: Ulid,
        requested: Transition,
    ) -> Result<Reservation, EngineError> {
        let (location_id, mut guard) = self.resolve_reservation_write(&id).await?;
        let current = guard.get(&id).cloned().ok_or(EngineError::NotFound(id))?;
        let commission_id = guard.location.commission_id;
        let commission = self
            .commissions
            .get(&commission_id)
            .map(|c| c.clone())
            .ok_or(EngineError::NotFound(commission_id))?;

        let outcome = transition(&current, actor, &commission, requested)?;
        let event = Event::ReservationStatusChanged {
            id,
            location_id,
            status: outcome.status,
            rejection_reason: outcome.rejection_reason,
            at: now_ms(),
        };
        self.persist_and_apply(location_id, &mut guard, &event).await?;
        let updated = guard.get(&id).cloned().ok_or(EngineError::NotFound(id))?;
        let location_name = guard.location.name.clone();
        drop(guard);

        self.notify_requester(&updated, location_name, &actor.contact.name);
        Ok(updated)
    }

    fn notify_requester(&self, reservation: &Reservation, location_name: String, decided_by: &str) {
        let notification = match (reservation.status, &reservation.rejection_reason) {
            (ReservationStatus::Accepted, _) => Notification::ReservationAccepted {
                requester_name: reservation.requester.name.clone(),
                title: reservation.title.clone(),
                location_name,
                span: reservation.span,
                decided_by: decided_by.to_string(),
            },
            (ReservationStatus::Rejected, Some(reason)) => Notification::ReservationRejected {
                requester_name: reservation.requester.name.clone(),
                title: reservation.title.clone(),
                location_name,
                span: reservation.span,
                reason: reason.clone(),
                decided_by: decided_by.to_string(),
            },
            _ => return,
        };
        self.outbox.enqueue(Envelope {
            to: reservation.requester.email.clone(),
            notification,
        });
    }

    /// Remove a pending request outright. Owner only.
    pub async fn delete_reservation(&self, actor: &Actor, id: Ulid) -> Result<(), EngineError> {
        let (location_id, mut guard) = self.resolve_reservation_write(&id).await?;
        let current = guard.get(&id).ok_or(EngineError::NotFound(id))?;
        check_delete(current, actor)?;
        let event = Event::ReservationDeleted { id, location_id };
        self.persist_and_apply(location_id, &mut guard, &event).await?;
        info!(%id, by = %actor.user_id, "reservation deleted");
        Ok(())
    }

    /// Status change without an actor, for trusted callers such as imports
    /// and administrative tooling. Sends no e-mail.
    pub async fn update_reservation_status(
        &self,
        id: Ulid,
        status: ReservationStatus,
        reason: Option<&str>,
    ) -> Result<Reservation, EngineError> {
        let (location_id, mut guard) = self.resolve_reservation_write(&id).await?;
        let from = guard.get(&id).ok_or(EngineError::NotFound(id))?.status;
        let rejection_reason = check_status_change(from, status, reason)?;
        let event = Event::ReservationStatusChanged {
            id,
            location_id,
            status,
            rejection_reason,
            at: now_ms(),
        };
        self.persist_and_apply(location_id, &mut guard, &event).await?;
        guard.get(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL as the minimal event list reproducing current state.
    /// Holds the catalog lock and every location's read lock, so no
    /// mutation can slip in between the snapshot and the swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _catalog = self.catalog_lock.lock().await;

        let mut events = Vec::new();
        let mut commissions: Vec<Commission> =
            self.commissions.iter().map(|c| c.value().clone()).collect();
        commissions.sort_by_key(|c| c.id);
        for c in commissions {
            events.push(Event::CommissionCreated {
                id: c.id,
                name: c.name,
                color: c.color,
            });
            for m in c.members {
                events.push(Event::CommissionMemberAdded {
                    commission_id: c.id,
                    user_id: m.user_id,
                    contact: m.contact,
                });
            }
        }

        let states: Vec<_> = self.locations.iter().map(|e| e.value().clone()).collect();
        let mut guards = Vec::with_capacity(states.len());
        for ls in states {
            guards.push(ls.read_owned().await);
        }
        guards.sort_by_key(|g| g.location.id);
        for guard in &guards {
            let location = &guard.location;
            events.push(Event::LocationCreated {
                id: location.id,
                commission_id: location.commission_id,
                name: location.name.clone(),
                description: location.description.clone(),
                max_duration_hours: location.max_duration_hours,
            });
            for r in &guard.reservations {
                events.push(Event::ReservationCreated {
                    id: r.id,
                    location_id: r.location_id,
                    user_id: r.user_id,
                    requester: r.requester.clone(),
                    title: r.title.clone(),
                    description: r.description.clone(),
                    span: r.span,
                    at: r.created_at,
                });
                if r.status != ReservationStatus::Pending {
                    events.push(Event::ReservationStatusChanged {
                        id: r.id,
                        location_id: r.location_id,
                        status: r.status,
                        rejection_reason: r.rejection_reason.clone(),
                        at: r.updated_at,
                    });
                }
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        drop(guards);

        metrics::counter!(WAL_COMPACTIONS_TOTAL).increment(1);
        info!(events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
