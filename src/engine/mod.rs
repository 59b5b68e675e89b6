mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod queries;
#[cfg(test)]
mod tests;

pub use conflict::{
    find_conflict, has_conflict, now_ms, validate_duration, validate_request, NewReservation,
};
pub use error::{DurationError, EngineError};
pub use lifecycle::{can_decide, check_status_change, transition, Action, Outcome, Transition};

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use tracing::{error, info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::notify::{NotifyHub, Outbox};
use crate::wal::Wal;

pub type SharedLocationState = Arc<RwLock<LocationState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type Pending = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL. Appends that queue up while one
/// fsync runs are written together and share the next fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let mut batch = match cmd {
            WalCommand::Append { event, response } => vec![(event, response)],
            other => {
                handle_control(&mut wal, other);
                continue;
            }
        };
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, &mut batch);
        // Control commands see every append queued before them.
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<Pending>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    // Nothing from a failed batch may stay in the log.
    if let Err(e) = &result {
        warn!(error = %e, batch = batch.len(), "WAL batch failed, rolling back");
        if let Err(e) = wal.rollback() {
            error!(error = %e, "WAL rollback failed");
        }
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// In-memory reservation state, rebuilt from the WAL at startup.
///
/// Every location sits behind its own `RwLock`. Mutations of one location
/// hold its write lock from validation through the WAL append, so two
/// requests for the same slot are serialized and at most one succeeds.
/// Commissions change rarely and live in a plain `DashMap`; their writers
/// take `catalog_lock` instead.
pub struct Engine {
    pub(super) locations: DashMap<Ulid, SharedLocationState>,
    pub(super) commissions: DashMap<Ulid, Commission>,
    /// Reverse lookup: reservation id → location id.
    pub(super) reservation_to_location: DashMap<Ulid, Ulid>,
    /// Serializes commission and location catalog changes with compaction.
    pub(super) catalog_lock: Mutex<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) outbox: Outbox,
}

/// Apply a location-scoped event. Caller holds the location's write lock.
fn apply_to_location(ls: &mut LocationState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::LocationUpdated {
            name,
            description,
            max_duration_hours,
            ..
        } => {
            ls.location.name = name.clone();
            ls.location.description = description.clone();
            ls.location.max_duration_hours = *max_duration_hours;
        }
        Event::ReservationCreated {
            id,
            location_id,
            user_id,
            requester,
            title,
            description,
            span,
            at,
        } => {
            ls.insert_reservation(Reservation {
                id: *id,
                location_id: *location_id,
                user_id: *user_id,
                requester: requester.clone(),
                title: title.clone(),
                description: description.clone(),
                span: *span,
                status: ReservationStatus::Pending,
                rejection_reason: None,
                created_at: *at,
                updated_at: *at,
            });
            index.insert(*id, *location_id);
        }
        Event::ReservationStatusChanged {
            id,
            status,
            rejection_reason,
            at,
            ..
        } => {
            if let Some(r) = ls.get_mut(id) {
                r.status = *status;
                r.rejection_reason = rejection_reason.clone();
                r.updated_at = *at;
            }
        }
        Event::ReservationDeleted { id, .. } => {
            ls.remove_reservation(*id);
            index.remove(id);
        }
        // Location creation is handled at the DashMap level, commissions elsewhere.
        Event::LocationCreated { .. }
        | Event::CommissionCreated { .. }
        | Event::CommissionMemberAdded { .. }
        | Event::CommissionMemberRemoved { .. } => {}
    }
}

fn apply_to_commissions(commissions: &DashMap<Ulid, Commission>, event: &Event) {
    match event {
        Event::CommissionCreated { id, name, color } => {
            commissions.insert(
                *id,
                Commission {
                    id: *id,
                    name: name.clone(),
                    color: color.clone(),
                    members: Vec::new(),
                },
            );
        }
        Event::CommissionMemberAdded {
            commission_id,
            user_id,
            contact,
        } => {
            if let Some(mut c) = commissions.get_mut(commission_id)
                && !c.is_member(user_id)
            {
                c.members.push(Member {
                    user_id: *user_id,
                    contact: contact.clone(),
                });
            }
        }
        Event::CommissionMemberRemoved {
            commission_id,
            user_id,
        } => {
            if let Some(mut c) = commissions.get_mut(commission_id) {
                c.members.retain(|m| m.user_id != *user_id);
            }
        }
        _ => {}
    }
}

fn location_from_created(event: &Event) -> Option<LocationState> {
    match event {
        Event::LocationCreated {
            id,
            commission_id,
            name,
            description,
            max_duration_hours,
        } => Some(LocationState::new(Location {
            id: *id,
            commission_id: *commission_id,
            name: name.clone(),
            description: description.clone(),
            max_duration_hours: *max_duration_hours,
        })),
        _ => None,
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>, outbox: Outbox) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let commissions = DashMap::new();
        let reservation_to_location = DashMap::new();
        // Replay into plain maps; locks are only added once the state is built.
        let mut locations: HashMap<Ulid, LocationState> = HashMap::new();
        for event in &events {
            if let Some(ls) = location_from_created(event) {
                locations.insert(ls.id(), ls);
            } else if let Some(location_id) = event.location_id() {
                if let Some(ls) = locations.get_mut(&location_id) {
                    apply_to_location(ls, event, &reservation_to_location);
                }
            } else {
                apply_to_commissions(&commissions, event);
            }
        }

        info!(
            events = events.len(),
            locations = locations.len(),
            commissions = commissions.len(),
            "engine state replayed"
        );
        metrics::gauge!(crate::observability::LOCATIONS_ACTIVE).set(locations.len() as f64);

        Ok(Self {
            locations: locations
                .into_iter()
                .map(|(id, ls)| (id, Arc::new(RwLock::new(ls))))
                .collect(),
            commissions,
            reservation_to_location,
            catalog_lock: Mutex::new(()),
            wal_tx,
            notify,
            outbox,
        })
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_location_state(&self, id: &Ulid) -> Option<SharedLocationState> {
        self.locations.get(id).map(|e| e.value().clone())
    }

    pub fn location_of(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_to_location.get(reservation_id).map(|e| *e.value())
    }

    /// WAL-append, apply, publish to live subscribers.
    pub(super) async fn persist_and_apply(
        &self,
        location_id: Ulid,
        ls: &mut LocationState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_location(ls, event, &self.reservation_to_location);
        self.notify.send(location_id, event);
        Ok(())
    }

    /// Same for commission events, which have no location lock.
    pub(super) async fn persist_commission_event(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_commissions(&self.commissions, event);
        Ok(())
    }

    /// Lookup reservation → location, acquire the location's write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: &Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<LocationState>), EngineError> {
        let location_id = self
            .location_of(reservation_id)
            .ok_or(EngineError::NotFound(*reservation_id))?;
        let ls = self
            .get_location_state(&location_id)
            .ok_or(EngineError::NotFound(location_id))?;
        let guard = ls.write_owned().await;
        Ok((location_id, guard))
    }
}
