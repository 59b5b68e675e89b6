//! Reservation status transitions.
//!
//! `Pending` is the only non-terminal state. Commission decisions move it to
//! `Accepted` or `Rejected`, the owner may move it to `Cancelled`. Nothing
//! leaves a terminal state.

use std::fmt;

use crate::limits::MIN_REJECTION_REASON_LEN;
use crate::model::*;

use super::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Accept,
    Reject,
    Cancel,
}

impl Action {
    pub fn target(self) -> ReservationStatus {
        match self {
            Action::Accept => ReservationStatus::Accepted,
            Action::Reject => ReservationStatus::Rejected,
            Action::Cancel => ReservationStatus::Cancelled,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Accept => "accept",
            Action::Reject => "reject",
            Action::Cancel => "cancel",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Accept,
    Reject { reason: String },
    Cancel,
}

impl Transition {
    pub fn action(&self) -> Action {
        match self {
            Transition::Accept => Action::Accept,
            Transition::Reject { .. } => Action::Reject,
            Transition::Cancel => Action::Cancel,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub status: ReservationStatus,
    pub rejection_reason: Option<String>,
}

/// Whether `actor` may decide requests for locations owned by `commission`.
pub fn can_decide(actor: &Actor, commission: &Commission) -> bool {
    match actor.role {
        Role::Admin => true,
        Role::Cee => commission.is_member(&actor.user_id),
        Role::Student => false,
    }
}

/// Run one transition. Authorization is checked before state so that a
/// stranger learns nothing about the reservation's status.
pub fn transition(
    reservation: &Reservation,
    actor: &Actor,
    commission: &Commission,
    requested: Transition,
) -> Result<Outcome, EngineError> {
    let action = requested.action();
    let authorized = match action {
        Action::Accept | Action::Reject => can_decide(actor, commission),
        Action::Cancel => reservation.user_id == actor.user_id,
    };
    if !authorized {
        return Err(EngineError::Unauthorized);
    }
    if reservation.status != ReservationStatus::Pending {
        return Err(EngineError::InvalidTransition {
            from: reservation.status,
            action,
        });
    }

    let rejection_reason = match requested {
        Transition::Reject { reason } => Some(validate_rejection_reason(&reason)?),
        Transition::Accept | Transition::Cancel => None,
    };
    Ok(Outcome {
        status: action.target(),
        rejection_reason,
    })
}

pub fn validate_rejection_reason(reason: &str) -> Result<String, EngineError> {
    let trimmed = reason.trim();
    if trimmed.chars().count() < MIN_REJECTION_REASON_LEN {
        return Err(EngineError::validation(format!(
            "rejection reason needs at least {MIN_REJECTION_REASON_LEN} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Raw status update used by the persistence contract. Same shape as
/// `transition` without the actor: only `Pending` may change, only into a
/// terminal state, with a reason exactly when rejecting.
pub fn check_status_change(
    from: ReservationStatus,
    to: ReservationStatus,
    reason: Option<&str>,
) -> Result<Option<String>, EngineError> {
    let action = match to {
        ReservationStatus::Accepted => Action::Accept,
        ReservationStatus::Rejected => Action::Reject,
        ReservationStatus::Cancelled => Action::Cancel,
        ReservationStatus::Pending => {
            return Err(EngineError::validation("a reservation cannot return to pending"));
        }
    };
    if from != ReservationStatus::Pending {
        return Err(EngineError::InvalidTransition { from, action });
    }
    match (to, reason) {
        (ReservationStatus::Rejected, Some(r)) => validate_rejection_reason(r).map(Some),
        (ReservationStatus::Rejected, None) => {
            Err(EngineError::validation("a rejection reason is required"))
        }
        (_, Some(_)) => Err(EngineError::validation(
            "a reason is only recorded for rejections",
        )),
        (_, None) => Ok(None),
    }
}

/// Hard delete is the owner's withdrawal of a request nobody decided yet.
pub fn check_delete(reservation: &Reservation, actor: &Actor) -> Result<(), EngineError> {
    if reservation.user_id != actor.user_id {
        return Err(EngineError::Unauthorized);
    }
    if reservation.status != ReservationStatus::Pending {
        return Err(EngineError::InvalidTransition {
            from: reservation.status,
            action: Action::Cancel,
        });
    }
    Ok(())
}
