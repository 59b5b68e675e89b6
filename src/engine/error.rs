use thiserror::Error;
use ulid::Ulid;

use crate::model::ReservationStatus;

use super::lifecycle::Action;

/// Failure of a pure duration/range check.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DurationError {
    #[error("end must be after start")]
    InvalidRange,
    #[error("maximum duration is {max_hours}h (requested {}h)", round_tenth(*requested_hours))]
    DurationExceeded { requested_hours: f64, max_hours: u32 },
}

/// Round to one decimal place, the way durations are reported to users.
pub(crate) fn round_tenth(hours: f64) -> f64 {
    (hours * 10.0).round() / 10.0
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("conflict with reservation: {0}")]
    Conflict(Ulid),
    #[error("maximum duration is {max_hours}h (requested {}h)", round_tenth(*requested_hours))]
    DurationExceeded { requested_hours: f64, max_hours: u32 },
    #[error("not authorized")]
    Unauthorized,
    #[error("cannot {action} a reservation that is {from}")]
    InvalidTransition { from: ReservationStatus, action: Action },
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    /// Message safe to show the end user. Never leaks ids or internals.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::Validation(msg) => msg.clone(),
            EngineError::Conflict(_) => "slot already booked".to_string(),
            EngineError::DurationExceeded { .. } => self.to_string(),
            EngineError::Unauthorized => "not authorized".to_string(),
            EngineError::InvalidTransition { .. } => {
                "only pending reservations can be changed".to_string()
            }
            EngineError::NotFound(_) => "not found".to_string(),
            EngineError::AlreadyExists(_) => "already exists".to_string(),
            EngineError::LimitExceeded(msg) => format!("limit exceeded: {msg}"),
            EngineError::WalError(_) => "internal error, please retry later".to_string(),
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::Conflict(_) => "conflict",
            EngineError::DurationExceeded { .. } => "duration_exceeded",
            EngineError::Unauthorized => "unauthorized",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "wal",
        }
    }
}

impl From<DurationError> for EngineError {
    fn from(err: DurationError) -> Self {
        match err {
            DurationError::InvalidRange => {
                EngineError::Validation("end must be after start".into())
            }
            DurationError::DurationExceeded {
                requested_hours,
                max_hours,
            } => EngineError::DurationExceeded {
                requested_hours,
                max_hours,
            },
        }
    }
}
