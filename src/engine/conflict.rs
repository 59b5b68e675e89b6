use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::error::DurationError;
use super::EngineError;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or_default()
}

/// True iff a slot-holding reservation of `location_id` in `existing`
/// intersects `proposed` under half-open semantics.
pub fn has_conflict(existing: &[Reservation], location_id: Ulid, proposed: &Span) -> bool {
    find_conflict(existing, location_id, proposed).is_some()
}

/// First conflicting reservation, in slice order.
pub fn find_conflict(existing: &[Reservation], location_id: Ulid, proposed: &Span) -> Option<Ulid> {
    existing
        .iter()
        .find(|r| r.location_id == location_id && r.holds_slot() && r.span.overlaps(proposed))
        .map(|r| r.id)
}

/// Same check against a location's sorted timeline.
pub(crate) fn check_no_conflict(ls: &LocationState, span: &Span) -> Result<(), EngineError> {
    match ls.overlapping(span).find(|r| r.holds_slot()) {
        Some(r) => Err(EngineError::Conflict(r.id)),
        None => Ok(()),
    }
}

/// Chronological order plus the location's optional length cap.
pub fn validate_duration(start: Ms, end: Ms, max_duration_hours: Option<u32>) -> Result<(), DurationError> {
    if end <= start {
        return Err(DurationError::InvalidRange);
    }
    if let Some(max_hours) = max_duration_hours {
        let requested_hours = (end - start) as f64 / HOUR_MS as f64;
        if requested_hours > max_hours as f64 {
            return Err(DurationError::DurationExceeded {
                requested_hours,
                max_hours,
            });
        }
    }
    Ok(())
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

/// Reservation request as submitted by a student.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub location_id: Ulid,
    pub title: String,
    pub description: Option<String>,
    pub start: Ms,
    pub end: Ms,
}

/// Field-level checks. Returns the normalized (trimmed, empty → None) request.
pub fn validate_request(req: &NewReservation) -> Result<NewReservation, EngineError> {
    let title = req.title.trim();
    let title_len = title.chars().count();
    if title_len < MIN_TITLE_LEN {
        return Err(EngineError::validation(format!(
            "title needs at least {MIN_TITLE_LEN} characters"
        )));
    }
    if title_len > MAX_TITLE_LEN {
        return Err(EngineError::LimitExceeded("title too long"));
    }
    let description = req
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty());
    if let Some(d) = description
        && d.chars().count() > MAX_DESCRIPTION_LEN
    {
        return Err(EngineError::LimitExceeded("description too long"));
    }
    if req.end <= req.start {
        return Err(EngineError::validation("end must be after start"));
    }
    Ok(NewReservation {
        location_id: req.location_id,
        title: title.to_string(),
        description: description.map(str::to_string),
        start: req.start,
        end: req.end,
    })
}

pub(crate) fn validate_name(name: &str, what: &'static str) -> Result<String, EngineError> {
    let trimmed = name.trim();
    let len = trimmed.chars().count();
    if len < MIN_NAME_LEN {
        return Err(EngineError::validation(format!(
            "{what} needs at least {MIN_NAME_LEN} characters"
        )));
    }
    if len > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(trimmed.to_string())
}

/// `#RRGGBB`, case-insensitive.
pub(crate) fn validate_color(color: &str) -> Result<String, EngineError> {
    let valid = color.len() == 7
        && color.starts_with('#')
        && color[1..].chars().all(|c| c.is_ascii_hexdigit());
    if !valid {
        return Err(EngineError::validation("invalid color"));
    }
    Ok(color.to_string())
}
