use crate::model::Ms;

pub const MIN_TITLE_LEN: usize = 5;
pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 2_000;
pub const MIN_REJECTION_REASON_LEN: usize = 10;
pub const MIN_NAME_LEN: usize = 3;
pub const MAX_NAME_LEN: usize = 256;

pub const MAX_COMMISSIONS: usize = 1_000;
pub const MAX_LOCATIONS: usize = 10_000;
pub const MAX_MEMBERS_PER_COMMISSION: usize = 500;
pub const MAX_RESERVATIONS_PER_LOCATION: usize = 100_000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
/// One reservation never covers more than 366 days, capped or not.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * 24 * 3_600_000;

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 100;

pub const DEFAULT_COMMISSION_COLOR: &str = "#3b82f6";
