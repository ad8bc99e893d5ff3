use crate::model::Ms;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// A single session never exceeds one local day.
pub const MAX_SESSION_DURATION_MS: Ms = DAY_MS;
/// Manual unavailability blocks may cover long absences.
pub const MAX_BLOCK_DURATION_MS: Ms = 366 * DAY_MS;

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 128;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_REASON_LEN: usize = 1024;
pub const MAX_WINDOWS_PER_INSTRUCTOR: usize = 512;
pub const MAX_INTERVALS_PER_RESOURCE: usize = 100_000;
pub const MAX_LOTS_PER_STUDENT: usize = 10_000;
pub const MAX_SERIES_OCCURRENCES: usize = 366;
pub const MAX_SEARCH_INSTRUCTORS: usize = 500;

/// Slot search looks this far ahead of "now".
pub const SCHEDULING_HORIZON_DAYS: i64 = 14;
pub const PREFERENCE_STEP_MINUTES: u32 = 30;
pub const OPEN_STEP_MINUTES: u32 = 15;
/// Longest lesson a slot search will look for.
pub const MAX_SLOT_DURATION_MINUTES: u32 = 24 * 60;
pub const CLOSE_MATCH_MAX_PROXIMITY: u32 = 60;
pub const MAX_PROXIMITY: u32 = 120;

pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_COMPACT_THRESHOLD: u64 = 1_000;
