use crate::model::Ms;

pub const MAX_SLOTS: usize = 100_000;
pub const MAX_INTERVIEWERS: usize = 10_000;
pub const MAX_PLAN_TAGS: usize = 16;
pub const MAX_PLAN_TAG_LEN: usize = 64;
pub const MAX_DETAILS_LEN: usize = 4_096;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_HOLDER_LEN: usize = 128;
pub const MAX_CAPACITY: u32 = 10_000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;
/// A single interview window never spans more than a day.
pub const MAX_SLOT_DURATION_MS: Ms = 86_400_000;

/// Default hold window before payment.
pub const DEFAULT_LOCK_TTL_MS: Ms = 10 * 60_000;
pub const DEFAULT_ACQUIRE_ATTEMPTS: u32 = 3;
pub const MAX_ACQUIRE_ATTEMPTS: u32 = 10;

/// Longest accepted protocol line.
pub const MAX_FRAME_LEN: usize = 64 * 1024;
