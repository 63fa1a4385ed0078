use ulid::Ulid;

use crate::model::Ms;

/// Input rejected before anything is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    MissingPlanTags,
    NonPositiveCapacity,
    EndNotAfterStart { start: Ms, end: Ms },
    StartInPast { start: Ms, now: Ms },
    MissingField(&'static str),
    TooLarge(&'static str),
    OutOfRange(&'static str),
    PhoneTaken(String),
    InterviewerInactive(Ulid),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::MissingPlanTags => write!(f, "at least one plan tag is required"),
            ValidationError::NonPositiveCapacity => write!(f, "capacity must be at least 1"),
            ValidationError::EndNotAfterStart { start, end } => {
                write!(f, "end {end} must be after start {start}")
            }
            ValidationError::StartInPast { start, now } => {
                write!(f, "start {start} is not in the future (now {now})")
            }
            ValidationError::MissingField(field) => write!(f, "missing field: {field}"),
            ValidationError::TooLarge(what) => write!(f, "too large: {what}"),
            ValidationError::OutOfRange(what) => write!(f, "out of range: {what}"),
            ValidationError::PhoneTaken(phone) => {
                write!(f, "phone {phone} already belongs to another interviewer")
            }
            ValidationError::InterviewerInactive(id) => write!(f, "interviewer {id} is inactive"),
        }
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    Invalid(ValidationError),
    LimitExceeded(&'static str),
    /// Lock writes are only accepted on published slots that have not started.
    NotBookable(Ulid),
    /// Another writer committed to the lock record after it was read.
    VersionConflict {
        slot_id: Ulid,
        expected: u64,
        actual: u64,
    },
    WalError(String),
}

impl EngineError {
    /// Worth repeating the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::VersionConflict { .. } | EngineError::WalError(_))
    }
}

impl From<ValidationError> for EngineError {
    fn from(e: ValidationError) -> Self {
        EngineError::Invalid(e)
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::Invalid(e) => write!(f, "invalid input: {e}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::NotBookable(id) => write!(f, "slot {id} is not open for booking"),
            EngineError::VersionConflict {
                slot_id,
                expected,
                actual,
            } => write!(
                f,
                "lock on slot {slot_id} changed concurrently (expected version {expected}, found {actual})"
            ),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
