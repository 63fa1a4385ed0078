use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

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

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    #[default]
    Draft,
    Published,
}

/// A bookable interview window.
///
/// Interviewer fields are a snapshot taken when the slot was written; later
/// edits to the interviewer record do not flow into existing slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub id: Ulid,
    pub interviewer_id: Ulid,
    pub interviewer_name: String,
    pub interviewer_email: String,
    pub interviewer_phone: String,
    pub details: String,
    pub start: Ms,
    pub end: Ms,
    pub plan_tags: Vec<String>,
    pub capacity: u32,
    pub seats_available: u32,
    pub status: SlotStatus,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Slot {
    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }

    pub fn serves(&self, plan: &str) -> bool {
        self.plan_tags.iter().any(|t| t == plan)
    }

    /// Published and not yet started: the only slots a hold may be taken on.
    pub fn is_open_at(&self, now: Ms) -> bool {
        self.status == SlotStatus::Published && self.start > now
    }

    /// Visible to a bookee browsing `plan` with the visibility cut-off `since`.
    pub fn is_bookable(&self, plan: &str, since: Ms) -> bool {
        self.status == SlotStatus::Published && self.serves(plan) && self.start >= since
    }
}

/// Input for creating a slot. `seats_available` is never supplied; it is
/// derived from `capacity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotDraft {
    pub interviewer_id: Ulid,
    pub interviewer_name: String,
    #[serde(default)]
    pub interviewer_email: String,
    #[serde(default)]
    pub interviewer_phone: String,
    #[serde(default)]
    pub details: String,
    pub start: Ms,
    pub end: Ms,
    pub plan_tags: Vec<String>,
    pub capacity: u32,
    #[serde(default)]
    pub status: SlotStatus,
}

/// Partial edit of a slot. Absent fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SlotPatch {
    pub interviewer_id: Option<Ulid>,
    pub interviewer_name: Option<String>,
    pub interviewer_email: Option<String>,
    pub interviewer_phone: Option<String>,
    pub details: Option<String>,
    pub start: Option<Ms>,
    pub end: Option<Ms>,
    pub plan_tags: Option<Vec<String>>,
    pub capacity: Option<u32>,
    pub status: Option<SlotStatus>,
}

impl SlotPatch {
    /// Overlay the patch onto `current`, producing the draft to validate.
    pub fn apply_to(&self, current: &Slot) -> SlotDraft {
        SlotDraft {
            interviewer_id: self.interviewer_id.unwrap_or(current.interviewer_id),
            interviewer_name: self
                .interviewer_name
                .clone()
                .unwrap_or_else(|| current.interviewer_name.clone()),
            interviewer_email: self
                .interviewer_email
                .clone()
                .unwrap_or_else(|| current.interviewer_email.clone()),
            interviewer_phone: self
                .interviewer_phone
                .clone()
                .unwrap_or_else(|| current.interviewer_phone.clone()),
            details: self.details.clone().unwrap_or_else(|| current.details.clone()),
            start: self.start.unwrap_or(current.start),
            end: self.end.unwrap_or(current.end),
            plan_tags: self
                .plan_tags
                .clone()
                .unwrap_or_else(|| current.plan_tags.clone()),
            capacity: self.capacity.unwrap_or(current.capacity),
            status: self.status.unwrap_or(current.status),
        }
    }
}

/// Schedule half of a slot created from an interviewer record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotSchedule {
    pub start: Ms,
    pub end: Ms,
    pub capacity: u32,
    #[serde(default)]
    pub status: SlotStatus,
    #[serde(default)]
    pub details: String,
    /// Overrides the tags derived from the interviewer's company types.
    #[serde(default)]
    pub plan_tags: Option<Vec<String>>,
}

/// The singleton hold record stored under a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    pub holder: String,
    pub expires_at: Ms,
}

impl LockRecord {
    /// Strict comparison: a lock expiring exactly at `now` is already dead.
    pub fn is_live(&self, now: Ms) -> bool {
        self.expires_at > now
    }
}

/// A lock read together with the version a subsequent compare-and-set must match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockSnapshot {
    pub lock: Option<LockRecord>,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interviewer {
    pub id: Ulid,
    pub name: String,
    pub email: String,
    pub phone: String,
    #[serde(default)]
    pub qualification: String,
    #[serde(default)]
    pub company_types: Vec<String>,
    #[serde(default)]
    pub reviewed_by: String,
    #[serde(default = "active_by_default")]
    pub active: bool,
}

fn active_by_default() -> bool {
    true
}

#[derive(Debug, Clone)]
pub struct SlotState {
    pub slot: Slot,
    pub lock: Option<LockRecord>,
    /// Bumped on every lock write; the compare-and-set token.
    pub lock_version: u64,
}

impl SlotState {
    pub fn new(slot: Slot) -> Self {
        Self {
            slot,
            lock: None,
            lock_version: 0,
        }
    }

    pub fn snapshot(&self) -> LockSnapshot {
        LockSnapshot {
            lock: self.lock.clone(),
            version: self.lock_version,
        }
    }
}

/// Store-side filter; results are always ordered by `start` ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SlotFilter {
    pub status: Option<SlotStatus>,
    pub plan: Option<String>,
    pub starts_at_or_after: Option<Ms>,
}

impl SlotFilter {
    /// The availability predicate for `plan` as of `since`.
    pub fn bookable(plan: impl Into<String>, since: Ms) -> Self {
        Self {
            status: Some(SlotStatus::Published),
            plan: Some(plan.into()),
            starts_at_or_after: Some(since),
        }
    }

    pub fn matches(&self, slot: &Slot) -> bool {
        self.status.is_none_or(|s| slot.status == s)
            && self.plan.as_deref().is_none_or(|p| slot.serves(p))
            && self.starts_at_or_after.is_none_or(|t| slot.start >= t)
    }
}

/// Journal record format. Flat, one variant per mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SlotCreated { slot: Slot },
    SlotUpdated { slot: Slot },
    SlotDeleted { id: Ulid },
    LockWritten { slot_id: Ulid, lock: LockRecord },
    LockCleared { slot_id: Ulid },
    InterviewerUpserted { interviewer: Interviewer },
}

impl Event {
    /// Slot the event belongs to, if any.
    pub fn slot_id(&self) -> Option<Ulid> {
        match self {
            Event::SlotCreated { slot } | Event::SlotUpdated { slot } => Some(slot.id),
            Event::SlotDeleted { id } => Some(*id),
            Event::LockWritten { slot_id, .. } | Event::LockCleared { slot_id } => Some(*slot_id),
            Event::InterviewerUpserted { .. } => None,
        }
    }

    /// Whether the event can change what the slot catalog looks like.
    /// Lock churn does not.
    pub fn touches_catalog(&self) -> bool {
        matches!(
            self,
            Event::SlotCreated { .. } | Event::SlotUpdated { .. } | Event::SlotDeleted { .. }
        )
    }
}
