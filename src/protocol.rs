//! Newline-delimited JSON messages exchanged with clients.
//!
//! Every request is one JSON object with an `op` field; every response or
//! push is one JSON object with a `type` field.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::availability::{DayGroup, PlanUnavailable};
use crate::engine::EngineError;
use crate::hold::HoldState;
use crate::lock::{Acquired, LockError};
use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Identify {
        holder: String,
    },
    Acquire {
        slot_id: Ulid,
    },
    Release,
    Acknowledge,
    HoldStatus,
    Availability {
        plan: String,
    },
    Subscribe {
        plan: String,
    },
    Unsubscribe,
    CreateSlot {
        slot: SlotDraft,
    },
    CreateSlotForInterviewer {
        interviewer_id: Ulid,
        schedule: SlotSchedule,
    },
    UpdateSlot {
        id: Ulid,
        patch: SlotPatch,
    },
    DeleteSlot {
        id: Ulid,
    },
    GetSlot {
        id: Ulid,
    },
    ListSlots {
        #[serde(default)]
        filter: SlotFilter,
    },
    UpsertInterviewer {
        interviewer: Interviewer,
    },
    GetInterviewer {
        id: Ulid,
    },
    ListInterviewers {
        #[serde(default)]
        active_only: bool,
    },
}

impl Request {
    /// Short label for metrics.
    pub fn op_name(&self) -> &'static str {
        match self {
            Request::Identify { .. } => "identify",
            Request::Acquire { .. } => "acquire",
            Request::Release => "release",
            Request::Acknowledge => "acknowledge",
            Request::HoldStatus => "hold_status",
            Request::Availability { .. } => "availability",
            Request::Subscribe { .. } => "subscribe",
            Request::Unsubscribe => "unsubscribe",
            Request::CreateSlot { .. } => "create_slot",
            Request::CreateSlotForInterviewer { .. } => "create_slot_for_interviewer",
            Request::UpdateSlot { .. } => "update_slot",
            Request::DeleteSlot { .. } => "delete_slot",
            Request::GetSlot { .. } => "get_slot",
            Request::ListSlots { .. } => "list_slots",
            Request::UpsertInterviewer { .. } => "upsert_interviewer",
            Request::GetInterviewer { .. } => "get_interviewer",
            Request::ListInterviewers { .. } => "list_interviewers",
        }
    }
}

/// Where a session's hold stands, as shown to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldView {
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot_id: Option<Ulid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<Ms>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_ms: Option<Ms>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl HoldView {
    pub fn new(state: &HoldState, now: Ms) -> Self {
        let (expires_at, error) = match state {
            HoldState::Held { expires_at, .. } => (Some(*expires_at), None),
            HoldState::Failed { error, .. } => (None, Some(ErrorBody::from(error))),
            _ => (None, None),
        };
        Self {
            state: state.name().to_string(),
            slot_id: state.slot_id(),
            expires_at,
            remaining_ms: expires_at.map(|at| (at - now).max(0)),
            error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Identified {
        holder: String,
    },
    Acquired {
        slot_id: Ulid,
        expires_at: Ms,
        renewed: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        released_prior: Option<Ulid>,
    },
    Released {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        slot_id: Option<Ulid>,
    },
    Hold(HoldView),
    /// Pushed unprompted when a held lock's expiry is reached.
    HoldExpired {
        slot_id: Ulid,
    },
    /// Reply to `availability`, and pushed on every change while subscribed.
    Availability {
        plan: String,
        days: Vec<DayGroup>,
    },
    Subscribed {
        plan: String,
    },
    Unsubscribed,
    SlotCreated {
        id: Ulid,
    },
    Slot {
        slot: Slot,
    },
    Slots {
        slots: Vec<Slot>,
    },
    SlotDeleted {
        id: Ulid,
    },
    InterviewerSaved {
        id: Ulid,
    },
    Interviewer {
        interviewer: Interviewer,
    },
    Interviewers {
        interviewers: Vec<Interviewer>,
    },
    Error(ErrorBody),
}

impl Response {
    pub fn acquired(acquired: &Acquired) -> Self {
        Response::Acquired {
            slot_id: acquired.slot_id,
            expires_at: acquired.expires_at,
            renewed: acquired.renewed,
            released_prior: acquired.released_prior.as_ref().map(|h| h.slot_id()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Held,
    Conflict,
    Unauthenticated,
    PlanUnavailable,
    Storage,
    Protocol,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl ErrorBody {
    pub fn new(kind: ErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
        }
    }
}

impl From<&EngineError> for ErrorBody {
    fn from(e: &EngineError) -> Self {
        let kind = match e {
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::Invalid(_)
            | EngineError::LimitExceeded(_)
            | EngineError::NotBookable(_) => ErrorKind::Validation,
            EngineError::VersionConflict { .. } => ErrorKind::Conflict,
            EngineError::WalError(_) => ErrorKind::Storage,
        };
        ErrorBody::new(kind, e.to_string(), e.is_retryable())
    }
}

impl From<&LockError> for ErrorBody {
    fn from(e: &LockError) -> Self {
        let kind = match e {
            LockError::Unauthenticated => ErrorKind::Unauthenticated,
            LockError::NotFound(_) => ErrorKind::NotFound,
            LockError::NotBookable(_) => ErrorKind::Validation,
            LockError::Held { .. } => ErrorKind::Held,
            LockError::Conflict { .. } => ErrorKind::Conflict,
            LockError::Store(_) => ErrorKind::Storage,
        };
        ErrorBody::new(kind, e.to_string(), e.is_retryable())
    }
}

impl From<&PlanUnavailable> for ErrorBody {
    fn from(e: &PlanUnavailable) -> Self {
        ErrorBody::new(ErrorKind::PlanUnavailable, e.to_string(), false)
    }
}

impl From<&ProtocolError> for ErrorBody {
    fn from(e: &ProtocolError) -> Self {
        ErrorBody::new(ErrorKind::Protocol, e.to_string(), false)
    }
}

macro_rules! error_response {
    ($($err:ty),*) => {
        $(impl From<$err> for Response {
            fn from(e: $err) -> Self {
                Response::Error(ErrorBody::from(&e))
            }
        })*
    };
}

error_response!(EngineError, LockError, PlanUnavailable, ProtocolError);

#[derive(Debug)]
pub enum ProtocolError {
    /// The line was not a request we understand.
    Malformed(String),
    /// The line exceeded the frame limit. The connection is dropped.
    FrameTooLong,
    Io(std::io::Error),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::Malformed(e) => write!(f, "malformed request: {e}"),
            ProtocolError::FrameTooLong => write!(f, "request line too long"),
            ProtocolError::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<std::io::Error> for ProtocolError {
    fn from(e: std::io::Error) -> Self {
        ProtocolError::Io(e)
    }
}

impl From<tokio_util::codec::LinesCodecError> for ProtocolError {
    fn from(e: tokio_util::codec::LinesCodecError) -> Self {
        match e {
            tokio_util::codec::LinesCodecError::MaxLineLengthExceeded => ProtocolError::FrameTooLong,
            tokio_util::codec::LinesCodecError::Io(e) => ProtocolError::Io(e),
        }
    }
}

pub fn decode_request(line: &str) -> Result<Request, ProtocolError> {
    serde_json::from_str(line).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

pub fn encode_response(response: &Response) -> Result<String, ProtocolError> {
    serde_json::to_string(response).map_err(|e| ProtocolError::Malformed(e.to_string()))
}
