use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::validate::{normalize_plan_tags, validate_interviewer};
use super::{Engine, EngineError, ValidationError};

/// Plan tags an interviewer can serve, derived from the company types they
/// have worked at. Company type names are plan tags.
pub fn plan_tags_for_company_types(company_types: &[String]) -> Vec<String> {
    normalize_plan_tags(company_types)
}

impl Engine {
    /// Insert or replace an interviewer record. Phone numbers are unique.
    pub async fn upsert_interviewer(&self, interviewer: Interviewer) -> Result<(), EngineError> {
        validate_interviewer(&interviewer)?;
        if !self.interviewers.contains_key(&interviewer.id)
            && self.interviewers.len() >= MAX_INTERVIEWERS
        {
            return Err(EngineError::LimitExceeded("too many interviewers"));
        }
        let phone = interviewer.phone.trim();
        if self
            .interviewers
            .iter()
            .any(|e| e.key() != &interviewer.id && e.value().phone.trim() == phone)
        {
            return Err(ValidationError::PhoneTaken(phone.to_string()).into());
        }

        let event = Event::InterviewerUpserted {
            interviewer: interviewer.clone(),
        };
        self.wal_append(&event).await?;
        self.interviewers.insert(interviewer.id, interviewer);
        self.notify.send(&event);
        Ok(())
    }

    pub fn get_interviewer(&self, id: Ulid) -> Result<Interviewer, EngineError> {
        self.interviewers
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(id))
    }

    /// All interviewers ordered by name, optionally only active ones.
    pub fn list_interviewers(&self, active_only: bool) -> Vec<Interviewer> {
        let mut out: Vec<Interviewer> = self
            .interviewers
            .iter()
            .filter(|e| !active_only || e.value().active)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        out
    }

    /// Create a slot for an interviewer, snapshotting their contact fields.
    /// Plan tags come from the schedule if given, otherwise from the
    /// interviewer's company types.
    pub async fn create_slot_for_interviewer(
        &self,
        interviewer_id: Ulid,
        schedule: SlotSchedule,
    ) -> Result<Ulid, EngineError> {
        let interviewer = self.get_interviewer(interviewer_id)?;
        if !interviewer.active {
            return Err(ValidationError::InterviewerInactive(interviewer_id).into());
        }
        let plan_tags = schedule
            .plan_tags
            .unwrap_or_else(|| plan_tags_for_company_types(&interviewer.company_types));

        self.create_slot(SlotDraft {
            interviewer_id,
            interviewer_name: interviewer.name,
            interviewer_email: interviewer.email,
            interviewer_phone: interviewer.phone,
            details: schedule.details,
            start: schedule.start,
            end: schedule.end,
            plan_tags,
            capacity: schedule.capacity,
            status: schedule.status,
        })
        .await
    }
}
