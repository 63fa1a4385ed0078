use crate::limits::*;
use crate::model::*;

use super::ValidationError;

/// Trim, lowercase, drop blanks and duplicates. Order of first appearance is kept.
pub fn normalize_plan_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

/// A holder id is the bookee's session/user id. Empty means nobody is signed in.
pub fn validate_holder(holder: &str) -> Result<(), ValidationError> {
    if holder.trim().is_empty() {
        return Err(ValidationError::MissingField("holder"));
    }
    if holder.len() > MAX_HOLDER_LEN {
        return Err(ValidationError::TooLarge("holder id"));
    }
    Ok(())
}

fn validate_times(start: Ms, end: Ms, now: Ms) -> Result<(), ValidationError> {
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(ValidationError::OutOfRange("timestamp"));
    }
    if end <= start {
        return Err(ValidationError::EndNotAfterStart { start, end });
    }
    if Span::new(start, end).duration_ms() > MAX_SLOT_DURATION_MS {
        return Err(ValidationError::TooLarge("slot duration"));
    }
    if start <= now {
        return Err(ValidationError::StartInPast { start, now });
    }
    Ok(())
}

/// Check a create/update draft against the store clock and return its
/// normalized plan tags.
pub(super) fn validate_draft(draft: &SlotDraft, now: Ms) -> Result<Vec<String>, ValidationError> {
    if draft.capacity < 1 {
        return Err(ValidationError::NonPositiveCapacity);
    }
    if draft.capacity > MAX_CAPACITY {
        return Err(ValidationError::TooLarge("capacity"));
    }
    if draft.plan_tags.len() > MAX_PLAN_TAGS {
        return Err(ValidationError::TooLarge("plan tags"));
    }
    if draft.plan_tags.iter().any(|t| t.len() > MAX_PLAN_TAG_LEN) {
        return Err(ValidationError::TooLarge("plan tag"));
    }
    let tags = normalize_plan_tags(&draft.plan_tags);
    if tags.is_empty() {
        return Err(ValidationError::MissingPlanTags);
    }
    if draft.interviewer_name.trim().is_empty() {
        return Err(ValidationError::MissingField("interviewerName"));
    }
    if draft.interviewer_name.len() > MAX_NAME_LEN
        || draft.interviewer_email.len() > MAX_NAME_LEN
        || draft.interviewer_phone.len() > MAX_NAME_LEN
    {
        return Err(ValidationError::TooLarge("interviewer field"));
    }
    if draft.details.len() > MAX_DETAILS_LEN {
        return Err(ValidationError::TooLarge("details"));
    }
    validate_times(draft.start, draft.end, now)?;
    Ok(tags)
}

pub(super) fn validate_interviewer(interviewer: &Interviewer) -> Result<(), ValidationError> {
    if interviewer.name.trim().is_empty() {
        return Err(ValidationError::MissingField("name"));
    }
    if interviewer.phone.trim().is_empty() {
        return Err(ValidationError::MissingField("phone"));
    }
    if [
        &interviewer.name,
        &interviewer.email,
        &interviewer.phone,
        &interviewer.qualification,
        &interviewer.reviewed_by,
    ]
    .iter()
    .any(|f| f.len() > MAX_NAME_LEN)
    {
        return Err(ValidationError::TooLarge("interviewer field"));
    }
    if interviewer.company_types.len() > MAX_PLAN_TAGS {
        return Err(ValidationError::TooLarge("company types"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    const NOW: Ms = 1_800_000_000_000;
    const H: Ms = 3_600_000;

    fn draft() -> SlotDraft {
        SlotDraft {
            interviewer_id: Ulid::new(),
            interviewer_name: "Meera".into(),
            interviewer_email: "meera@example.com".into(),
            interviewer_phone: "+15550102".into(),
            details: String::new(),
            start: NOW + H,
            end: NOW + 2 * H,
            plan_tags: vec!["maang".into()],
            capacity: 1,
            status: SlotStatus::Published,
        }
    }

    #[test]
    fn accepts_well_formed_draft() {
        assert_eq!(validate_draft(&draft(), NOW), Ok(vec!["maang".to_string()]));
    }

    #[test]
    fn rejects_zero_capacity() {
        let d = SlotDraft { capacity: 0, ..draft() };
        assert_eq!(validate_draft(&d, NOW), Err(ValidationError::NonPositiveCapacity));
    }

    #[test]
    fn rejects_blank_plan_tags() {
        let d = SlotDraft {
            plan_tags: vec!["  ".into()],
            ..draft()
        };
        assert_eq!(validate_draft(&d, NOW), Err(ValidationError::MissingPlanTags));
    }

    #[test]
    fn rejects_end_not_after_start() {
        let d = SlotDraft {
            end: NOW + H,
            ..draft()
        };
        assert!(matches!(
            validate_draft(&d, NOW),
            Err(ValidationError::EndNotAfterStart { .. })
        ));
    }

    #[test]
    fn rejects_start_in_past() {
        let d = SlotDraft {
            start: NOW - H,
            end: NOW + H,
            ..draft()
        };
        assert!(matches!(
            validate_draft(&d, NOW),
            Err(ValidationError::StartInPast { .. })
        ));
    }

    #[test]
    fn rejects_overlong_slot() {
        let d = SlotDraft {
            end: NOW + 30 * H,
            ..draft()
        };
        assert_eq!(
            validate_draft(&d, NOW),
            Err(ValidationError::TooLarge("slot duration"))
        );
    }

    #[test]
    fn tags_are_normalized() {
        let tags = vec![" MAANG".to_string(), "maang".into(), "".into(), "Product".into()];
        assert_eq!(normalize_plan_tags(&tags), vec!["maang", "product"]);
    }

    #[test]
    fn holder_must_be_present() {
        assert!(validate_holder("user-1").is_ok());
        assert_eq!(validate_holder("  "), Err(ValidationError::MissingField("holder")));
        assert!(validate_holder(&"x".repeat(MAX_HOLDER_LEN + 1)).is_err());
    }
}
