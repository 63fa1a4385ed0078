use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::validate::validate_draft;
use super::{Engine, EngineError, WalCommand};

/// Seats left after a capacity edit when prior consumption is carried over.
pub(super) fn carried_seats(old_capacity: u32, old_seats: u32, new_capacity: u32) -> u32 {
    let consumed = old_capacity.saturating_sub(old_seats);
    new_capacity.saturating_sub(consumed)
}

impl Engine {
    /// Create a slot. `seats_available` starts equal to `capacity`.
    pub async fn create_slot(&self, draft: SlotDraft) -> Result<Ulid, EngineError> {
        if self.slots.len() >= MAX_SLOTS {
            return Err(EngineError::LimitExceeded("too many slots"));
        }
        let now = self.now_ms();
        let plan_tags = validate_draft(&draft, now)?;

        let slot = Slot {
            id: Ulid::new(),
            interviewer_id: draft.interviewer_id,
            interviewer_name: draft.interviewer_name,
            interviewer_email: draft.interviewer_email,
            interviewer_phone: draft.interviewer_phone,
            details: draft.details,
            start: draft.start,
            end: draft.end,
            plan_tags,
            capacity: draft.capacity,
            seats_available: draft.capacity,
            status: draft.status,
            created_at: now,
            updated_at: now,
        };
        let id = slot.id;

        let event = Event::SlotCreated { slot: slot.clone() };
        self.wal_append(&event).await?;
        self.slots.insert(id, Arc::new(RwLock::new(SlotState::new(slot))));
        self.notify.send(&event);
        tracing::debug!("slot {id} created");
        Ok(id)
    }

    /// Apply `patch` and re-validate the result.
    ///
    /// With `legacy_reset_seats_on_update` (the default) the slot's seats are
    /// reset to the new capacity regardless of prior consumption.
    pub async fn update_slot(&self, id: Ulid, patch: SlotPatch) -> Result<Slot, EngineError> {
        let rs = self.get_slot_state(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;
        if !self.is_current(&id, &rs) {
            return Err(EngineError::NotFound(id));
        }

        let now = self.now_ms();
        let current = &guard.slot;
        let draft = patch.apply_to(current);
        let plan_tags = validate_draft(&draft, now)?;

        let seats_available = if self.options.legacy_reset_seats_on_update {
            draft.capacity
        } else {
            carried_seats(current.capacity, current.seats_available, draft.capacity)
        };

        let slot = Slot {
            id,
            interviewer_id: draft.interviewer_id,
            interviewer_name: draft.interviewer_name,
            interviewer_email: draft.interviewer_email,
            interviewer_phone: draft.interviewer_phone,
            details: draft.details,
            start: draft.start,
            end: draft.end,
            plan_tags,
            capacity: draft.capacity,
            seats_available,
            status: draft.status,
            created_at: current.created_at,
            updated_at: now,
        };

        let event = Event::SlotUpdated { slot: slot.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::debug!("slot {id} updated");
        Ok(slot)
    }

    /// Remove a slot together with its lock record, live or not.
    pub async fn delete_slot(&self, id: Ulid) -> Result<(), EngineError> {
        let rs = self.get_slot_state(&id).ok_or(EngineError::NotFound(id))?;
        // Wait out any in-flight lock transaction on this slot.
        let guard = rs.write().await;
        if !self.is_current(&id, &rs) {
            return Err(EngineError::NotFound(id));
        }
        let had_lock = guard.lock.is_some();

        let event = Event::SlotDeleted { id };
        self.wal_append(&event).await?;
        self.slots.remove(&id);
        drop(guard);
        self.notify.send(&event);
        tracing::debug!("slot {id} deleted (lock dropped: {had_lock})");
        Ok(())
    }

    /// Write (or clear, with `None`) the lock record iff nobody else has
    /// written it since `expected_version` was read. Returns the new version.
    /// Writes are refused on draft slots and on slots that have started;
    /// clears always go through.
    pub async fn compare_and_set_lock(
        &self,
        slot_id: Ulid,
        expected_version: u64,
        next: Option<LockRecord>,
    ) -> Result<u64, EngineError> {
        let rs = self
            .get_slot_state(&slot_id)
            .ok_or(EngineError::NotFound(slot_id))?;
        let mut guard = rs.write().await;
        if !self.is_current(&slot_id, &rs) {
            return Err(EngineError::NotFound(slot_id));
        }
        if guard.lock_version != expected_version {
            return Err(EngineError::VersionConflict {
                slot_id,
                expected: expected_version,
                actual: guard.lock_version,
            });
        }
        if next.is_some() && !guard.slot.is_open_at(self.now_ms()) {
            return Err(EngineError::NotBookable(slot_id));
        }

        let event = match next {
            Some(lock) => Event::LockWritten { slot_id, lock },
            None => Event::LockCleared { slot_id },
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(guard.lock_version)
    }

    /// Lock records that are no longer live at `now`, with the version they
    /// were observed at. Slots busy in a transaction are skipped this round.
    pub fn collect_expired_locks(&self, now: Ms) -> Vec<(Ulid, u64)> {
        let mut expired = Vec::new();
        for entry in self.slots.iter() {
            if let Ok(guard) = entry.value().try_read()
                && guard.lock.as_ref().is_some_and(|l| !l.is_live(now))
            {
                expired.push((*entry.key(), guard.lock_version));
            }
        }
        expired
    }

    /// Rewrite the journal with only the events needed to recreate current
    /// state. Expired lock records are inert and left out.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::BeginCompact { response: tx })
            .await
            .map_err(|_| EngineError::WalError("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("journal writer dropped response".into()))?;

        let now = self.now_ms();
        let mut events: Vec<Event> = self
            .interviewers
            .iter()
            .map(|e| Event::InterviewerUpserted {
                interviewer: e.value().clone(),
            })
            .collect();

        let states: Vec<_> = self.slots.iter().map(|e| e.value().clone()).collect();
        for rs in states {
            let guard = rs.read().await;
            events.push(Event::SlotCreated {
                slot: guard.slot.clone(),
            });
            if let Some(lock) = guard.lock.as_ref().filter(|l| l.is_live(now)) {
                events.push(Event::LockWritten {
                    slot_id: guard.slot.id,
                    lock: lock.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("journal writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
