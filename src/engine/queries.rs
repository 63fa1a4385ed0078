use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub async fn get_slot(&self, id: Ulid) -> Result<Slot, EngineError> {
        let rs = self.get_slot_state(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        Ok(guard.slot.clone())
    }

    /// Slots matching `filter`, ordered by start ascending (ties by id).
    pub async fn list_slots(&self, filter: &SlotFilter) -> Vec<Slot> {
        let states: Vec<_> = self.slots.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for rs in states {
            let guard = rs.read().await;
            if filter.matches(&guard.slot) {
                out.push(guard.slot.clone());
            }
        }
        out.sort_by_key(|s| (s.start, s.id));
        out
    }

    /// Read the lock record of a slot together with its compare-and-set version.
    pub async fn read_lock(&self, slot_id: Ulid) -> Result<LockSnapshot, EngineError> {
        let rs = self
            .get_slot_state(&slot_id)
            .ok_or(EngineError::NotFound(slot_id))?;
        let guard = rs.read().await;
        Ok(guard.snapshot())
    }

    /// The lock record only if it is live right now.
    pub async fn live_lock(&self, slot_id: Ulid) -> Result<Option<LockRecord>, EngineError> {
        let now = self.now_ms();
        Ok(self
            .read_lock(slot_id)
            .await?
            .lock
            .filter(|l| l.is_live(now)))
    }
}
