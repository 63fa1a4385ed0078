//! Per-session hold state machine.
//!
//! ```text
//! Idle ──request──▶ Reserving ──ok──▶ Held ──expiry──▶ Expired
//!                       │               ├──release──▶ Released
//!                       └──err──▶ Failed └──request(other)──▶ Reserving
//! ```
//!
//! Terminal states collapse back to `Idle` on `acknowledge` or on the next
//! `request`. Nothing here is persisted.

use tracing::debug;
use ulid::Ulid;

use crate::lock::{Acquired, LockError, LockManager, ReleaseHandle};
use crate::model::Ms;
use crate::observability::HOLDS_EXPIRED_TOTAL;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HoldState {
    Idle,
    Reserving { slot_id: Ulid },
    Held { slot_id: Ulid, expires_at: Ms },
    Released { slot_id: Ulid },
    Expired { slot_id: Ulid },
    Failed { slot_id: Ulid, error: LockError },
}

impl HoldState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HoldState::Released { .. } | HoldState::Expired { .. } | HoldState::Failed { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            HoldState::Idle => "idle",
            HoldState::Reserving { .. } => "reserving",
            HoldState::Held { .. } => "held",
            HoldState::Released { .. } => "released",
            HoldState::Expired { .. } => "expired",
            HoldState::Failed { .. } => "failed",
        }
    }

    pub fn slot_id(&self) -> Option<Ulid> {
        match self {
            HoldState::Idle => None,
            HoldState::Reserving { slot_id }
            | HoldState::Held { slot_id, .. }
            | HoldState::Released { slot_id }
            | HoldState::Expired { slot_id }
            | HoldState::Failed { slot_id, .. } => Some(*slot_id),
        }
    }
}

/// One bookee's hold. Owns at most one slot lock at a time.
pub struct HoldSession {
    manager: LockManager,
    holder: Option<String>,
    state: HoldState,
    /// Record version behind `Held`; releases are pinned to it.
    lock_version: u64,
}

impl HoldSession {
    pub fn new(manager: LockManager) -> Self {
        Self {
            manager,
            holder: None,
            state: HoldState::Idle,
            lock_version: 0,
        }
    }

    pub fn holder(&self) -> Option<&str> {
        self.holder.as_deref()
    }

    pub fn state(&self) -> &HoldState {
        &self.state
    }

    /// Set who is browsing. A hold taken under a previous identity is let go.
    pub fn identify(&mut self, holder: impl Into<String>) -> Option<ReleaseHandle> {
        let holder = holder.into();
        if self.holder.as_deref() == Some(holder.as_str()) {
            return None;
        }
        let released = self.release();
        self.holder = Some(holder);
        self.state = HoldState::Idle;
        released
    }

    /// Reserve `slot_id`, replacing any hold on another slot.
    ///
    /// On failure the session ends in `Failed` and the previous hold, if it
    /// was on a different slot, is released anyway: the bookee has moved on.
    pub async fn request(&mut self, slot_id: Ulid) -> Result<Acquired, LockError> {
        let prior = match self.state {
            HoldState::Held { slot_id: prior, .. } if prior != slot_id => {
                Some((prior, self.lock_version))
            }
            _ => None,
        };
        self.state = HoldState::Reserving { slot_id };

        let result = match self.holder.as_deref() {
            Some(holder) => self.manager.acquire(slot_id, holder).await,
            None => Err(LockError::Unauthenticated),
        };
        match result {
            Ok(acquired) => {
                self.lock_version = acquired.version;
                self.state = HoldState::Held {
                    slot_id,
                    expires_at: acquired.expires_at,
                };
                Ok(acquired)
            }
            Err(error) => {
                if let (Some((prior, version)), Some(holder)) = (prior, self.holder.as_deref()) {
                    // Detached; the handle is not needed.
                    let _ = self.manager.release_detached(prior, holder, version);
                }
                debug!("hold on slot {slot_id} failed: {error}");
                self.state = HoldState::Failed {
                    slot_id,
                    error: error.clone(),
                };
                Err(error)
            }
        }
    }

    /// When the current hold lapses, if there is one.
    pub fn deadline(&self) -> Option<Ms> {
        match self.state {
            HoldState::Held { expires_at, .. } => Some(expires_at),
            _ => None,
        }
    }

    /// Milliseconds left on the hold at `now`, floored at zero.
    pub fn remaining(&self, now: Ms) -> Option<Ms> {
        self.deadline().map(|at| (at - now).max(0))
    }

    /// Countdown step. Moves `Held` to `Expired` once `now` reaches the expiry
    /// and releases the lock in the background. Returns whether it expired.
    pub fn tick(&mut self, now: Ms) -> bool {
        let HoldState::Held {
            slot_id,
            expires_at,
        } = self.state
        else {
            return false;
        };
        if expires_at > now {
            return false;
        }
        metrics::counter!(HOLDS_EXPIRED_TOTAL).increment(1);
        if let Some(holder) = self.holder.as_deref() {
            // Usually already overwritable; the release just tidies up.
            let _ = self
                .manager
                .release_detached(slot_id, holder, self.lock_version);
        }
        self.state = HoldState::Expired { slot_id };
        true
    }

    /// Give up the current hold. No-op unless `Held`.
    pub fn release(&mut self) -> Option<ReleaseHandle> {
        let HoldState::Held { slot_id, .. } = self.state else {
            return None;
        };
        let holder = self.holder.as_deref()?;
        let handle = self
            .manager
            .release_detached(slot_id, holder, self.lock_version);
        self.state = HoldState::Released { slot_id };
        Some(handle)
    }

    /// Clear a terminal state. Returns whether anything changed.
    pub fn acknowledge(&mut self) -> bool {
        if self.state.is_terminal() {
            self.state = HoldState::Idle;
            true
        } else {
            false
        }
    }
}

impl Drop for HoldSession {
    fn drop(&mut self) {
        // Spawning needs a runtime; without one the lock lapses at its expiry.
        if tokio::runtime::Handle::try_current().is_ok() {
            let _ = self.release();
        }
    }
}
