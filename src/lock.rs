//! Time-boxed exclusive holds on slots.
//!
//! A hold is the lock record stored under a slot. Acquisition is an
//! optimistic transaction over that single record: read it with its version,
//! decide, then compare-and-set. If another writer committed in between, the
//! transaction is re-run from the read.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::engine::{validate_holder, Engine, EngineError};
use crate::limits::*;
use crate::model::*;
use crate::observability::{
    LOCK_ACQUIRE_DURATION_SECONDS, LOCK_ACQUIRE_TOTAL, LOCK_RELEASE_TOTAL, LOCK_TXN_RETRIES_TOTAL,
};

/// Storage seam for lock transactions. The store's clock is authoritative.
#[async_trait]
pub trait LockStore: Send + Sync {
    fn now_ms(&self) -> Ms;

    async fn read_lock(&self, slot_id: Ulid) -> Result<LockSnapshot, EngineError>;

    async fn compare_and_set_lock(
        &self,
        slot_id: Ulid,
        expected_version: u64,
        next: Option<LockRecord>,
    ) -> Result<u64, EngineError>;
}

#[async_trait]
impl LockStore for Engine {
    fn now_ms(&self) -> Ms {
        Engine::now_ms(self)
    }

    async fn read_lock(&self, slot_id: Ulid) -> Result<LockSnapshot, EngineError> {
        Engine::read_lock(self, slot_id).await
    }

    async fn compare_and_set_lock(
        &self,
        slot_id: Ulid,
        expected_version: u64,
        next: Option<LockRecord>,
    ) -> Result<u64, EngineError> {
        Engine::compare_and_set_lock(self, slot_id, expected_version, next).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// No holder identity was supplied. Nothing was read or written.
    Unauthenticated,
    NotFound(Ulid),
    /// Draft slot, or one that has already started.
    NotBookable(Ulid),
    /// Someone else holds a live lock. Expected; pick another slot or retry later.
    Held { slot_id: Ulid, expires_at: Ms },
    /// Concurrent writers kept winning the race for the record.
    Conflict { slot_id: Ulid, attempts: u32 },
    /// Storage failed (journal I/O, shutdown).
    Store(String),
}

impl LockError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LockError::Conflict { .. } | LockError::Store(_))
    }
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockError::Unauthenticated => write!(f, "sign in before reserving a slot"),
            LockError::NotFound(id) => write!(f, "slot {id} does not exist"),
            LockError::NotBookable(id) => write!(f, "slot {id} is not open for booking"),
            LockError::Held { slot_id, expires_at } => write!(
                f,
                "slot {slot_id} is being reserved by someone else until {expires_at}; pick another slot or try again later"
            ),
            LockError::Conflict { slot_id, attempts } => write!(
                f,
                "slot {slot_id} is busy ({attempts} attempts); try again"
            ),
            LockError::Store(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for LockError {}

impl From<EngineError> for LockError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NotFound(id) => LockError::NotFound(id),
            EngineError::NotBookable(id) => LockError::NotBookable(id),
            EngineError::VersionConflict { slot_id, .. } => LockError::Conflict {
                slot_id,
                attempts: 1,
            },
            other => LockError::Store(other.to_string()),
        }
    }
}

/// What the acquire transaction should do with the record it read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Absent record: write a fresh one.
    Grant,
    /// Caller already holds it: push the expiry out.
    Renew,
    /// Someone else's record that is no longer live: overwrite it.
    Takeover,
    /// Someone else's live record.
    Deny { expires_at: Ms },
}

pub fn decide(current: Option<&LockRecord>, holder: &str, now: Ms) -> Decision {
    match current {
        None => Decision::Grant,
        Some(lock) if lock.holder == holder => Decision::Renew,
        Some(lock) if !lock.is_live(now) => Decision::Takeover,
        Some(lock) => Decision::Deny {
            expires_at: lock.expires_at,
        },
    }
}

impl Decision {
    fn label(&self) -> &'static str {
        match self {
            Decision::Grant => "granted",
            Decision::Renew => "renewed",
            Decision::Takeover => "taken_over",
            Decision::Deny { .. } => "held",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    /// The caller did not hold the record (absent, someone else's, or
    /// superseded by a later acquisition of the same slot).
    NotHeld,
    /// The attempt failed. The record will lapse at its expiry.
    Failed,
}

impl ReleaseOutcome {
    fn label(&self) -> &'static str {
        match self {
            ReleaseOutcome::Released => "released",
            ReleaseOutcome::NotHeld => "not_held",
            ReleaseOutcome::Failed => "failed",
        }
    }
}

/// A release running in the background.
///
/// Dropping the handle detaches the release; it still runs to completion.
/// Awaiting `outcome` is only useful to observe it (tests, shutdown).
#[derive(Debug)]
pub struct ReleaseHandle {
    slot_id: Ulid,
    task: JoinHandle<ReleaseOutcome>,
}

impl ReleaseHandle {
    pub fn slot_id(&self) -> Ulid {
        self.slot_id
    }

    pub async fn outcome(self) -> ReleaseOutcome {
        self.task.await.unwrap_or(ReleaseOutcome::Failed)
    }
}

/// A successful acquisition.
#[derive(Debug)]
pub struct Acquired {
    pub slot_id: Ulid,
    pub expires_at: Ms,
    pub renewed: bool,
    /// Version of the written record. Releasing by version only removes this
    /// exact record, never a later renewal of it.
    pub version: u64,
    /// Release of the caller's previous hold on another slot, if there was one.
    pub released_prior: Option<ReleaseHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSettings {
    pub ttl_ms: Ms,
    pub max_attempts: u32,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            ttl_ms: DEFAULT_LOCK_TTL_MS,
            max_attempts: DEFAULT_ACQUIRE_ATTEMPTS,
        }
    }
}

/// Grants at most one live hold per slot.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn LockStore>,
    settings: LockSettings,
    /// Last slot each holder acquired and the record version written, so
    /// switching slots can release exactly the old hold.
    holdings: Arc<DashMap<String, (Ulid, u64)>>,
}

impl LockManager {
    pub fn new(store: Arc<dyn LockStore>, settings: LockSettings) -> Self {
        Self {
            store,
            settings: LockSettings {
                ttl_ms: settings.ttl_ms.max(1),
                max_attempts: settings.max_attempts.clamp(1, MAX_ACQUIRE_ATTEMPTS),
            },
            holdings: Arc::new(DashMap::new()),
        }
    }

    pub fn settings(&self) -> LockSettings {
        self.settings
    }

    pub fn now_ms(&self) -> Ms {
        self.store.now_ms()
    }

    /// Take or renew the hold on `slot_id` for `holder` for one TTL.
    ///
    /// Only published slots that have not started can be held; anything else
    /// is `NotBookable`. `Held` is returned as-is and never retried here.
    /// Version conflicts are retried up to `max_attempts` transactions before
    /// surfacing as `Conflict`.
    pub async fn acquire(&self, slot_id: Ulid, holder: &str) -> Result<Acquired, LockError> {
        if validate_holder(holder).is_err() {
            metrics::counter!(LOCK_ACQUIRE_TOTAL, "outcome" => "unauthenticated").increment(1);
            return Err(LockError::Unauthenticated);
        }
        let started = Instant::now();
        let result = self.acquire_txn(slot_id, holder).await;
        metrics::histogram!(LOCK_ACQUIRE_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        let (expires_at, renewed, version) = match result {
            Ok(granted) => granted,
            Err(e) => {
                let outcome = match &e {
                    LockError::Held { .. } => "held",
                    LockError::Conflict { .. } => "conflict",
                    LockError::NotFound(_) => "not_found",
                    LockError::NotBookable(_) => "not_bookable",
                    _ => "error",
                };
                metrics::counter!(LOCK_ACQUIRE_TOTAL, "outcome" => outcome).increment(1);
                return Err(e);
            }
        };

        let released_prior = match self
            .holdings
            .insert(holder.to_string(), (slot_id, version))
        {
            Some((prior, prior_version)) if prior != slot_id => {
                debug!("holder {holder} moved from slot {prior} to {slot_id}");
                Some(self.release_detached(prior, holder, prior_version))
            }
            _ => None,
        };

        Ok(Acquired {
            slot_id,
            expires_at,
            renewed,
            version,
            released_prior,
        })
    }

    async fn acquire_txn(
        &self,
        slot_id: Ulid,
        holder: &str,
    ) -> Result<(Ms, bool, u64), LockError> {
        for attempt in 1..=self.settings.max_attempts {
            let snapshot = self.store.read_lock(slot_id).await?;
            let now = self.store.now_ms();
            let decision = decide(snapshot.lock.as_ref(), holder, now);
            if let Decision::Deny { expires_at } = decision {
                debug!("slot {slot_id}: {holder} denied, held until {expires_at}");
                return Err(LockError::Held {
                    slot_id,
                    expires_at,
                });
            }

            let expires_at = now + self.settings.ttl_ms;
            let record = LockRecord {
                holder: holder.to_string(),
                expires_at,
            };
            match self
                .store
                .compare_and_set_lock(slot_id, snapshot.version, Some(record))
                .await
            {
                Ok(version) => {
                    metrics::counter!(LOCK_ACQUIRE_TOTAL, "outcome" => decision.label())
                        .increment(1);
                    debug!(
                        "slot {slot_id}: {holder} {} until {expires_at}",
                        decision.label()
                    );
                    return Ok((expires_at, decision == Decision::Renew, version));
                }
                Err(EngineError::VersionConflict { .. }) => {
                    metrics::counter!(LOCK_TXN_RETRIES_TOTAL).increment(1);
                    debug!("slot {slot_id}: lost race on attempt {attempt}, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(LockError::Conflict {
            slot_id,
            attempts: self.settings.max_attempts,
        })
    }

    /// Delete the lock on `slot_id` if `holder` owns it. Never fails: errors
    /// are logged and the record is left to lapse at its expiry.
    pub async fn release(&self, slot_id: Ulid, holder: &str) -> ReleaseOutcome {
        let outcome = self.release_txn(slot_id, holder).await;
        if outcome != ReleaseOutcome::Failed {
            self.holdings.remove_if(holder, |_, (held, _)| *held == slot_id);
        }
        metrics::counter!(LOCK_RELEASE_TOTAL, "outcome" => outcome.label()).increment(1);
        outcome
    }

    async fn release_txn(&self, slot_id: Ulid, holder: &str) -> ReleaseOutcome {
        for _ in 0..self.settings.max_attempts {
            let snapshot = match self.store.read_lock(slot_id).await {
                Ok(s) => s,
                // Slot gone means its lock went with it.
                Err(EngineError::NotFound(_)) => return ReleaseOutcome::NotHeld,
                Err(e) => {
                    warn!("release of slot {slot_id} by {holder} failed: {e}");
                    return ReleaseOutcome::Failed;
                }
            };
            if snapshot.lock.as_ref().is_none_or(|l| l.holder != holder) {
                return ReleaseOutcome::NotHeld;
            }
            match self
                .store
                .compare_and_set_lock(slot_id, snapshot.version, None)
                .await
            {
                Ok(_) => {
                    debug!("slot {slot_id}: released by {holder}");
                    return ReleaseOutcome::Released;
                }
                Err(EngineError::VersionConflict { .. }) => {
                    metrics::counter!(LOCK_TXN_RETRIES_TOTAL).increment(1);
                }
                Err(EngineError::NotFound(_)) => return ReleaseOutcome::NotHeld,
                Err(e) => {
                    warn!("release of slot {slot_id} by {holder} failed: {e}");
                    return ReleaseOutcome::Failed;
                }
            }
        }
        warn!("release of slot {slot_id} by {holder} kept conflicting; leaving it to expire");
        ReleaseOutcome::Failed
    }

    /// Delete the record `holder` wrote at `version`, and nothing else.
    ///
    /// Any later write to the slot (a renewal by the same holder, a takeover,
    /// a sweep) moves the version on, and the release becomes `NotHeld`
    /// without touching the newer record. Never fails, like `release`.
    pub async fn release_version(
        &self,
        slot_id: Ulid,
        holder: &str,
        version: u64,
    ) -> ReleaseOutcome {
        let outcome = match self.store.compare_and_set_lock(slot_id, version, None).await {
            Ok(_) => {
                debug!("slot {slot_id}: released by {holder} (version {version})");
                ReleaseOutcome::Released
            }
            Err(EngineError::VersionConflict { .. }) | Err(EngineError::NotFound(_)) => {
                debug!("slot {slot_id}: hold by {holder} at version {version} already superseded");
                ReleaseOutcome::NotHeld
            }
            Err(e) => {
                warn!("release of slot {slot_id} by {holder} failed: {e}");
                ReleaseOutcome::Failed
            }
        };
        if outcome != ReleaseOutcome::Failed {
            self.holdings
                .remove_if(holder, |_, held| *held == (slot_id, version));
        }
        metrics::counter!(LOCK_RELEASE_TOTAL, "outcome" => outcome.label()).increment(1);
        outcome
    }

    /// Fire-and-forget `release_version`.
    pub fn release_detached(&self, slot_id: Ulid, holder: &str, version: u64) -> ReleaseHandle {
        let manager = self.clone();
        let holder = holder.to_string();
        ReleaseHandle {
            slot_id,
            task: tokio::spawn(async move {
                manager.release_version(slot_id, &holder, version).await
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use tokio::sync::Notify;

    use tokio_test::{assert_err, assert_ok};

    use crate::clock::ManualClock;
    use crate::engine::EngineOptions;
    use crate::notify::NotifyHub;

    const T0: Ms = 1_900_000_000_000;
    const H: Ms = 3_600_000;
    const TTL: Ms = 10 * 60_000;

    fn test_wal_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("slotkeep_test_lock");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    async fn setup(name: &str) -> (Arc<Engine>, Arc<ManualClock>, LockManager) {
        let clock = Arc::new(ManualClock::new(T0));
        let engine = Arc::new(
            Engine::open(
                test_wal_path(name),
                Arc::new(NotifyHub::new()),
                clock.clone(),
                EngineOptions::default(),
            )
            .unwrap(),
        );
        let manager = LockManager::new(
            engine.clone(),
            LockSettings {
                ttl_ms: TTL,
                max_attempts: 3,
            },
        );
        (engine, clock, manager)
    }

    async fn slot(engine: &Engine) -> Ulid {
        engine
            .create_slot(SlotDraft {
                interviewer_id: Ulid::new(),
                interviewer_name: "Kiran".into(),
                interviewer_email: "kiran@example.com".into(),
                interviewer_phone: "+15550103".into(),
                details: String::new(),
                start: T0 + 24 * H,
                end: T0 + 25 * H,
                plan_tags: vec!["maang".into()],
                capacity: 1,
                status: SlotStatus::Published,
            })
            .await
            .unwrap()
    }

    fn lock(holder: &str, expires_at: Ms) -> LockRecord {
        LockRecord {
            holder: holder.into(),
            expires_at,
        }
    }

    #[test]
    fn decision_table() {
        assert_eq!(decide(None, "a", 100), Decision::Grant);
        assert_eq!(decide(Some(&lock("a", 50)), "a", 100), Decision::Renew);
        assert_eq!(decide(Some(&lock("a", 500)), "a", 100), Decision::Renew);
        assert_eq!(decide(Some(&lock("b", 50)), "a", 100), Decision::Takeover);
        assert_eq!(
            decide(Some(&lock("b", 500)), "a", 100),
            Decision::Deny { expires_at: 500 }
        );
    }

    #[test]
    fn lock_expiring_exactly_now_can_be_taken() {
        assert_eq!(decide(Some(&lock("b", 100)), "a", 100), Decision::Takeover);
        assert_eq!(
            decide(Some(&lock("b", 101)), "a", 100),
            Decision::Deny { expires_at: 101 }
        );
    }

    #[tokio::test]
    async fn second_holder_is_denied_until_expiry() {
        let (engine, clock, manager) = setup("deny_until_expiry.wal").await;
        let s = slot(&engine).await;

        let a = assert_ok!(manager.acquire(s, "userA").await);
        assert_eq!(a.expires_at, T0 + TTL);
        assert!(!a.renewed);

        let denied = manager.acquire(s, "userB").await;
        assert_eq!(
            denied.unwrap_err(),
            LockError::Held {
                slot_id: s,
                expires_at: T0 + TTL
            }
        );

        clock.advance(TTL + 1_000);
        let b = assert_ok!(manager.acquire(s, "userB").await);
        assert_eq!(b.expires_at, T0 + TTL + 1_000 + TTL);
        let live = engine.live_lock(s).await.unwrap().unwrap();
        assert_eq!(live.holder, "userB");
    }

    #[tokio::test]
    async fn renewal_extends_and_never_denies_self() {
        let (engine, clock, manager) = setup("renewal.wal").await;
        let s = slot(&engine).await;

        let mut last = 0;
        for _ in 0..5 {
            let got = assert_ok!(manager.acquire(s, "userA").await);
            assert!(got.expires_at > last);
            last = got.expires_at;
            clock.advance(60_000);
        }
        let again = assert_ok!(manager.acquire(s, "userA").await);
        assert!(again.renewed);
    }

    #[tokio::test]
    async fn release_is_scoped_to_holder() {
        let (engine, _clock, manager) = setup("release_scoped.wal").await;
        let s = slot(&engine).await;
        assert_ok!(manager.acquire(s, "userA").await);

        assert_eq!(manager.release(s, "userB").await, ReleaseOutcome::NotHeld);
        let live = engine.live_lock(s).await.unwrap().unwrap();
        assert_eq!(live.holder, "userA");

        assert_eq!(manager.release(s, "userA").await, ReleaseOutcome::Released);
        assert!(engine.live_lock(s).await.unwrap().is_none());
        assert_eq!(manager.release(s, "userA").await, ReleaseOutcome::NotHeld);
    }

    #[tokio::test]
    async fn switching_slots_releases_the_prior_hold() {
        let (engine, _clock, manager) = setup("switch.wal").await;
        let s1 = slot(&engine).await;
        let s2 = slot(&engine).await;

        assert!(assert_ok!(manager.acquire(s1, "userA").await).released_prior.is_none());
        let moved = assert_ok!(manager.acquire(s2, "userA").await);
        let prior = moved.released_prior.expect("prior hold should be released");
        assert_eq!(prior.slot_id(), s1);
        assert_eq!(prior.outcome().await, ReleaseOutcome::Released);

        assert!(engine.live_lock(s1).await.unwrap().is_none());
        assert_ok!(manager.acquire(s1, "userB").await);
    }

    #[tokio::test]
    async fn missing_identity_fails_fast() {
        let (engine, _clock, manager) = setup("unauthenticated.wal").await;
        let s = slot(&engine).await;
        assert_eq!(
            manager.acquire(s, "").await.unwrap_err(),
            LockError::Unauthenticated
        );
        assert_eq!(engine.read_lock(s).await.unwrap().version, 0);
    }

    #[tokio::test]
    async fn unknown_slot_is_not_found() {
        let (_engine, _clock, manager) = setup("unknown_slot.wal").await;
        let id = Ulid::new();
        assert_eq!(
            manager.acquire(id, "userA").await.unwrap_err(),
            LockError::NotFound(id)
        );
        assert_eq!(manager.release(id, "userA").await, ReleaseOutcome::NotHeld);
    }

    #[tokio::test]
    async fn deleting_slot_drops_its_lock() {
        let (engine, _clock, manager) = setup("delete_drops_lock.wal").await;
        let s = slot(&engine).await;
        assert_ok!(manager.acquire(s, "userA").await);
        engine.delete_slot(s).await.unwrap();
        assert_err!(engine.read_lock(s).await);
        assert_eq!(manager.release(s, "userA").await, ReleaseOutcome::NotHeld);
    }

    #[tokio::test]
    async fn concurrent_acquires_have_one_winner() {
        let (engine, _clock, manager) = setup("one_winner.wal").await;
        let s = slot(&engine).await;

        let mut tasks = Vec::new();
        for i in 0..16 {
            let manager = manager.clone();
            tasks.push(tokio::spawn(async move {
                manager.acquire(s, &format!("user{i}")).await
            }));
        }
        let mut winners = 0;
        for t in tasks {
            match t.await.unwrap() {
                Ok(_) => winners += 1,
                Err(LockError::Held { .. }) | Err(LockError::Conflict { .. }) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(winners, 1);
    }

    /// Delegates to an engine but makes the first `fail_cas` writes lose a race.
    struct RacyStore {
        engine: Arc<Engine>,
        fail_cas: AtomicU32,
    }

    #[async_trait]
    impl LockStore for RacyStore {
        fn now_ms(&self) -> Ms {
            self.engine.now_ms()
        }

        async fn read_lock(&self, slot_id: Ulid) -> Result<LockSnapshot, EngineError> {
            self.engine.read_lock(slot_id).await
        }

        async fn compare_and_set_lock(
            &self,
            slot_id: Ulid,
            expected_version: u64,
            next: Option<LockRecord>,
        ) -> Result<u64, EngineError> {
            if self
                .fail_cas
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(EngineError::VersionConflict {
                    slot_id,
                    expected: expected_version,
                    actual: expected_version + 1,
                });
            }
            self.engine
                .compare_and_set_lock(slot_id, expected_version, next)
                .await
        }
    }

    #[tokio::test]
    async fn conflicts_are_retried_transparently() {
        let (engine, _clock, _) = setup("retry_ok.wal").await;
        let s = slot(&engine).await;
        let store = Arc::new(RacyStore {
            engine: engine.clone(),
            fail_cas: AtomicU32::new(2),
        });
        let manager = LockManager::new(store, LockSettings::default());

        assert_ok!(manager.acquire(s, "userA").await);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_as_conflict() {
        let (engine, _clock, _) = setup("retry_exhausted.wal").await;
        let s = slot(&engine).await;
        let store = Arc::new(RacyStore {
            engine: engine.clone(),
            fail_cas: AtomicU32::new(10),
        });
        let manager = LockManager::new(
            store,
            LockSettings {
                ttl_ms: TTL,
                max_attempts: 3,
            },
        );

        let err = manager.acquire(s, "userA").await.unwrap_err();
        assert_eq!(
            err,
            LockError::Conflict {
                slot_id: s,
                attempts: 3
            }
        );
        assert!(err.is_retryable());
        assert!(engine.live_lock(s).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn returning_to_prior_slot_keeps_the_new_hold() {
        let (engine, _clock, manager) = setup("return_prior.wal").await;
        let s1 = slot(&engine).await;
        let s2 = slot(&engine).await;

        assert_ok!(manager.acquire(s1, "userA").await);
        let moved = assert_ok!(manager.acquire(s2, "userA").await);
        let back = assert_ok!(manager.acquire(s1, "userA").await);
        // Whichever order the background releases ran in, the latest hold stands.
        if let Some(h) = moved.released_prior {
            h.outcome().await;
        }
        if let Some(h) = back.released_prior {
            h.outcome().await;
        }
        let live = engine.live_lock(s1).await.unwrap().unwrap();
        assert_eq!(live.holder, "userA");
    }

    /// Delegates to an engine but parks the first lock clear until told to go on.
    struct GatedStore {
        engine: Arc<Engine>,
        armed: AtomicBool,
        parked: Notify,
        resume: Notify,
    }

    #[async_trait]
    impl LockStore for GatedStore {
        fn now_ms(&self) -> Ms {
            self.engine.now_ms()
        }

        async fn read_lock(&self, slot_id: Ulid) -> Result<LockSnapshot, EngineError> {
            self.engine.read_lock(slot_id).await
        }

        async fn compare_and_set_lock(
            &self,
            slot_id: Ulid,
            expected_version: u64,
            next: Option<LockRecord>,
        ) -> Result<u64, EngineError> {
            if next.is_none() && self.armed.swap(false, Ordering::SeqCst) {
                self.parked.notify_one();
                self.resume.notified().await;
            }
            self.engine
                .compare_and_set_lock(slot_id, expected_version, next)
                .await
        }
    }

    #[tokio::test]
    async fn late_switch_release_spares_a_renewed_hold() {
        let (engine, clock, _) = setup("late_switch_release.wal").await;
        let s1 = slot(&engine).await;
        let s2 = slot(&engine).await;
        let store = Arc::new(GatedStore {
            engine: engine.clone(),
            armed: AtomicBool::new(true),
            parked: Notify::new(),
            resume: Notify::new(),
        });
        let manager = LockManager::new(
            store.clone(),
            LockSettings {
                ttl_ms: TTL,
                max_attempts: 3,
            },
        );

        assert_ok!(manager.acquire(s1, "userA").await);
        let moved = assert_ok!(manager.acquire(s2, "userA").await);
        let stale = moved.released_prior.expect("switch should release s1");
        store.parked.notified().await;

        // Back to s1 while the release of the old s1 hold is in flight.
        clock.advance(1_000);
        let back = assert_ok!(manager.acquire(s1, "userA").await);
        assert!(back.renewed);

        store.resume.notify_one();
        assert_eq!(stale.outcome().await, ReleaseOutcome::NotHeld);
        if let Some(h) = back.released_prior {
            assert_eq!(h.outcome().await, ReleaseOutcome::Released);
        }

        let live = engine.live_lock(s1).await.unwrap().unwrap();
        assert_eq!(live.holder, "userA");
        assert_eq!(live.expires_at, back.expires_at);
        assert!(matches!(
            manager.acquire(s1, "userB").await,
            Err(LockError::Held { .. })
        ));
    }

    #[tokio::test]
    async fn release_by_version_ignores_newer_records() {
        let (engine, clock, manager) = setup("release_version.wal").await;
        let s = slot(&engine).await;
        let first = assert_ok!(manager.acquire(s, "userA").await);
        clock.advance(1_000);
        let renewed = assert_ok!(manager.acquire(s, "userA").await);

        assert_eq!(
            manager.release_version(s, "userA", first.version).await,
            ReleaseOutcome::NotHeld
        );
        assert!(engine.live_lock(s).await.unwrap().is_some());
        assert_eq!(
            manager.release_version(s, "userA", renewed.version).await,
            ReleaseOutcome::Released
        );
        assert!(engine.live_lock(s).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn only_open_slots_can_be_held() {
        let (engine, clock, manager) = setup("open_slots_only.wal").await;
        let draft = engine
            .create_slot(SlotDraft {
                interviewer_id: Ulid::new(),
                interviewer_name: "Kiran".into(),
                interviewer_email: String::new(),
                interviewer_phone: String::new(),
                details: String::new(),
                start: T0 + 24 * H,
                end: T0 + 25 * H,
                plan_tags: vec!["maang".into()],
                capacity: 1,
                status: SlotStatus::Draft,
            })
            .await
            .unwrap();
        let err = manager.acquire(draft, "userA").await.unwrap_err();
        assert_eq!(err, LockError::NotBookable(draft));
        assert!(!err.is_retryable());

        let s = slot(&engine).await;
        let held = assert_ok!(manager.acquire(s, "userA").await);
        clock.set(T0 + 24 * H);
        assert_eq!(
            manager.acquire(s, "userA").await.unwrap_err(),
            LockError::NotBookable(s)
        );
        // Letting go still works once the slot has started.
        assert_eq!(
            manager.release_version(s, "userA", held.version).await,
            ReleaseOutcome::Released
        );
    }
}
