mod error;
mod interviewers;
mod mutations;
mod queries;
mod validate;
mod watch;

pub use error::{EngineError, ValidationError};
pub use interviewers::plan_tags_for_company_types;
pub use validate::{normalize_plan_tags, validate_holder};
pub use watch::SlotWatch;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::clock::Clock;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedSlotState = Arc<RwLock<SlotState>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Every update sets `seats_available = capacity`, discarding consumption.
    /// Turning this off carries consumed seats across capacity edits.
    pub legacy_reset_seats_on_update: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            legacy_reset_seats_on_update: true,
        }
    }
}

// ── Group-commit journal channel ─────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    /// Start recording appends so a compaction snapshot taken afterwards can
    /// be completed with everything committed while it was being built.
    BeginCompact {
        response: oneshot::Sender<()>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

struct Journal {
    wal: Wal,
    /// Appends committed since `BeginCompact`, in order.
    tail: Option<Vec<Event>>,
}

/// Owns the journal. Appends that queue up while a flush is in progress are
/// written together and share one fsync; non-append commands run only after
/// the appends queued ahead of them are durable.
async fn wal_writer_loop(wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut journal = Journal { wal, tail: None };
    let mut batch: Vec<PendingAppend> = Vec::new();
    while let Some(cmd) = rx.recv().await {
        let mut deferred = None;
        match cmd {
            WalCommand::Append { event, response } => {
                batch.push((event, response));
                while let Ok(next) = rx.try_recv() {
                    match next {
                        WalCommand::Append { event, response } => batch.push((event, response)),
                        other => {
                            deferred = Some(other);
                            break;
                        }
                    }
                }
            }
            other => deferred = Some(other),
        }
        if !batch.is_empty() {
            commit_batch(&mut journal, &mut batch);
        }
        if let Some(cmd) = deferred {
            run_maintenance(&mut journal, cmd);
        }
    }
}

fn commit_batch(journal: &mut Journal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let wal = &mut journal.wal;
    let mut result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes are not
    // attributed to the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    match &result {
        Ok(()) => {
            if let Some(tail) = journal.tail.as_mut() {
                tail.extend(batch.iter().map(|(event, _)| event.clone()));
            }
        }
        Err(e) => tracing::error!("journal flush failed for {} events: {e}", batch.len()),
    }
    for (_, tx) in batch.drain(..) {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn run_maintenance(journal: &mut Journal, cmd: WalCommand) {
    match cmd {
        WalCommand::BeginCompact { response } => {
            journal.tail = Some(Vec::new());
            let _ = response.send(());
        }
        WalCommand::Compact { mut events, response } => {
            // Tail events may already be reflected in the snapshot. Replaying
            // them again is harmless: each one overwrites rather than accumulates.
            events.extend(journal.tail.take().unwrap_or_default());
            let wal = &mut journal.wal;
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(journal.wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// The slot catalog and its lock records.
///
/// Each slot lives behind its own `RwLock`; holding the write guard is what
/// serializes transactions over that slot's lock record.
pub struct Engine {
    pub(super) slots: DashMap<Ulid, SharedSlotState>,
    pub(super) interviewers: DashMap<Ulid, Interviewer>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) options: EngineOptions,
}

/// Apply a slot-scoped event to state the caller already holds the guard for.
fn apply_to_slot(state: &mut SlotState, event: &Event) {
    match event {
        Event::SlotUpdated { slot } => state.slot = slot.clone(),
        Event::LockWritten { lock, .. } => {
            state.lock = Some(lock.clone());
            state.lock_version += 1;
        }
        Event::LockCleared { .. } => {
            state.lock = None;
            state.lock_version += 1;
        }
        // Creation and deletion happen at the map level.
        Event::SlotCreated { .. } | Event::SlotDeleted { .. } | Event::InterviewerUpserted { .. } => {}
    }
}

impl Engine {
    /// Replay the journal at `wal_path` and start the writer task.
    /// Must be called from within a tokio runtime.
    pub fn open(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        clock: Arc<dyn Clock>,
        options: EngineOptions,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            slots: DashMap::new(),
            interviewers: DashMap::new(),
            wal_tx,
            notify,
            clock,
            options,
        };

        // Sole owner of every Arc during replay, so try_write never contends.
        // blocking_write would panic here because we may be inside the runtime.
        for event in &events {
            match event {
                Event::SlotCreated { slot } => {
                    engine
                        .slots
                        .insert(slot.id, Arc::new(RwLock::new(SlotState::new(slot.clone()))));
                }
                Event::SlotDeleted { id } => {
                    engine.slots.remove(id);
                }
                Event::InterviewerUpserted { interviewer } => {
                    engine.interviewers.insert(interviewer.id, interviewer.clone());
                }
                other => {
                    if let Some(id) = other.slot_id()
                        && let Some(entry) = engine.slots.get(&id)
                        && let Ok(mut guard) = entry.try_write()
                    {
                        apply_to_slot(&mut guard, other);
                    }
                }
            }
        }

        tracing::info!(
            "catalog replayed: {} events, {} slots, {} interviewers",
            events.len(),
            engine.slots.len(),
            engine.interviewers.len()
        );
        Ok(engine)
    }

    pub fn now_ms(&self) -> Ms {
        self.clock.now_ms()
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    /// Write event to the journal via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("journal writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub(super) fn get_slot_state(&self, id: &Ulid) -> Option<SharedSlotState> {
        self.slots.get(id).map(|e| e.value().clone())
    }

    /// True while `state` is still the catalog entry for `id`. A guard taken on
    /// a state that was deleted in the meantime must not be written through.
    pub(super) fn is_current(&self, id: &Ulid, state: &SharedSlotState) -> bool {
        self.slots
            .get(id)
            .is_some_and(|e| Arc::ptr_eq(e.value(), state))
    }

    /// Journal, apply, notify.
    pub(super) async fn persist_and_apply(
        &self,
        state: &mut SlotState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_slot(state, event);
        self.notify.send(event);
        Ok(())
    }
}
