use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::model::*;

use super::Engine;

/// Live, ordered view of the slots matching a filter.
///
/// Every catalog change re-runs the filter and, if the result differs,
/// replaces the previous snapshot wholesale. Slow readers simply see the
/// latest snapshot; intermediate ones are skipped. Dropping the watch
/// unsubscribes.
pub struct SlotWatch {
    rx: watch::Receiver<Arc<Vec<Slot>>>,
    task: JoinHandle<()>,
    primed: bool,
}

impl Engine {
    pub async fn watch_slots(self: &Arc<Self>, filter: SlotFilter) -> SlotWatch {
        // Subscribe before taking the first snapshot so no change falls between.
        let mut events = self.notify.subscribe();
        let initial = self.list_slots(&filter).await;
        let (tx, rx) = watch::channel(Arc::new(initial));

        let engine = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
                let next = engine.list_slots(&filter).await;
                tx.send_if_modified(|current| {
                    if current.as_slice() == next.as_slice() {
                        false
                    } else {
                        *current = Arc::new(next);
                        true
                    }
                });
                if tx.is_closed() {
                    break;
                }
            }
        });

        SlotWatch {
            rx,
            task,
            primed: false,
        }
    }
}

impl SlotWatch {
    /// First call yields the snapshot taken at subscribe time; later calls
    /// wait for the next change. `None` once the catalog has shut down.
    pub async fn next(&mut self) -> Option<Arc<Vec<Slot>>> {
        if self.primed {
            self.rx.changed().await.ok()?;
        }
        self.primed = true;
        Some(self.rx.borrow_and_update().clone())
    }

    pub fn current(&self) -> Arc<Vec<Slot>> {
        self.rx.borrow().clone()
    }
}

impl Drop for SlotWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}
