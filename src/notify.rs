use tokio::sync::broadcast;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for catalog changes (slot create/update/delete).
///
/// Lock writes are not broadcast: availability does not depend on them, and
/// hold holders learn about their own locks from the acquire result.
pub struct NotifyHub {
    catalog: broadcast::Sender<Event>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            catalog: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.catalog.subscribe()
    }

    /// Publish an event if it changes the catalog. No-op if nobody is listening.
    pub fn send(&self, event: &Event) {
        if event.touches_catalog() {
            let _ = self.catalog.send(event.clone());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.catalog.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LockRecord;
    use ulid::Ulid;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe();

        let event = Event::SlotDeleted { id: Ulid::new() };
        hub.send(&event);

        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn lock_events_are_not_broadcast() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe();
        let slot_id = Ulid::new();

        hub.send(&Event::LockWritten {
            slot_id,
            lock: LockRecord {
                holder: "user-a".into(),
                expires_at: 1,
            },
        });
        hub.send(&Event::SlotDeleted { id: slot_id });

        assert_eq!(rx.recv().await.unwrap(), Event::SlotDeleted { id: slot_id });
    }

    #[test]
    fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        assert_eq!(hub.subscriber_count(), 0);
        hub.send(&Event::SlotDeleted { id: Ulid::new() });
    }
}
