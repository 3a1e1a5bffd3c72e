// Versioned update notifications fanned out to registered observers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use rpdb_api::model::{DateTime, Update};
use tokio::sync::mpsc;
use tracing::debug;

/// Current data version plus the observer registry.
///
/// The version marker tracks the newest server state this client has
/// seen; the socket resumes from it on every handshake. Observers
/// receive a clone of every [`Update`] in `notify` call order, each
/// through its own unbounded channel so a slow consumer never blocks
/// the others.
pub struct UpdateBus {
    version: RwLock<VersionState>,
    observers: Mutex<Vec<ObserverSlot>>,
    next_observer_id: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
struct VersionState {
    version: i64,
    version_date: DateTime,
}

struct ObserverSlot {
    id: u64,
    tx: mpsc::UnboundedSender<Update>,
}

/// Receiving side of an observer registration.
///
/// Dropping the observer ends delivery; `remove_observer` does the same
/// explicitly.
pub struct UpdateObserver {
    id: u64,
    rx: mpsc::UnboundedReceiver<Update>,
}

impl UpdateObserver {
    /// Wait for the next update. `None` once the bus dropped this
    /// observer or shut down.
    pub async fn recv(&mut self) -> Option<Update> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Update> {
        self.rx.try_recv().ok()
    }
}

impl UpdateBus {
    pub fn new() -> Self {
        UpdateBus {
            version: RwLock::new(VersionState::default()),
            observers: Mutex::new(Vec::new()),
            next_observer_id: AtomicU64::new(1),
        }
    }

    // ── Version marker ───────────────────────────────────────────────

    /// The newest version number and its date.
    pub fn version_info(&self) -> (i64, DateTime) {
        let state = self
            .version
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        (state.version, state.version_date)
    }

    pub fn version(&self) -> i64 {
        self.version_info().0
    }

    pub fn version_date(&self) -> DateTime {
        self.version_info().1
    }

    pub fn set_version(&self, version: i64, version_date: DateTime) {
        let mut state = self
            .version
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.version = version;
        state.version_date = version_date;
    }

    /// Stamp the version date without touching the version number,
    /// e.g. after a full reload.
    pub fn set_version_date(&self, version_date: DateTime) {
        let mut state = self
            .version
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.version_date = version_date;
    }

    // ── Observers ────────────────────────────────────────────────────

    /// Register a new observer. Every later `notify` call delivers one
    /// update clone to it. The first delivery after the initial data
    /// load is empty ([`Update::is_zero`]) and means "everything may
    /// have changed".
    pub fn register_observer(&self) -> UpdateObserver {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_observer_id.fetch_add(1, Ordering::Relaxed);

        self.lock_observers().push(ObserverSlot { id, tx });
        UpdateObserver { id, rx }
    }

    /// Remove an observer and close its channel.
    pub fn remove_observer(&self, observer: UpdateObserver) {
        self.lock_observers().retain(|slot| slot.id != observer.id);
    }

    /// Fan an update out to all observers. `None` stands for "something
    /// changed, but no delta information is available".
    pub fn notify(&self, update: Option<&Update>) {
        let update = update.cloned().unwrap_or_default();

        let mut observers = self.lock_observers();
        let before = observers.len();
        // Sends never block (unbounded); dead observers are pruned.
        observers.retain(|slot| slot.tx.send(update.clone()).is_ok());
        if observers.len() != before {
            debug!(
                removed = before - observers.len(),
                "dropped closed update observers"
            );
        }
    }

    pub fn observer_count(&self) -> usize {
        self.lock_observers().len()
    }

    fn lock_observers(&self) -> std::sync::MutexGuard<'_, Vec<ObserverSlot>> {
        self.observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for UpdateBus {
    fn default() -> Self {
        UpdateBus::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn observers_see_updates_in_notify_order() {
        let bus = UpdateBus::new();
        let mut a = bus.register_observer();
        let mut b = bus.register_observer();

        for version in 1..=3 {
            bus.notify(Some(&Update {
                version,
                ..Update::default()
            }));
        }

        for observer in [&mut a, &mut b] {
            for expected in 1..=3 {
                assert_eq!(observer.recv().await.unwrap().version, expected);
            }
        }
    }

    #[tokio::test]
    async fn nil_notification_delivers_empty_update() {
        let bus = UpdateBus::new();
        let mut observer = bus.register_observer();

        bus.notify(None);

        let update = observer.recv().await.unwrap();
        assert!(update.is_zero());
    }

    #[tokio::test]
    async fn removed_observer_channel_closes() {
        let bus = UpdateBus::new();
        let observer = bus.register_observer();
        let mut kept = bus.register_observer();
        assert_eq!(bus.observer_count(), 2);

        bus.remove_observer(observer);
        assert_eq!(bus.observer_count(), 1);

        bus.notify(None);
        assert!(kept.recv().await.is_some());
    }

    #[tokio::test]
    async fn dropped_observers_are_pruned_on_notify() {
        let bus = UpdateBus::new();
        drop(bus.register_observer());
        assert_eq!(bus.observer_count(), 1);

        bus.notify(None);
        assert_eq!(bus.observer_count(), 0);
    }

    #[test]
    fn version_state_is_updated_atomically() {
        let bus = UpdateBus::new();
        assert_eq!(bus.version(), 0);
        assert!(!bus.version_date().is_set());

        let date = DateTime::parse("2030-01-01T10:00:00").unwrap();
        bus.set_version(42, date);
        assert_eq!(bus.version_info(), (42, date));

        let reload = DateTime::parse("2030-01-02T10:00:00").unwrap();
        bus.set_version_date(reload);
        assert_eq!(bus.version_info(), (42, reload));
    }
}
