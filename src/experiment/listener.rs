//! Data listeners notified after every merged poll.

use crate::data::Buffer;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Consumer of newly arrived data.
///
/// `new_data` holds, per registered buffer, the samples that arrived since the previous
/// notification. `full_update` is `true` when the experiment has no continuous buffer and
/// every poll replaces the buffers instead of appending to them.
///
/// Listeners run synchronously on the poller task; keep them short.
pub trait DataListener: Send + Sync {
    /// Called once per merged poll.
    fn update_data(&self, new_data: &[Buffer], full_update: bool);
}

impl<F> DataListener for F
where
    F: Fn(&[Buffer], bool) + Send + Sync,
{
    fn update_data(&self, new_data: &[Buffer], full_update: bool) {
        self(new_data, full_update)
    }
}

/// Handle returned on registration, used to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Ordered set of listeners.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn DataListener>)>>,
}

impl ListenerRegistry {
    pub(crate) fn add(&self, listener: Arc<dyn DataListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, listener));
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Deliver to a snapshot of the current listeners, in registration order.
    ///
    /// The lock is released before any callback runs, so listeners may add or remove
    /// listeners; such changes apply from the next notification on.
    pub(crate) fn notify(&self, new_data: &[Buffer], full_update: bool) {
        let snapshot: Vec<Arc<dyn DataListener>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in snapshot {
            listener.update_data(new_data, full_update);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_in_registration_order() {
        let registry = ListenerRegistry::default();
        let calls = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let calls = calls.clone();
            registry.add(Arc::new(move |_: &[Buffer], _: bool| calls.lock().push(tag)));
        }

        registry.notify(&[], false);
        assert_eq!(calls.lock().as_slice(), ["first", "second", "third"]);
    }

    #[test]
    fn test_remove() {
        let registry = ListenerRegistry::default();
        let id = registry.add(Arc::new(|_: &[Buffer], _: bool| {}));

        assert_eq!(registry.len(), 1);
        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_removal_during_notification_keeps_current_delivery() {
        let registry = Arc::new(ListenerRegistry::default());
        let second_calls = Arc::new(AtomicU64::new(0));
        let second_id = Arc::new(Mutex::new(None));

        {
            let registry = registry.clone();
            let second_id = second_id.clone();
            registry.clone().add(Arc::new(move |_: &[Buffer], _: bool| {
                if let Some(id) = *second_id.lock() {
                    registry.remove(id);
                }
            }));
        }
        {
            let second_calls = second_calls.clone();
            let id = registry.add(Arc::new(move |_: &[Buffer], _: bool| {
                second_calls.fetch_add(1, Ordering::SeqCst);
            }));
            *second_id.lock() = Some(id);
        }

        registry.notify(&[], false);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);

        registry.notify(&[], false);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_add_during_notification_waits_for_next_round() {
        let registry = Arc::new(ListenerRegistry::default());
        let late_calls = Arc::new(AtomicU64::new(0));
        let added = Arc::new(Mutex::new(false));

        {
            let inner = registry.clone();
            let late_calls = late_calls.clone();
            registry.add(Arc::new(move |_: &[Buffer], _: bool| {
                let mut added = added.lock();
                if !*added {
                    *added = true;
                    let late_calls = late_calls.clone();
                    inner.add(Arc::new(move |_: &[Buffer], _: bool| {
                        late_calls.fetch_add(1, Ordering::SeqCst);
                    }));
                }
            }));
        }

        registry.notify(&[], true);
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);

        registry.notify(&[], true);
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);
    }
}
