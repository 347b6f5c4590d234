use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Listener = Arc<dyn Fn() + Send + Sync>;

/// Observer list fired once per completed module swap.
#[derive(Default)]
pub struct ReloadEvents {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, Listener)>>,
}

impl ReloadEvents {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `listener`. It stays registered until the returned
    /// [`Subscription`] is dropped.
    pub fn subscribe(self: &Arc<Self>, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(listener)));

        Subscription {
            id,
            events: Arc::downgrade(self),
        }
    }

    /// Call every listener, returning how many were notified.
    pub fn broadcast(&self) -> usize {
        // Listeners may subscribe or unsubscribe while being notified.
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in &listeners {
            listener();
        }
        listeners.len()
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn clear(&self) {
        self.listeners.lock().clear();
    }

    fn unsubscribe(&self, id: u64) {
        self.listeners.lock().retain(|(other, _)| *other != id);
    }
}

/// Keeps a reload listener registered.
#[must_use = "the listener is removed when the subscription is dropped"]
pub struct Subscription {
    id: u64,
    events: Weak<ReloadEvents>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(events) = self.events.upgrade() {
            events.unsubscribe(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn dropping_subscription_stops_notifications() {
        let events = ReloadEvents::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let first = {
            let fired = fired.clone();
            events.subscribe(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            })
        };
        let second = {
            let fired = fired.clone();
            events.subscribe(move || {
                fired.fetch_add(10, Ordering::SeqCst);
            })
        };

        assert_eq!(events.broadcast(), 2);
        assert_eq!(fired.load(Ordering::SeqCst), 11);

        drop(second);
        assert_eq!(events.broadcast(), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 12);

        drop(first);
        assert!(events.is_empty());
    }

    #[test]
    fn subscription_outliving_events_is_harmless() {
        let events = ReloadEvents::new();
        let subscription = events.subscribe(|| {});
        drop(events);
        drop(subscription);
    }
}
