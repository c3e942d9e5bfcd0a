//! Observable state container.

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// A subscriber callback. Receives the full state snapshot.
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

type Registry<T> = Mutex<Vec<(u64, Listener<T>)>>;

/// Holds a value and notifies subscribers whenever it changes.
///
/// Listeners run synchronously on the thread that made the change, in
/// subscription order, after the value lock is released. Updates that leave
/// the value equal to what it was notify nobody.
pub struct Observable<T> {
    value: RwLock<T>,
    listeners: Arc<Registry<T>>,
    next_id: AtomicU64,
    // Serializes change + notify so every listener sees snapshots in order.
    serial: ReentrantMutex<()>,
}

impl<T: Clone + PartialEq> Observable<T> {
    /// Creates a container holding `value`.
    pub fn new(value: T) -> Self {
        Self {
            value: RwLock::new(value),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
            serial: ReentrantMutex::new(()),
        }
    }

    /// Returns a snapshot of the current value.
    pub fn get(&self) -> T {
        self.value.read().clone()
    }

    /// Reads the current value without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.value.read())
    }

    /// Replaces the value. Returns true if subscribers were notified.
    pub fn set(&self, value: T) -> bool {
        self.update(|current| *current = value)
    }

    /// Mutates the value in place. Returns true if subscribers were notified.
    pub fn update(&self, f: impl FnOnce(&mut T)) -> bool {
        let _serial = self.serial.lock();
        let snapshot = {
            let mut value = self.value.write();
            let before = value.clone();
            f(&mut value);
            if *value == before {
                return false;
            }
            value.clone()
        };
        self.notify(&snapshot);
        true
    }

    /// Registers a listener and calls it once with the current value.
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription<T> {
        let _serial = self.serial.lock();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let listener: Listener<T> = Arc::new(listener);
        self.listeners.lock().push((id, Arc::clone(&listener)));

        let snapshot = self.get();
        listener(&snapshot);

        Subscription {
            id,
            registry: Arc::downgrade(&self.listeners),
        }
    }

    /// Returns the number of active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.listeners.lock().len()
    }

    fn notify(&self, snapshot: &T) {
        let listeners: Vec<Listener<T>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(snapshot);
        }
    }
}

impl<T: Clone + PartialEq + Default> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observable")
            .field("value", &*self.value.read())
            .field("subscribers", &self.listeners.lock().len())
            .finish()
    }
}

/// Handle returned by `Observable::subscribe`.
///
/// Dropping the handle keeps the listener registered; call `unsubscribe`.
pub struct Subscription<T> {
    id: u64,
    registry: Weak<Registry<T>>,
}

impl<T> Subscription<T> {
    /// Returns the subscription ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Removes the listener. Later changes are not delivered to it.
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, impl Fn(&u32) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |value: &u32| sink.lock().push(*value))
    }

    #[test]
    fn subscribe_delivers_current_value() {
        let observable = Observable::new(7u32);
        let (seen, listener) = recorder();

        let _sub = observable.subscribe(listener);
        assert_eq!(*seen.lock(), vec![7]);
    }

    #[test]
    fn changes_are_pushed_as_snapshots() {
        let observable = Observable::new(0u32);
        let (seen, listener) = recorder();
        let _sub = observable.subscribe(listener);

        assert!(observable.set(1));
        assert!(observable.update(|v| *v += 1));
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
        assert_eq!(observable.get(), 2);
    }

    #[test]
    fn unchanged_value_notifies_nobody() {
        let observable = Observable::new(5u32);
        let (seen, listener) = recorder();
        let _sub = observable.subscribe(listener);

        assert!(!observable.set(5));
        assert!(!observable.update(|_| {}));
        assert_eq!(*seen.lock(), vec![5]);
    }

    #[test]
    fn listeners_run_in_subscription_order() {
        let observable = Observable::new(0u32);
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&order);
        let _a = observable.subscribe(move |v| first.lock().push(("a", *v)));
        let second = Arc::clone(&order);
        let _b = observable.subscribe(move |v| second.lock().push(("b", *v)));
        order.lock().clear();

        observable.set(9);
        assert_eq!(*order.lock(), vec![("a", 9), ("b", 9)]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let observable = Observable::new(0u32);
        let (seen, listener) = recorder();
        let sub = observable.subscribe(listener);
        assert_eq!(observable.subscriber_count(), 1);

        sub.unsubscribe();
        observable.set(3);
        assert_eq!(*seen.lock(), vec![0]);
        assert_eq!(observable.subscriber_count(), 0);
    }

    #[test]
    fn listener_may_read_and_update_reentrantly() {
        let observable = Arc::new(Observable::new(0u32));
        let inner = Arc::clone(&observable);
        let reads = Arc::new(Mutex::new(Vec::new()));
        let reads_sink = Arc::clone(&reads);

        let _sub = observable.subscribe(move |v| {
            reads_sink.lock().push(inner.get());
            if *v == 1 {
                inner.set(2);
            }
        });

        observable.set(1);
        assert_eq!(observable.get(), 2);
        assert_eq!(*reads.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn point_in_time_read_without_subscription() {
        let observable = Observable::new(vec![1u32, 2]);
        observable.update(|v| v.push(3));
        assert_eq!(observable.with(|v| v.len()), 3);
    }
}
