//! Observable values and event emitters
//!
//! An [`Observable`] is a typed slot whose `set` compares the old and new
//! value and notifies listeners only when they differ. An [`EventEmitter`]
//! notifies on every publish. Listeners run synchronously on the thread
//! that made the change, after internal locks are released.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Listeners<T> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(ListenerId, Listener<T>)>>,
}

impl<T> Listeners<T> {
    fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            entries: Mutex::new(Vec::new()),
        }
    }

    fn add(&self, listener: Listener<T>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().push((id, listener));
        id
    }

    fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(entry, _)| *entry != id);
        entries.len() != before
    }

    fn emit(&self, value: &T) {
        // Snapshot so a listener may subscribe or unsubscribe while running
        let snapshot: Vec<Listener<T>> = self.entries.lock().iter().map(|(_, l)| Arc::clone(l)).collect();
        for listener in snapshot {
            listener(value);
        }
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// A value that notifies listeners when it changes.
///
/// # Example
///
/// ```rust
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use isy_state::Observable;
///
/// let status = Observable::new(0);
/// let calls = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&calls);
/// status.subscribe(move |_| {
///     counter.fetch_add(1, Ordering::SeqCst);
/// });
///
/// assert!(status.set(255));
/// assert!(!status.set(255));
/// assert_eq!(calls.load(Ordering::SeqCst), 1);
/// ```
pub struct Observable<T> {
    value: RwLock<T>,
    listeners: Listeners<T>,
}

impl<T: Clone + PartialEq> Observable<T> {
    pub fn new(initial: T) -> Self {
        Self {
            value: RwLock::new(initial),
            listeners: Listeners::new(),
        }
    }

    pub fn get(&self) -> T {
        self.value.read().clone()
    }

    /// Store `value`, notifying listeners if it differs from the current one.
    ///
    /// Returns whether the value changed.
    pub fn set(&self, value: T) -> bool {
        {
            let mut current = self.value.write();
            if *current == value {
                return false;
            }
            *current = value.clone();
        }
        self.listeners.emit(&value);
        true
    }

    /// Notify listeners with the current value, changed or not
    pub fn notify(&self) {
        let value = self.get();
        self.listeners.emit(&value);
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.listeners.add(Arc::new(listener))
    }

    /// Remove a listener; returns whether it was registered
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl<T: Clone + PartialEq + Default> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("value", &*self.value.read())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Publishes values to listeners without keeping or comparing them.
pub struct EventEmitter<T> {
    listeners: Listeners<T>,
}

impl<T> EventEmitter<T> {
    pub fn new() -> Self {
        Self {
            listeners: Listeners::new(),
        }
    }

    pub fn publish(&self, value: &T) {
        self.listeners.emit(value);
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.listeners.add(Arc::new(listener))
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl<T> Default for EventEmitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for EventEmitter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn recording<T: Clone + Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(&T) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |value: &T| sink.lock().push(value.clone()))
    }

    #[test]
    fn test_set_notifies_only_on_change() {
        let observable = Observable::new(0i64);
        let (seen, listener) = recording();
        observable.subscribe(listener);

        assert!(observable.set(10));
        assert!(!observable.set(10));
        assert!(observable.set(0));

        assert_eq!(*seen.lock(), vec![10, 0]);
        assert_eq!(observable.get(), 0);
    }

    #[test]
    fn test_notify_forces_emission() {
        let observable = Observable::new(true);
        let (seen, listener) = recording();
        observable.subscribe(listener);

        observable.notify();
        assert_eq!(*seen.lock(), vec![true]);
    }

    #[test]
    fn test_unsubscribe() {
        let observable = Observable::new(String::new());
        let (seen, listener) = recording();
        let id = observable.subscribe(listener);

        assert!(observable.unsubscribe(id));
        assert!(!observable.unsubscribe(id));
        observable.set("on".to_string());

        assert!(seen.lock().is_empty());
        assert_eq!(observable.listener_count(), 0);
    }

    #[test]
    fn test_listener_may_read_value() {
        let observable = Arc::new(Observable::new(1u8));
        let (seen, sink) = recording();
        let inner = Arc::clone(&observable);
        observable.subscribe(move |_| sink(&inner.get()));

        observable.set(2);
        assert_eq!(*seen.lock(), vec![2]);
    }

    #[test]
    fn test_emitter_publishes_repeats() {
        let emitter = EventEmitter::new();
        let (seen, listener) = recording();
        emitter.subscribe(listener);

        emitter.publish(&"DON");
        emitter.publish(&"DON");
        assert_eq!(*seen.lock(), vec!["DON", "DON"]);
    }

    proptest! {
        #[test]
        fn prop_listener_sees_each_change_once(values in prop::collection::vec(0i64..4, 0..40)) {
            let observable = Observable::new(0i64);
            let (seen, listener) = recording::<i64>();
            observable.subscribe(listener);

            let mut expected = Vec::new();
            let mut current = 0;
            for value in values {
                let changed = observable.set(value);
                prop_assert_eq!(changed, value != current);
                if changed {
                    expected.push(value);
                    current = value;
                }
            }

            prop_assert_eq!(seen.lock().clone(), expected);
            prop_assert_eq!(observable.get(), current);
        }
    }
}
