//! Blocking iterator over model change events
//!
//! - Blocking: `recv()`, `for event in iter`
//! - Non-blocking: `try_recv()`, `try_iter()`
//! - Timeout: `recv_timeout()`, `timeout_iter()`

use std::sync::{mpsc, Arc};
use std::time::Duration;

use parking_lot::Mutex;

use crate::event::ChangeEvent;

/// Blocking iterator over change events
///
/// Every iterator obtained from the same controller shares one queue, so
/// each event is delivered to exactly one of them.
///
/// # Example
///
/// ```rust,ignore
/// for event in controller.changes() {
///     println!("{} changed on {}", event.property_key, event.entity);
/// }
/// ```
pub struct ChangeIterator {
    rx: Arc<Mutex<mpsc::Receiver<ChangeEvent>>>,
}

impl ChangeIterator {
    pub(crate) fn new(rx: Arc<Mutex<mpsc::Receiver<ChangeEvent>>>) -> Self {
        Self { rx }
    }

    /// Block until the next event; `None` once the channel is closed
    pub fn recv(&self) -> Option<ChangeEvent> {
        self.rx.lock().recv().ok()
    }

    /// Block until the next event or until `timeout` expires
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ChangeEvent> {
        self.rx.lock().recv_timeout(timeout).ok()
    }

    pub fn try_recv(&self) -> Option<ChangeEvent> {
        self.rx.lock().try_recv().ok()
    }

    /// Iterate over the events already queued, without blocking
    pub fn try_iter(&self) -> TryIter<'_> {
        TryIter { inner: self }
    }

    /// Iterate, waiting up to `timeout` for each event
    pub fn timeout_iter(&self, timeout: Duration) -> TimeoutIter<'_> {
        TimeoutIter {
            inner: self,
            timeout,
        }
    }
}

impl Iterator for ChangeIterator {
    type Item = ChangeEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}

/// Non-blocking iterator over currently available events
pub struct TryIter<'a> {
    inner: &'a ChangeIterator,
}

impl<'a> Iterator for TryIter<'a> {
    type Item = ChangeEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.try_recv()
    }
}

/// Blocking iterator with timeout
pub struct TimeoutIter<'a> {
    inner: &'a ChangeIterator,
    timeout: Duration,
}

impl<'a> Iterator for TimeoutIter<'a> {
    type Item = ChangeEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.recv_timeout(self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{keys, EntityId};
    use std::thread;
    use std::time::Instant;

    fn event(address: &str) -> ChangeEvent {
        ChangeEvent::new(EntityId::Node(address.to_string()), keys::STATUS)
    }

    fn iterator() -> (mpsc::Sender<ChangeEvent>, ChangeIterator) {
        let (tx, rx) = mpsc::channel();
        (tx, ChangeIterator::new(Arc::new(Mutex::new(rx))))
    }

    #[test]
    fn test_try_recv() {
        let (tx, iter) = iterator();
        assert!(iter.try_recv().is_none());

        tx.send(event("a")).unwrap();
        assert_eq!(iter.try_recv(), Some(event("a")));
        assert!(iter.try_recv().is_none());
    }

    #[test]
    fn test_recv_timeout_expires() {
        let (_tx, iter) = iterator();
        let start = Instant::now();

        assert!(iter.recv_timeout(Duration::from_millis(50)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(45));
    }

    #[test]
    fn test_recv_timeout_with_event() {
        let (tx, iter) = iterator();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            tx.send(event("a")).unwrap();
        });

        assert!(iter.recv_timeout(Duration::from_secs(1)).is_some());
    }

    #[test]
    fn test_try_iter_drains_queue() {
        let (tx, iter) = iterator();
        for address in ["a", "b", "c"] {
            tx.send(event(address)).unwrap();
        }

        let events: Vec<_> = iter.try_iter().collect();
        assert_eq!(events.len(), 3);
        assert_eq!(iter.try_iter().count(), 0);
    }

    #[test]
    fn test_blocking_iteration_ends_when_closed() {
        let (tx, iter) = iterator();
        tx.send(event("a")).unwrap();
        drop(tx);

        assert_eq!(iter.count(), 1);
    }
}
