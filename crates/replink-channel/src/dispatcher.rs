//! Event fan-out for the streaming receive mode.
//!
//! The background reader pushes decoded lines and lifecycle events here
//! instead of returning them to a caller. Observers may be registered and
//! removed from any thread, including while the worker is emitting; each
//! observer call is isolated so one panicking observer neither blocks the
//! rest nor kills the reader.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

/// Events delivered to channel observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The channel entered the connected state.
    Connected,
    /// The channel was torn down.
    Disconnected,
    /// A completed line arrived from the device.
    Line(String),
    /// The reader hit a transport error and is exiting.
    Error(String),
}

/// Handle for removing a registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverId(u64);

type Observer = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

/// Fan-out of channel events to zero or more observers.
#[derive(Default)]
pub struct Dispatcher {
    observers: Mutex<Vec<(u64, Observer)>>,
    next_id: AtomicU64,
}

impl Dispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Dispatcher {
            observers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register an observer; returns the id used to remove it later.
    pub fn subscribe<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.lock().push((id, Arc::new(observer)));
        ObserverId(id)
    }

    /// Remove a previously registered observer.
    ///
    /// Returns whether the observer was still registered.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|(oid, _)| *oid != id.0);
        observers.len() != before
    }

    /// Number of currently registered observers.
    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    /// Deliver an event to every observer registered at emission time.
    ///
    /// The observer list is snapshotted under the lock and the calls made
    /// outside it, so observers may themselves subscribe or unsubscribe.
    pub fn emit(&self, event: &ChannelEvent) {
        let snapshot: Vec<Observer> = self
            .observers
            .lock()
            .iter()
            .map(|(_, obs)| Arc::clone(obs))
            .collect();

        for observer in snapshot {
            if catch_unwind(AssertUnwindSafe(|| observer(event))).is_err() {
                warn!("channel observer panicked while handling {:?}", event);
            }
        }
    }
}
