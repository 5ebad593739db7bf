//! A small publish/subscribe bus that remembers the last published value.
//!
//! New subscribers are called synchronously with the current value (if
//! any) before `subscribe` returns. A listener that panics is logged and
//! skipped; delivery continues to the remaining listeners.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::error;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct BusState<T> {
    next_id: u64,
    listeners: Vec<(u64, Listener<T>)>,
    current: Option<T>,
}

pub struct EventBus<T> {
    state: Arc<Mutex<BusState<T>>>,
}

impl<T: Clone + Send + 'static> EventBus<T> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState {
                next_id: 0,
                listeners: Vec::new(),
                current: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusState<T>> {
        // Listeners run outside the lock, so a poisoned lock still holds consistent state
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a listener. It is invoked immediately with the current value, if one exists.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let listener: Listener<T> = Arc::new(listener);
        let (id, current) = {
            let mut state = self.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.listeners.push((id, Arc::clone(&listener)));
            (id, state.current.clone())
        };

        if let Some(value) = current {
            deliver(id, &listener, &value);
        }

        let weak: Weak<Mutex<BusState<T>>> = Arc::downgrade(&self.state);
        Subscription::new(move || {
            if let Some(state) = weak.upgrade() {
                let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
                state.listeners.retain(|(lid, _)| *lid != id);
            }
        })
    }

    /// Store `value` as current and deliver it to every listener in registration order.
    pub fn publish(&self, value: T) {
        let listeners: Vec<(u64, Listener<T>)> = {
            let mut state = self.lock();
            state.current = Some(value.clone());
            state.listeners.clone()
        };

        for (id, listener) in &listeners {
            deliver(*id, listener, &value);
        }
    }

    pub fn current(&self) -> Option<T> {
        self.lock().current.clone()
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Drop every listener and forget the current value.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.listeners.clear();
        state.current = None;
    }
}

impl<T: Clone + Send + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn deliver<T>(id: u64, listener: &Listener<T>, value: &T) {
    if panic::catch_unwind(AssertUnwindSafe(|| listener(value))).is_err() {
        error!(listener = id, "Listener panicked during delivery");
    }
}

/// Handle returned by [`EventBus::subscribe`]. Dropping it unsubscribes;
/// call [`Subscription::detach`] to keep the listener for the bus lifetime.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    pub fn detach(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}
