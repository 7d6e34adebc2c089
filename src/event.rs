// SPDX-FileCopyrightText: 2026 Wireline Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Event Emitter
//!
//! Explicit publish/subscribe used by all protocol layers: a type exposes an
//! [`Emitter`], callers subscribe with a closure and receive a
//! [`Subscription`] handle. Handlers run synchronously, in subscription
//! order, on the thread that fires the event.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

type Handler<T> = Rc<RefCell<dyn FnMut(&T)>>;

struct Listener<T> {
    id: u64,
    handler: Handler<T>,
}

/// Synchronous, single-threaded event emitter.
///
/// Firing takes a snapshot of the listener list first, so handlers may
/// subscribe or unsubscribe (including themselves) while an event is being
/// dispatched without invalidating the iteration.
pub struct Emitter<T> {
    listeners: Rc<RefCell<Vec<Listener<T>>>>,
    next_id: Cell<u64>,
}

impl<T: 'static> Emitter<T> {
    pub fn new() -> Self {
        Emitter {
            listeners: Rc::new(RefCell::new(Vec::new())),
            next_id: Cell::new(0),
        }
    }

    /// Registers a handler; it stays active until the returned
    /// [`Subscription`] is disposed or dropped.
    pub fn subscribe(&self, handler: impl FnMut(&T) + 'static) -> Subscription {
        let id = self.next_id.get();
        self.next_id.set(id + 1);

        self.listeners.borrow_mut().push(Listener {
            id,
            handler: Rc::new(RefCell::new(handler)),
        });

        let listeners = Rc::downgrade(&self.listeners);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(listeners) = listeners.upgrade() {
                    listeners.borrow_mut().retain(|l| l.id != id);
                }
            })),
        }
    }

    /// Invokes every currently registered handler with `value`.
    pub fn fire(&self, value: &T) {
        let snapshot: Vec<Handler<T>> = self
            .listeners
            .borrow()
            .iter()
            .map(|l| l.handler.clone())
            .collect();
        for handler in snapshot {
            (&mut *handler.borrow_mut())(value);
        }
    }

    /// Number of registered handlers.
    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }
}

impl<T: 'static> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for a registered event handler.
///
/// Dropping the handle unsubscribes; [`Subscription::dispose`] does the same
/// explicitly. Both are idempotent.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    /// Removes the handler from its emitter.
    pub fn dispose(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

// INLINE_TEST_REQUIRED: Tests snapshot semantics of fire() against
// subscribe/unsubscribe happening from inside a handler.
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fire_reaches_all_listeners() {
        let emitter: Emitter<u32> = Emitter::new();
        let hits = Rc::new(Cell::new(0u32));

        let a = hits.clone();
        let _s1 = emitter.subscribe(move |v| a.set(a.get() + *v));
        let b = hits.clone();
        let _s2 = emitter.subscribe(move |v| b.set(b.get() + *v));

        emitter.fire(&3);
        assert_eq!(hits.get(), 6);
    }

    #[test]
    fn test_dispose_removes_listener() {
        let emitter: Emitter<()> = Emitter::new();
        let hits = Rc::new(Cell::new(0u32));

        let a = hits.clone();
        let sub = emitter.subscribe(move |_| a.set(a.get() + 1));
        emitter.fire(&());
        sub.dispose();
        emitter.fire(&());

        assert_eq!(hits.get(), 1);
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let emitter: Emitter<()> = Emitter::new();
        {
            let _sub = emitter.subscribe(|_| {});
            assert_eq!(emitter.listener_count(), 1);
        }
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn test_unsubscribe_during_dispatch_is_safe() {
        let emitter: Rc<Emitter<()>> = Rc::new(Emitter::new());
        let slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

        let slot_in_handler = slot.clone();
        let sub = emitter.subscribe(move |_| {
            // Self-removal mid-dispatch must not panic or skip others.
            slot_in_handler.borrow_mut().take();
        });
        *slot.borrow_mut() = Some(sub);

        emitter.fire(&());
        assert_eq!(emitter.listener_count(), 0);
        emitter.fire(&());
    }
}
