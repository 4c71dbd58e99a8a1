//! Cancellation scopes.
//!
//! An [`Interruptor`] watches a waitable and, once that fires, interrupts
//! every wait of the coroutine made inside the scope. Scopes nest: each one
//! also watches the enclosing scope, so triggering an outer one triggers
//! everything below it.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::thread;

use crate::coroutine::Context;
use crate::wait::{Registration, Resolvable, WaitKey, WaitList, WaitResult, Waitable, Waiter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Armed,
    Triggered,
    Destroyed,
}

/// The shared part of an interruptor, kept alive by the scope and by every
/// coroutine spawned inside it.
pub(crate) struct InterruptorInner {
    state: Cell<State>,
    waiters: WaitList,
}

impl InterruptorInner {
    fn new() -> Self {
        InterruptorInner {
            state: Cell::new(State::Armed),
            waiters: WaitList::new(),
        }
    }

    #[inline]
    pub(crate) fn is_triggered(&self) -> bool {
        self.state.get() == State::Triggered
    }

    #[inline]
    pub(crate) fn is_destroyed(&self) -> bool {
        self.state.get() == State::Destroyed
    }

    fn trigger(&self) {
        if self.state.get() != State::Armed {
            return;
        }
        self.state.set(State::Triggered);
        let n = self.waiters.resolve_all(WaitResult::Interrupted);
        debug!("interruptor triggered, {} waits interrupted", n);
    }
}

impl Resolvable for InterruptorInner {
    fn resolve(&self, result: WaitResult) -> bool {
        match result {
            // a source going away does not cancel anything
            WaitResult::ObjectLost => {}
            // the parent scope reports its trigger as Interrupted
            WaitResult::Success | WaitResult::Interrupted => self.trigger(),
        }
        true
    }
}

impl Waitable for InterruptorInner {
    fn register(&self, waiter: Waiter) -> Registration {
        match self.state.get() {
            State::Armed => Registration::Pending(self.waiters.push(waiter, ())),
            State::Triggered => Registration::Ready(WaitResult::Interrupted),
            State::Destroyed => Registration::Ready(WaitResult::ObjectLost),
        }
    }

    fn deregister(&self, key: WaitKey) {
        self.waiters.remove(key);
    }
}

/// A cancellation scope of the running coroutine.
///
/// While it lives every interruptible wait of the coroutine is also
/// registered with it, and fails with `Interrupted` once `source` fires
/// (or an enclosing scope triggers). Scopes must be dropped in reverse
/// creation order.
pub struct Interruptor<'a> {
    cx: &'a Context,
    inner: Rc<InterruptorInner>,
    source: &'a dyn Waitable,
    source_key: Option<WaitKey>,
    parent: Option<(Rc<InterruptorInner>, Option<WaitKey>)>,
}

impl<'a> Interruptor<'a> {
    pub fn new(cx: &'a Context, source: &'a dyn Waitable) -> Interruptor<'a> {
        let inner = Rc::new(InterruptorInner::new());

        let source_key = match source.register(inner.clone() as Waiter) {
            Registration::Ready(result) => {
                inner.resolve(result);
                None
            }
            Registration::Pending(key) => Some(key),
        };

        let parent = cx.current_interruptor().map(|parent| {
            let key = match parent.register(inner.clone() as Waiter) {
                Registration::Ready(result) => {
                    inner.resolve(result);
                    None
                }
                Registration::Pending(key) => Some(key),
            };
            (parent, key)
        });

        cx.push_interruptor(inner.clone());
        Interruptor {
            cx,
            inner,
            source,
            source_key,
            parent,
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.is_triggered()
    }
}

impl Waitable for Interruptor<'_> {
    fn register(&self, waiter: Waiter) -> Registration {
        self.inner.register(waiter)
    }

    fn deregister(&self, key: WaitKey) {
        self.inner.deregister(key)
    }
}

impl Drop for Interruptor<'_> {
    fn drop(&mut self) {
        let top = self.cx.pop_interruptor();
        let nested = top.map_or(false, |top| Rc::ptr_eq(&top, &self.inner));
        if !nested && !thread::panicking() {
            fatal!("{:?} dropped interruptors out of order", self.cx.id());
        }

        self.inner.state.set(State::Destroyed);
        // coroutines spawned inside the scope may still be waiting on it
        self.inner.waiters.resolve_all(WaitResult::ObjectLost);

        if let Some(key) = self.source_key.take() {
            self.source.deregister(key);
        }
        if let Some((parent, Some(key))) = self.parent.take() {
            parent.deregister(key);
        }
    }
}

impl fmt::Debug for Interruptor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Interruptor")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}

/// Detach the coroutine's interruptor chain until dropped.
///
/// Waits made meanwhile can not be interrupted. The chain is put back
/// untouched on drop.
pub struct InterruptorClear<'a> {
    cx: &'a Context,
    saved: Option<Vec<Rc<InterruptorInner>>>,
}

impl<'a> InterruptorClear<'a> {
    pub fn new(cx: &'a Context) -> InterruptorClear<'a> {
        let saved = cx.take_interruptors();
        InterruptorClear {
            cx,
            saved: Some(saved),
        }
    }
}

impl Drop for InterruptorClear<'_> {
    fn drop(&mut self) {
        let saved = self.saved.take().unwrap_or_default();
        let cleared = self.cx.restore_interruptors(saved);
        if !cleared.is_empty() && !thread::panicking() {
            fatal!("{:?} interruptor outlived its clear scope", self.cx.id());
        }
    }
}

impl fmt::Debug for InterruptorClear<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.pad("InterruptorClear { .. }")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wait::tests::Probe;

    #[test]
    fn trigger_interrupts_waiters_once() {
        let inner = InterruptorInner::new();
        let p = Probe::new();
        assert!(matches!(inner.register(p.clone()), Registration::Pending(_)));
        inner.resolve(WaitResult::Success);
        inner.resolve(WaitResult::Success);
        assert_eq!(p.results(), vec![WaitResult::Interrupted]);
        assert!(inner.is_triggered());
        assert_eq!(
            inner.register(Probe::new()),
            Registration::Ready(WaitResult::Interrupted)
        );
    }

    #[test]
    fn lost_source_does_not_trigger() {
        let inner = InterruptorInner::new();
        inner.resolve(WaitResult::ObjectLost);
        assert!(!inner.is_triggered());
    }

    #[test]
    fn nested_trigger_propagates() {
        let outer = Rc::new(InterruptorInner::new());
        let inner = Rc::new(InterruptorInner::new());
        let p = Probe::new();
        outer.register(inner.clone());
        inner.register(p.clone());
        outer.resolve(WaitResult::Success);
        assert!(inner.is_triggered());
        assert_eq!(p.results(), vec![WaitResult::Interrupted]);
    }
}
