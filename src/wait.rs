//! The wait protocol shared by every primitive.
//!
//! A primitive implements [`Waitable`]: it accepts a [`Waiter`] and either
//! resolves it on the spot (`Registration::Ready`) or queues it and hands
//! back a [`WaitKey`] that can later take it off the queue again. When the
//! primitive's state changes it resolves queued waiters through
//! [`Resolvable::resolve`].
//!
//! All of this is confined to one worker thread, so the queues are plain
//! `RefCell`s and there is no window between "check" and "register".

use std::cell::RefCell;
use std::error::Error;
use std::fmt;
use std::io;
use std::rc::Rc;

use coil_queue::{Key, List};

/// Outcome of a wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    Success,
    /// a cancellation scope covering the wait was triggered
    Interrupted,
    /// the awaited object was destroyed while the wait was pending
    ObjectLost,
}

impl WaitResult {
    #[inline]
    pub fn is_success(self) -> bool {
        self == WaitResult::Success
    }

    pub fn into_result(self) -> Result<(), WaitError> {
        match self {
            WaitResult::Success => Ok(()),
            WaitResult::Interrupted => Err(WaitError::Interrupted),
            WaitResult::ObjectLost => Err(WaitError::ObjectLost),
        }
    }
}

/// The failing outcomes of a wait, surfaced at the suspension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    Interrupted,
    ObjectLost,
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WaitError::Interrupted => write!(f, "wait interrupted"),
            WaitError::ObjectLost => write!(f, "awaited object was destroyed"),
        }
    }
}

impl Error for WaitError {}

impl From<WaitError> for WaitResult {
    fn from(e: WaitError) -> Self {
        match e {
            WaitError::Interrupted => WaitResult::Interrupted,
            WaitError::ObjectLost => WaitResult::ObjectLost,
        }
    }
}

impl From<WaitError> for io::Error {
    fn from(e: WaitError) -> Self {
        let kind = match e {
            WaitError::Interrupted => io::ErrorKind::Interrupted,
            WaitError::ObjectLost => io::ErrorKind::Other,
        };
        io::Error::new(kind, e)
    }
}

/// Something that can be woken with a [`WaitResult`].
pub trait Resolvable {
    /// Deliver the result.
    ///
    /// Returns `false` when the waiter had already been resolved by someone
    /// else and refuses this delivery. Primitives that hand out a resource
    /// with the wakeup pass it on to the next waiter in that case.
    fn resolve(&self, result: WaitResult) -> bool;
}

pub type Waiter = Rc<dyn Resolvable>;

/// Handle of a queued waiter, returned by [`Waitable::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaitKey(pub(crate) Key);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// the condition already holds, the waiter was not queued
    Ready(WaitResult),
    Pending(WaitKey),
}

/// Anything a coroutine can block on.
pub trait Waitable {
    fn register(&self, waiter: Waiter) -> Registration;
    /// Take a pending waiter off the queue. A key whose waiter was
    /// already resolved is ignored.
    fn deregister(&self, key: WaitKey);
}

impl<W: Waitable + ?Sized> Waitable for Rc<W> {
    fn register(&self, waiter: Waiter) -> Registration {
        (**self).register(waiter)
    }

    fn deregister(&self, key: WaitKey) {
        (**self).deregister(key)
    }
}

/// FIFO of pending waiters, each tagged with a per-primitive value `E`.
///
/// Waiters still queued when the list is dropped are resolved with
/// [`WaitResult::ObjectLost`].
pub struct WaitList<E = ()> {
    list: RefCell<List<(Waiter, E)>>,
}

impl<E> Default for WaitList<E> {
    fn default() -> Self {
        WaitList::new()
    }
}

impl<E> WaitList<E> {
    pub fn new() -> Self {
        WaitList {
            list: RefCell::new(List::new()),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.list.borrow().is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.list.borrow().len()
    }

    pub fn push(&self, waiter: Waiter, tag: E) -> WaitKey {
        WaitKey(self.list.borrow_mut().push_back((waiter, tag)))
    }

    pub fn remove(&self, key: WaitKey) -> Option<(Waiter, E)> {
        self.list.borrow_mut().remove(key.0)
    }

    pub fn pop_front(&self) -> Option<(Waiter, E)> {
        self.list.borrow_mut().pop_front()
    }

    /// run `f` on the front entry's tag
    pub fn peek_front<R>(&self, f: impl FnOnce(&E) -> R) -> Option<R> {
        self.list.borrow().front().map(|(_, tag)| f(tag))
    }

    /// Resolve waiters from the front until one accepts.
    ///
    /// Returns `true` if some waiter took the result.
    pub fn resolve_one(&self, result: WaitResult) -> bool {
        // the borrow must not be held while resolving, a waiter may
        // come straight back to this list
        while let Some((waiter, _)) = self.pop_front() {
            if waiter.resolve(result) {
                return true;
            }
        }
        false
    }

    /// Resolve every queued waiter in registration order, returns how many
    /// accepted. Waiters registered while this runs are left queued.
    pub fn resolve_all(&self, result: WaitResult) -> usize {
        let waiters: Vec<_> = self.list.borrow_mut().drain().collect();
        waiters
            .into_iter()
            .filter(|(waiter, _)| waiter.resolve(result))
            .count()
    }
}

impl<E> Drop for WaitList<E> {
    fn drop(&mut self) {
        let waiters: Vec<_> = self.list.get_mut().drain().collect();
        if !waiters.is_empty() {
            warn!("{} waiters lost their object", waiters.len());
        }
        for (waiter, _) in waiters {
            waiter.resolve(WaitResult::ObjectLost);
        }
    }
}

impl<E> fmt::Debug for WaitList<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("WaitList").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    /// records every delivery, optionally refusing all of them
    pub(crate) struct Probe {
        pub(crate) got: RefCell<Vec<WaitResult>>,
        accept: Cell<bool>,
    }

    impl Probe {
        pub(crate) fn new() -> Rc<Probe> {
            Rc::new(Probe {
                got: RefCell::new(Vec::new()),
                accept: Cell::new(true),
            })
        }

        pub(crate) fn refusing() -> Rc<Probe> {
            let p = Probe::new();
            p.accept.set(false);
            p
        }

        pub(crate) fn results(&self) -> Vec<WaitResult> {
            self.got.borrow().clone()
        }
    }

    impl Resolvable for Probe {
        fn resolve(&self, result: WaitResult) -> bool {
            self.got.borrow_mut().push(result);
            self.accept.get()
        }
    }

    #[test]
    fn resolve_one_skips_refusals() {
        let list = WaitList::new();
        let a = Probe::refusing();
        let b = Probe::new();
        let c = Probe::new();
        list.push(a.clone(), ());
        list.push(b.clone(), ());
        list.push(c.clone(), ());
        assert!(list.resolve_one(WaitResult::Success));
        assert_eq!(a.results(), vec![WaitResult::Success]);
        assert_eq!(b.results(), vec![WaitResult::Success]);
        assert!(c.results().is_empty());
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn resolve_all_in_order() {
        let list = WaitList::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        struct Tagged(usize, Rc<RefCell<Vec<usize>>>);
        impl Resolvable for Tagged {
            fn resolve(&self, _: WaitResult) -> bool {
                self.1.borrow_mut().push(self.0);
                true
            }
        }
        for i in 0..4 {
            list.push(Rc::new(Tagged(i, order.clone())), ());
        }
        assert_eq!(list.resolve_all(WaitResult::Success), 4);
        assert_eq!(*order.borrow(), vec![0, 1, 2, 3]);
        assert!(list.is_empty());
    }

    #[test]
    fn removed_waiter_is_not_resolved() {
        let list = WaitList::new();
        let a = Probe::new();
        let key = list.push(a.clone(), ());
        assert!(list.remove(key).is_some());
        // stale key
        assert!(list.remove(key).is_none());
        list.resolve_all(WaitResult::Success);
        assert!(a.results().is_empty());
    }

    #[test]
    fn drop_resolves_object_lost() {
        let a = Probe::new();
        {
            let list = WaitList::new();
            list.push(a.clone(), ());
        }
        assert_eq!(a.results(), vec![WaitResult::ObjectLost]);
    }

    #[test]
    fn wait_error_into_io() {
        let e: io::Error = WaitError::Interrupted.into();
        assert_eq!(e.kind(), io::ErrorKind::Interrupted);
        assert_eq!(WaitResult::ObjectLost.into_result(), Err(WaitError::ObjectLost));
    }
}
