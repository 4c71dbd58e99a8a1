//! Shutdown gate for in flight work.
//!
//! Work that must finish before a resource goes away holds a
//! [`DrainerLock`]. Draining is one way: once it began new locks are
//! no-ops and the drainer only waits for the locks already held.
//! Dropping a drainer drains it, the dropping coroutine is suspended
//! until the last lock is gone.

use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::thread;

use crate::coroutine::{wait_running, Context};
use crate::dispatcher::Dispatcher;
use crate::sync::Event;
use crate::wait::WaitError;

struct DrainerInner {
    draining: Cell<bool>,
    locks: Cell<usize>,
    // set when draining begins
    drain_signal: Event,
    // set when draining began and the last lock is gone
    drained: Event,
}

impl DrainerInner {
    fn begin_drain(&self) {
        if self.draining.replace(true) {
            return;
        }
        trace!("drain begins, {} locks outstanding", self.locks.get());
        self.drain_signal.set();
        if self.locks.get() == 0 {
            self.drained.set();
        }
    }

    fn acquire(self: &Rc<Self>) -> DrainerLock {
        let noop = self.draining.get();
        if !noop {
            self.locks.set(self.locks.get() + 1);
        }
        DrainerLock {
            inner: self.clone(),
            noop,
        }
    }
}

pub struct Drainer {
    inner: Rc<DrainerInner>,
    // the worker whose coroutines may block on the drop
    dispatcher: Weak<Dispatcher>,
}

impl Drainer {
    /// A drainer owned by coroutines of the current worker.
    pub fn new(cx: &Context) -> Self {
        Drainer::with_dispatcher(cx.dispatcher().weak())
    }

    fn with_dispatcher(dispatcher: Weak<Dispatcher>) -> Self {
        Drainer {
            inner: Rc::new(DrainerInner {
                draining: Cell::new(false),
                locks: Cell::new(0),
                drain_signal: Event::new(),
                drained: Event::new(),
            }),
            dispatcher,
        }
    }

    /// Hold the drainer open. After draining began this returns a no-op lock.
    pub fn lock(&self) -> DrainerLock {
        self.inner.acquire()
    }

    pub fn is_draining(&self) -> bool {
        self.inner.draining.get()
    }

    /// fires once draining begins, a natural interruptor source for held work
    pub fn drain_signal(&self) -> &Event {
        &self.inner.drain_signal
    }

    /// locks still held
    pub fn outstanding(&self) -> usize {
        self.inner.locks.get()
    }

    /// Begin draining and wait until the last lock is released.
    ///
    /// The wait ignores the interruptor chain.
    pub fn drain(&self, cx: &Context) -> Result<(), WaitError> {
        self.inner.begin_drain();
        if self.inner.drained.is_set() {
            return Ok(());
        }
        cx.wait_uninterruptible(&self.inner.drained)
    }
}

impl Drop for Drainer {
    fn drop(&mut self) {
        self.inner.begin_drain();
        if self.inner.drained.is_set() {
            return;
        }
        // an unwinding coroutine can not switch out any more
        if thread::panicking() {
            warn!(
                "drainer dropped while unwinding, {} locks outstanding",
                self.inner.locks.get()
            );
            return;
        }
        match self.dispatcher.upgrade() {
            // the worker is tearing down every coroutine, nobody is left to wait
            Some(dispatcher) if dispatcher.is_closing() => {
                debug!(
                    "drainer dropped at shutdown, {} locks outstanding",
                    self.inner.locks.get()
                );
            }
            Some(dispatcher) => {
                if let Err(e) = wait_running(&dispatcher, &self.inner.drained) {
                    warn!("drain on drop ended early: {}", e);
                }
            }
            None => fatal!(
                "drainer dropped with {} locks outstanding after its worker exited",
                self.inner.locks.get()
            ),
        }
    }
}

impl fmt::Debug for Drainer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Drainer")
            .field("draining", &self.is_draining())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

/// Keeps a [`Drainer`] from finishing its drain while held.
pub struct DrainerLock {
    inner: Rc<DrainerInner>,
    noop: bool,
}

impl DrainerLock {
    pub fn is_draining(&self) -> bool {
        self.inner.draining.get()
    }

    /// acquired after draining began, it holds nothing
    pub fn is_noop(&self) -> bool {
        self.noop
    }

    pub fn drain_signal(&self) -> &Event {
        &self.inner.drain_signal
    }
}

impl Clone for DrainerLock {
    fn clone(&self) -> Self {
        self.inner.acquire()
    }
}

impl Drop for DrainerLock {
    fn drop(&mut self) {
        if self.noop {
            return;
        }
        let locks = self.inner.locks.get() - 1;
        self.inner.locks.set(locks);
        if locks == 0 && self.inner.draining.get() {
            self.inner.drained.set();
        }
    }
}

impl fmt::Debug for DrainerLock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DrainerLock")
            .field("noop", &self.noop)
            .field("draining", &self.is_draining())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached() -> Drainer {
        Drainer::with_dispatcher(Weak::new())
    }

    #[test]
    fn lock_after_drain_is_noop() {
        let drainer = detached();
        let held = drainer.lock();
        assert_eq!(drainer.outstanding(), 1);

        drainer.inner.begin_drain();
        assert!(drainer.drain_signal().is_set());
        assert!(held.is_draining());

        let late = drainer.lock();
        assert!(late.is_noop());
        let late2 = late.clone();
        assert!(late2.is_noop());
        assert_eq!(drainer.outstanding(), 1);
        drop(late);
        drop(late2);
        assert!(!drainer.inner.drained.is_set());

        drop(held);
        assert!(drainer.inner.drained.is_set());
    }

    #[test]
    fn clone_counts() {
        let drainer = detached();
        let a = drainer.lock();
        let b = a.clone();
        assert_eq!(drainer.outstanding(), 2);
        drop(a);
        drop(b);
        assert_eq!(drainer.outstanding(), 0);
    }

    #[test]
    fn drop_without_locks_returns() {
        let drainer = detached();
        let lock = drainer.lock();
        let signal = drainer.inner.clone();
        drop(lock);
        drop(drainer);
        assert!(signal.drain_signal.is_set());
        assert!(signal.drained.is_set());
    }

    #[test]
    fn lock_outlives_drainer() {
        let drainer = detached();
        drainer.inner.begin_drain();
        let late = drainer.lock();
        drop(drainer);
        assert!(late.is_noop());
        assert!(late.is_draining());
    }
}
