use std::cell::{Cell, UnsafeCell};
use std::fmt;
use std::ops::{Deref, DerefMut};

use crate::coroutine::Context;
use crate::wait::{Registration, WaitError, WaitKey, WaitList, WaitResult, Waitable, Waiter};

/// A mutual exclusion primitive for the coroutines of one worker.
///
/// Unlocking hands the lock straight to the oldest waiter, the mutex is
/// never observed unlocked while someone is queued.
///
/// # Examples
///
/// ```rust
/// use std::rc::Rc;
/// use coil::sync::Mutex;
/// use coil::{Config, Scheduler};
///
/// let sched = Scheduler::new(Config::new()).unwrap();
/// let worker = sched.workers()[0];
/// let total = sched.block_on(worker, |cx| {
///     let m = Rc::new(Mutex::new(0));
///     let handles: Vec<_> = (0..10)
///         .map(|_| {
///             let m = m.clone();
///             cx.spawn(move |cx| {
///                 let mut guard = m.lock(cx).unwrap();
///                 cx.yield_now();
///                 *guard += 1;
///             })
///         })
///         .collect();
///     for h in handles {
///         h.join(cx).unwrap();
///     }
///     let n = *m.lock(cx).unwrap();
///     n
/// });
/// assert_eq!(total.unwrap(), 10);
/// ```
pub struct Mutex<T> {
    locked: Cell<bool>,
    waiters: WaitList,
    value: UnsafeCell<T>,
}

impl<T> Mutex<T> {
    pub fn new(t: T) -> Mutex<T> {
        Mutex {
            locked: Cell::new(false),
            waiters: WaitList::new(),
            value: UnsafeCell::new(t),
        }
    }

    fn take_now(&self) -> bool {
        if !self.locked.get() && self.waiters.is_empty() {
            self.locked.set(true);
            return true;
        }
        false
    }

    pub fn lock(&self, cx: &Context) -> Result<MutexGuard<'_, T>, WaitError> {
        if !self.take_now() {
            cx.wait(&LockRequest { mutex: self })?;
        }
        Ok(MutexGuard { mutex: self })
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        if self.take_now() {
            Some(MutexGuard { mutex: self })
        } else {
            None
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked.get()
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    fn unlock(&self) {
        // hand off, the lock stays taken for the new owner
        if !self.waiters.resolve_one(WaitResult::Success) {
            self.locked.set(false);
        }
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Mutex<T> {
        Mutex::new(Default::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.try_lock() {
            Some(guard) => f.debug_struct("Mutex").field("data", &&*guard).finish(),
            None => f.pad("Mutex { <locked> }"),
        }
    }
}

struct LockRequest<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<T> Waitable for LockRequest<'_, T> {
    fn register(&self, waiter: Waiter) -> Registration {
        if self.mutex.take_now() {
            return Registration::Ready(WaitResult::Success);
        }
        Registration::Pending(self.mutex.waiters.push(waiter, ()))
    }

    fn deregister(&self, key: WaitKey) {
        self.mutex.waiters.remove(key);
    }
}

#[must_use]
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.mutex.value.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.value.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

impl<T: fmt::Debug> fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wait::tests::Probe;

    #[test]
    fn try_lock() {
        let m = Mutex::new(());
        let g = m.try_lock().unwrap();
        assert!(m.is_locked());
        assert!(m.try_lock().is_none());
        drop(g);
        assert!(!m.is_locked());
        assert!(m.try_lock().is_some());
    }

    #[test]
    fn unlock_hands_off() {
        let m = Mutex::new(1);
        let g = m.try_lock().unwrap();
        let stale = Probe::refusing();
        let next = Probe::new();
        let req = LockRequest { mutex: &m };
        req.register(stale.clone());
        req.register(next.clone());
        drop(g);
        assert_eq!(next.results(), vec![WaitResult::Success]);
        // owned by `next` now
        assert!(m.is_locked());
        assert!(m.try_lock().is_none());
    }

    #[test]
    fn into_inner_and_get_mut() {
        let mut m = Mutex::new(vec![1]);
        m.get_mut().push(2);
        assert_eq!(m.into_inner(), vec![1, 2]);
    }
}
