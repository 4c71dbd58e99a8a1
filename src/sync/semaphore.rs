use std::cell::Cell;
use std::fmt;
use std::ptr;

use crate::coroutine::Context;
use crate::wait::{Registration, WaitError, WaitKey, WaitList, WaitResult, Waitable, Waiter};

/// Semaphore primitive
///
/// A bounded count shared by the coroutines of one worker. Waiters are
/// served strictly FIFO: a large request at the head holds back smaller
/// ones behind it.
pub struct Semaphore {
    capacity: Cell<usize>,
    // negative while a capacity shrink is not yet covered by releases
    available: Cell<isize>,
    // tagged with the requested count
    waiters: WaitList<usize>,
}

impl Semaphore {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "semaphore without capacity");
        assert!(capacity < isize::MAX as usize);
        Semaphore {
            capacity: Cell::new(capacity),
            available: Cell::new(capacity as isize),
            waiters: WaitList::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// units free right now, zero while over committed
    pub fn available(&self) -> usize {
        self.available.get().max(0) as usize
    }

    fn clamp(&self, count: usize) -> usize {
        assert!(count > 0, "acquire of zero units");
        count.min(self.capacity.get())
    }

    fn take_now(&self, count: usize) -> bool {
        if self.waiters.is_empty() && self.available.get() >= count as isize {
            self.available.set(self.available.get() - count as isize);
            return true;
        }
        false
    }

    /// Acquire `count` units, waiting in line if they are not free.
    ///
    /// Requests above the capacity are clamped to it.
    pub fn acquire(&self, cx: &Context, count: usize) -> Result<SemaphoreAcq<'_>, WaitError> {
        let count = self.clamp(count);
        if !self.take_now(count) {
            cx.wait(&AcquireRequest { sem: self, count })?;
        }
        Ok(SemaphoreAcq { sem: self, count })
    }

    pub fn try_acquire(&self, count: usize) -> Option<SemaphoreAcq<'_>> {
        let count = self.clamp(count);
        if self.take_now(count) {
            Some(SemaphoreAcq { sem: self, count })
        } else {
            None
        }
    }

    /// Change the capacity. Units already held stay held, a shrink is paid
    /// back by the next releases.
    pub fn set_capacity(&self, capacity: usize) {
        assert!(capacity > 0, "semaphore without capacity");
        let diff = capacity as isize - self.capacity.get() as isize;
        self.capacity.set(capacity);
        self.available.set(self.available.get() + diff);
        self.pump();
    }

    fn release(&self, count: usize) {
        let available = self.available.get() + count as isize;
        if available > self.capacity.get() as isize {
            fatal!(
                "semaphore released more than it holds, available={} capacity={}",
                available,
                self.capacity.get()
            );
        }
        self.available.set(available);
        self.pump();
    }

    // grant the head of the line as long as it fits
    fn pump(&self) {
        loop {
            let count = match self.waiters.peek_front(|count| *count) {
                Some(count) if self.available.get() >= count as isize => count,
                _ => break,
            };
            let (waiter, _) = match self.waiters.pop_front() {
                Some(entry) => entry,
                None => break,
            };
            self.available.set(self.available.get() - count as isize);
            if !waiter.resolve(WaitResult::Success) {
                // that wait is already over
                self.available.set(self.available.get() + count as isize);
            }
        }
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Semaphore")
            .field("capacity", &self.capacity())
            .field("available", &self.available.get())
            .field("waiters", &self.waiters.len())
            .finish()
    }
}

// the waitable a blocked acquire parks on, granted units are already taken
struct AcquireRequest<'a> {
    sem: &'a Semaphore,
    count: usize,
}

impl Waitable for AcquireRequest<'_> {
    fn register(&self, waiter: Waiter) -> Registration {
        if self.sem.take_now(self.count) {
            return Registration::Ready(WaitResult::Success);
        }
        Registration::Pending(self.sem.waiters.push(waiter, self.count))
    }

    fn deregister(&self, key: WaitKey) {
        if self.sem.waiters.remove(key).is_some() {
            // a large request leaving the head may unblock the next one
            self.sem.pump();
        }
    }
}

/// Units held from a [`Semaphore`], given back on drop.
#[must_use = "the units are released right away if the acquisition is dropped"]
pub struct SemaphoreAcq<'a> {
    sem: &'a Semaphore,
    count: usize,
}

impl<'a> SemaphoreAcq<'a> {
    pub fn count(&self) -> usize {
        self.count
    }

    /// merge `other` into this acquisition, both must come from the same semaphore
    pub fn combine(&mut self, mut other: SemaphoreAcq<'a>) {
        assert!(
            ptr::eq(self.sem, other.sem),
            "combining acquisitions of different semaphores"
        );
        self.count += std::mem::take(&mut other.count);
    }

    /// Shrink the acquisition to `count`, releasing the rest.
    pub fn change_count(&mut self, count: usize) {
        assert!(count <= self.count, "an acquisition can only shrink");
        let released = self.count - count;
        self.count = count;
        if released > 0 {
            self.sem.release(released);
        }
    }

    pub fn release(self) {
        drop(self)
    }
}

impl Drop for SemaphoreAcq<'_> {
    fn drop(&mut self) {
        if self.count > 0 {
            self.sem.release(self.count);
        }
    }
}

impl fmt::Debug for SemaphoreAcq<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SemaphoreAcq")
            .field("count", &self.count)
            .finish()
    }
}
