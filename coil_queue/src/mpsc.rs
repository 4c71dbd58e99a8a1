use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crossbeam_utils::{Backoff, CachePadded};

struct Node<T> {
    next: AtomicPtr<Node<T>>,
    value: Option<T>,
}

impl<T> Node<T> {
    fn alloc(value: Option<T>) -> *mut Node<T> {
        Box::into_raw(Box::new(Node {
            next: AtomicPtr::new(ptr::null_mut()),
            value,
        }))
    }
}

/// Intrusive multi-producer single-consumer queue.
///
/// Any number of threads may `push`, only the owning thread may `pop`.
/// This is the mailbox each dispatcher drains for messages posted from
/// other workers.
pub struct Queue<T> {
    head: CachePadded<AtomicPtr<Node<T>>>,
    tail: UnsafeCell<*mut Node<T>>,
}

unsafe impl<T: Send> Send for Queue<T> {}
unsafe impl<T: Send> Sync for Queue<T> {}

impl<T> Queue<T> {
    pub fn new() -> Queue<T> {
        let stub = Node::alloc(None);
        Queue {
            head: CachePadded::new(AtomicPtr::new(stub)),
            tail: UnsafeCell::new(stub),
        }
    }

    pub fn push(&self, t: T) {
        let node = Node::alloc(Some(t));
        let prev = self.head.swap(node, Ordering::AcqRel);
        // the producer owns `prev` until this store publishes the link
        unsafe { (*prev).next.store(node, Ordering::Release) };
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        let tail = unsafe { *self.tail.get() };
        self.head.load(Ordering::Acquire) == tail
    }

    /// Pop from the consumer side.
    ///
    /// # Safety
    ///
    /// Only one thread may pop at a time.
    pub unsafe fn pop(&self) -> Option<T> {
        let tail = *self.tail.get();
        if self.head.load(Ordering::Acquire) == tail {
            return None;
        }

        // a producer swapped head but has not linked the node yet
        let backoff = Backoff::new();
        let next = loop {
            let next = (*tail).next.load(Ordering::Acquire);
            if !next.is_null() {
                break next;
            }
            backoff.snooze();
        };

        debug_assert!((*tail).value.is_none());
        let ret = (*next).value.take();
        drop(Box::from_raw(tail));
        *self.tail.get() = next;
        ret
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Queue::new()
    }
}

impl<T> Drop for Queue<T> {
    fn drop(&mut self) {
        unsafe {
            while self.pop().is_some() {}
            drop(Box::from_raw(*self.tail.get()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_queue() {
        let q: Queue<usize> = Queue::new();
        unsafe {
            assert_eq!(q.pop(), None);
            q.push(1);
            q.push(2);
            assert_eq!(q.pop(), Some(1));
            assert_eq!(q.pop(), Some(2));
        }
        assert!(q.is_empty());
    }

    #[test]
    fn drop_with_pending() {
        let item = Arc::new(());
        let q = Queue::new();
        q.push(item.clone());
        q.push(item.clone());
        drop(q);
        assert_eq!(Arc::strong_count(&item), 1);
    }

    #[test]
    fn many_producers() {
        let nthreads = 8;
        let nmsgs = 1000;
        let q = Arc::new(Queue::new());
        let (tx, rx) = channel();

        for _ in 0..nthreads {
            let tx = tx.clone();
            let q = q.clone();
            thread::spawn(move || {
                for i in 0..nmsgs {
                    q.push(i);
                }
                tx.send(()).unwrap();
            });
        }

        let mut i = 0;
        while i < nthreads * nmsgs {
            if unsafe { q.pop() }.is_some() {
                i += 1;
            }
        }
        drop(tx);
        for _ in 0..nthreads {
            rx.recv().unwrap();
        }
        assert!(q.is_empty());
    }
}
