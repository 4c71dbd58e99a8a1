use std::cell::RefCell;

use crate::coroutine_impl::{raw_coroutine, CoroutineImpl};

/// the raw coroutine pool, with stack and register prepared
///
/// One per dispatcher, so it is a plain LIFO: the most recently retired
/// stack is the warmest one.
pub(crate) struct CoroutinePool {
    pool: RefCell<Vec<CoroutineImpl>>,
    stack_size: usize,
    capacity: usize,
}

impl CoroutinePool {
    pub fn new(stack_size: usize, capacity: usize) -> Self {
        CoroutinePool {
            pool: RefCell::new(Vec::with_capacity(capacity)),
            stack_size,
            capacity,
        }
    }

    /// get a raw coroutine from the pool
    #[inline]
    pub fn get(&self) -> CoroutineImpl {
        match self.pool.borrow_mut().pop() {
            Some(co) => co,
            None => raw_coroutine(self.stack_size),
        }
    }

    /// put a finished coroutine into the pool
    #[inline]
    pub fn put(&self, co: CoroutineImpl) {
        debug_assert!(co.is_done());
        let mut pool = self.pool.borrow_mut();
        // discard the co if the pool is full
        if pool.len() >= self.capacity {
            return;
        }
        pool.push(co);
    }

    pub fn len(&self) -> usize {
        self.pool.borrow().len()
    }

    /// release every pooled stack
    pub fn clear(&self) {
        let drained: Vec<_> = self.pool.borrow_mut().drain(..).collect();
        drop(drained);
    }
}
