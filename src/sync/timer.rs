use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use crate::coroutine::Context;
use crate::dispatcher::Dispatcher;
use crate::io::TimerCallback;
use crate::timeout_list::TimerToken;
use crate::wait::{Registration, WaitKey, WaitList, WaitResult, Waitable, Waiter};

struct SingleInner {
    fired: Cell<bool>,
    // `None` once fired or cancelled
    token: Cell<Option<TimerToken>>,
    waiters: WaitList,
}

impl TimerCallback for SingleInner {
    fn on_timer(self: Rc<Self>) {
        self.token.set(None);
        self.fired.set(true);
        self.waiters.resolve_all(WaitResult::Success);
    }
}

/// One shot timer. Once fired it stays fired until restarted.
pub struct SingleTimer {
    inner: Rc<SingleInner>,
    dispatcher: Rc<Dispatcher>,
}

impl SingleTimer {
    pub fn new(cx: &Context, dur: Duration) -> SingleTimer {
        let inner = Rc::new(SingleInner {
            fired: Cell::new(false),
            token: Cell::new(None),
            waiters: WaitList::new(),
        });
        let dispatcher = cx.dispatcher().clone();
        let token = dispatcher.add_timer(Instant::now() + dur, inner.clone());
        inner.token.set(Some(token));
        SingleTimer { inner, dispatcher }
    }

    pub fn is_fired(&self) -> bool {
        self.inner.fired.get()
    }

    /// Stop the timer. Pending waits fail with `ObjectLost`.
    pub fn cancel(&self) {
        if let Some(token) = self.inner.token.take() {
            self.dispatcher.remove_timer(token);
        }
        self.inner.waiters.resolve_all(WaitResult::ObjectLost);
    }

    /// arm again to fire `dur` from now, fired or not
    pub fn restart(&self, dur: Duration) {
        let deadline = Instant::now() + dur;
        self.inner.fired.set(false);
        if let Some(token) = self.inner.token.get() {
            if self.dispatcher.update_timer(token, deadline) {
                return;
            }
        }
        let token = self.dispatcher.add_timer(deadline, self.inner.clone());
        self.inner.token.set(Some(token));
    }
}

impl Waitable for SingleTimer {
    fn register(&self, waiter: Waiter) -> Registration {
        if self.inner.fired.get() {
            return Registration::Ready(WaitResult::Success);
        }
        if self.inner.token.get().is_none() {
            // cancelled, it would never fire
            return Registration::Ready(WaitResult::ObjectLost);
        }
        Registration::Pending(self.inner.waiters.push(waiter, ()))
    }

    fn deregister(&self, key: WaitKey) {
        self.inner.waiters.remove(key);
    }
}

impl Drop for SingleTimer {
    fn drop(&mut self) {
        if let Some(token) = self.inner.token.take() {
            self.dispatcher.remove_timer(token);
        }
    }
}

impl fmt::Debug for SingleTimer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SingleTimer")
            .field("fired", &self.is_fired())
            .finish()
    }
}

struct PeriodicInner {
    period: Duration,
    deadline: Cell<Instant>,
    ticks: Cell<u64>,
    token: Cell<Option<TimerToken>>,
    waiters: WaitList,
    // the timer list owns this, no strong way back
    dispatcher: Weak<Dispatcher>,
}

impl TimerCallback for PeriodicInner {
    fn on_timer(self: Rc<Self>) {
        self.ticks.set(self.ticks.get() + 1);
        // no drift, the next tick is relative to the previous deadline
        let next = self.deadline.get() + self.period;
        self.deadline.set(next);
        match self.dispatcher.upgrade() {
            Some(dispatcher) => {
                let token = dispatcher.add_timer(next, self.clone());
                self.token.set(Some(token));
            }
            None => self.token.set(None),
        }
        self.waiters.resolve_all(WaitResult::Success);
    }
}

/// Timer that fires every `period` until cancelled or dropped.
///
/// Every tick wakes the waits pending at that moment. It never reports
/// ready on registration, a wait always waits for the next tick.
pub struct PeriodicTimer {
    inner: Rc<PeriodicInner>,
    dispatcher: Rc<Dispatcher>,
}

impl PeriodicTimer {
    pub fn new(cx: &Context, period: Duration) -> PeriodicTimer {
        assert!(!period.is_zero(), "periodic timer without a period");
        let dispatcher = cx.dispatcher().clone();
        let deadline = Instant::now() + period;
        let inner = Rc::new(PeriodicInner {
            period,
            deadline: Cell::new(deadline),
            ticks: Cell::new(0),
            token: Cell::new(None),
            waiters: WaitList::new(),
            dispatcher: dispatcher.weak(),
        });
        let token = dispatcher.add_timer(deadline, inner.clone());
        inner.token.set(Some(token));
        PeriodicTimer { inner, dispatcher }
    }

    /// how many times it fired so far
    pub fn ticks(&self) -> u64 {
        self.inner.ticks.get()
    }

    pub fn period(&self) -> Duration {
        self.inner.period
    }

    /// Stop ticking. Pending waits fail with `ObjectLost`.
    pub fn cancel(&self) {
        if let Some(token) = self.inner.token.take() {
            self.dispatcher.remove_timer(token);
        }
        self.inner.waiters.resolve_all(WaitResult::ObjectLost);
    }
}

impl Waitable for PeriodicTimer {
    fn register(&self, waiter: Waiter) -> Registration {
        if self.inner.token.get().is_none() {
            return Registration::Ready(WaitResult::ObjectLost);
        }
        Registration::Pending(self.inner.waiters.push(waiter, ()))
    }

    fn deregister(&self, key: WaitKey) {
        self.inner.waiters.remove(key);
    }
}

impl Drop for PeriodicTimer {
    fn drop(&mut self) {
        if let Some(token) = self.inner.token.take() {
            self.dispatcher.remove_timer(token);
        }
    }
}

impl fmt::Debug for PeriodicTimer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PeriodicTimer")
            .field("period", &self.inner.period)
            .field("ticks", &self.ticks())
            .finish()
    }
}
