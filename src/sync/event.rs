use std::cell::Cell;
use std::fmt;

use crate::wait::{Registration, WaitKey, WaitList, WaitResult, Waitable, Waiter};

/// How many waiters a `set` wakes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeMode {
    One,
    All,
}

/// Whether a wakeup consumes the flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    /// the flag stays set until `reset`
    Manual,
    /// a woken waiter clears the flag
    Auto,
}

/// Event primitive
///
/// A boolean flag coroutines of one worker can wait for.
///
/// With `ResetMode::Manual` a set event lets every later wait pass until it
/// is reset. With `ResetMode::Auto` each set lets exactly one wait pass
/// (or all waiters queued at that point, with `WakeMode::All`).
///
/// # Examples
///
/// ```rust
/// use coil::sync::Event;
/// use coil::{Config, Scheduler};
///
/// let sched = Scheduler::new(Config::new()).unwrap();
/// let worker = sched.workers()[0];
/// let ret = sched.block_on(worker, |cx| {
///     let ev = std::rc::Rc::new(Event::new());
///     let ev2 = ev.clone();
///     cx.spawn(move |_| ev2.set());
///     cx.wait(&*ev).is_ok()
/// });
/// assert!(ret.unwrap());
/// ```
pub struct Event {
    flag: Cell<bool>,
    wake: WakeMode,
    reset: ResetMode,
    waiters: WaitList,
}

impl Default for Event {
    fn default() -> Self {
        Event::new()
    }
}

impl Event {
    /// manual reset, wakes every waiter
    pub fn new() -> Self {
        Event::with_mode(WakeMode::All, ResetMode::Manual)
    }

    /// auto reset, wakes one waiter per set
    pub fn auto_reset() -> Self {
        Event::with_mode(WakeMode::One, ResetMode::Auto)
    }

    pub fn with_mode(wake: WakeMode, reset: ResetMode) -> Self {
        Event {
            flag: Cell::new(false),
            wake,
            reset,
            waiters: WaitList::new(),
        }
    }

    pub fn set(&self) {
        match (self.wake, self.reset) {
            (WakeMode::All, ResetMode::Manual) => {
                self.flag.set(true);
                self.waiters.resolve_all(WaitResult::Success);
            }
            (WakeMode::One, ResetMode::Manual) => {
                self.flag.set(true);
                self.waiters.resolve_one(WaitResult::Success);
            }
            (WakeMode::All, ResetMode::Auto) => {
                if self.waiters.resolve_all(WaitResult::Success) == 0 {
                    self.flag.set(true);
                }
            }
            (WakeMode::One, ResetMode::Auto) => {
                if !self.waiters.resolve_one(WaitResult::Success) {
                    self.flag.set(true);
                }
            }
        }
    }

    /// clear the flag, waiters are left alone
    pub fn reset(&self) {
        self.flag.set(false);
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.flag.get()
    }

    /// waiters currently queued
    pub fn waiters(&self) -> usize {
        self.waiters.len()
    }
}

impl Waitable for Event {
    fn register(&self, waiter: Waiter) -> Registration {
        if self.flag.get() {
            if self.reset == ResetMode::Auto {
                self.flag.set(false);
            }
            return Registration::Ready(WaitResult::Success);
        }
        Registration::Pending(self.waiters.push(waiter, ()))
    }

    fn deregister(&self, key: WaitKey) {
        self.waiters.remove(key);
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Event")
            .field("set", &self.is_set())
            .field("wake", &self.wake)
            .field("reset", &self.reset)
            .field("waiters", &self.waiters.len())
            .finish()
    }
}
