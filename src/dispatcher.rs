use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::{Duration, Instant};

use coil_queue::{Arena, Key};

use crate::cancel::InterruptorInner;
use crate::coroutine::Context;
use crate::coroutine_impl::{
    is_cancel_panic, AssertSend, CoroutineId, CoroutineImpl, CoroutineLocal, Switch,
};
use crate::io::{Selector, TimerCallback};
use crate::pool::CoroutinePool;
use crate::scheduler::{Message, Shared, WorkerId};
use crate::signal::SignalInner;
use crate::timeout_list::{TimeoutList, TimerToken};
use crate::wait::{Resolvable, WaitResult};

/// body of a coroutine, run with the coroutine's own context
pub(crate) type Body = Box<dyn FnOnce(&Context)>;
/// called once the coroutine retired, with the panic payload if it panicked
pub(crate) type ExitHook = Box<dyn FnOnce(Option<Box<dyn Any + Send>>)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Runnable,
    Running,
    Suspended,
}

struct Slot {
    // dropped before `local`, an unfinished coroutine still points at it
    co: Option<CoroutineImpl>,
    state: State,
    // result of the wait this coroutine is resumed from
    pending: Option<WaitResult>,
    local: Box<CoroutineLocal>,
    on_exit: Option<ExitHook>,
}

/// Snapshot of a worker's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    /// coroutines ever spawned on this worker
    pub spawned: u64,
    /// coroutines that ran to completion on this worker
    pub retired: u64,
    /// coroutines alive right now
    pub outstanding: usize,
    /// coroutines waiting in the run queue
    pub runnable: usize,
    /// finished stacks kept for reuse
    pub pooled: usize,
    /// times a coroutine was switched into
    pub swaps: u64,
}

/// One worker thread's coroutine engine.
///
/// Everything here is touched from the owning thread only. Other workers
/// reach it through the mailbox in [`Shared`].
pub(crate) struct Dispatcher {
    worker: WorkerId,
    shared: Arc<Shared>,
    me: Weak<Dispatcher>,
    max_swaps: usize,
    slots: RefCell<Arena<Slot>>,
    run_queue: RefCell<VecDeque<CoroutineId>>,
    running: Cell<Option<CoroutineId>>,
    no_swap: Cell<usize>,
    pool: CoroutinePool,
    timers: RefCell<TimeoutList<Rc<dyn TimerCallback>>>,
    selector: Selector,
    signals: RefCell<Arena<Rc<SignalInner>>>,
    // net change of live coroutines since the last `run` returned
    delta: Cell<isize>,
    spawned: Cell<u64>,
    swaps: Cell<u64>,
    retired: Cell<u64>,
    closing: Cell<bool>,
}

impl Dispatcher {
    pub fn new(
        worker: WorkerId,
        shared: Arc<Shared>,
        selector: Selector,
        stack_size: usize,
        pool_capacity: usize,
        max_swaps: usize,
    ) -> Rc<Self> {
        Rc::new_cyclic(|me| Dispatcher {
            worker,
            shared,
            me: me.clone(),
            max_swaps,
            slots: RefCell::new(Arena::new()),
            run_queue: RefCell::new(VecDeque::new()),
            running: Cell::new(None),
            no_swap: Cell::new(0),
            pool: CoroutinePool::new(stack_size, pool_capacity),
            timers: RefCell::new(TimeoutList::new()),
            selector,
            signals: RefCell::new(Arena::new()),
            delta: Cell::new(0),
            spawned: Cell::new(0),
            swaps: Cell::new(0),
            retired: Cell::new(0),
            closing: Cell::new(false),
        })
    }

    #[inline]
    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    #[inline]
    pub fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    #[inline]
    pub fn weak(&self) -> Weak<Dispatcher> {
        self.me.clone()
    }

    #[inline]
    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    #[inline]
    pub fn running(&self) -> Option<CoroutineId> {
        self.running.get()
    }

    #[inline]
    pub fn swap_permitted(&self) -> bool {
        self.no_swap.get() == 0
    }

    pub fn forbid_swap(&self) {
        self.no_swap.set(self.no_swap.get() + 1);
    }

    pub fn permit_swap(&self) {
        let n = self.no_swap.get();
        if n == 0 {
            fatal!("{:?} unbalanced swap permission", self.worker);
        }
        self.no_swap.set(n - 1);
    }

    #[inline]
    pub fn is_closing(&self) -> bool {
        self.closing.get()
    }

    pub fn has_runnable(&self) -> bool {
        !self.run_queue.borrow().is_empty()
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            spawned: self.spawned.get(),
            retired: self.retired.get(),
            outstanding: self.slots.borrow().len(),
            runnable: self.run_queue.borrow().len(),
            pooled: self.pool.len(),
            swaps: self.swaps.get(),
        }
    }

    /// Create a coroutine and put it on the run queue.
    ///
    /// `counted` coroutines add to the worker's outstanding delta, remote
    /// spawns were already counted by the poster. `front` puts it at the
    /// head of the run queue so it is the next one to run.
    pub fn spawn(
        &self,
        body: Body,
        on_exit: ExitHook,
        interruptors: Vec<Rc<InterruptorInner>>,
        counted: bool,
        front: bool,
    ) -> CoroutineId {
        let mut co = self.pool.get();
        let mut slots = self.slots.borrow_mut();
        let key = slots.insert_with(|key| Slot {
            co: None,
            state: State::Runnable,
            pending: None,
            local: Box::new(CoroutineLocal {
                id: CoroutineId(key),
            }),
            on_exit: Some(on_exit),
        });
        let id = CoroutineId(key);

        let dispatcher = match self.me.upgrade() {
            Some(d) => d,
            None => unreachable!("dispatcher used after drop"),
        };
        let body = AssertSend::new(move || {
            let cx = Context::new(dispatcher, id, interruptors);
            body(&cx);
        });
        co.init_code(move || {
            let body = body.into_inner();
            body();
            Switch::Exit
        });

        let slot = match slots.get_mut(key) {
            Some(slot) => slot,
            None => unreachable!(),
        };
        let local: *mut CoroutineLocal = &mut *slot.local;
        co.set_local_data(local as *mut u8);
        slot.co = Some(co);
        drop(slots);

        let mut run_queue = self.run_queue.borrow_mut();
        if front {
            run_queue.push_front(id);
        } else {
            run_queue.push_back(id);
        }

        self.spawned.set(self.spawned.get() + 1);
        if counted {
            self.delta.set(self.delta.get() + 1);
        }
        trace!("spawn {:?} on {:?}", id, self.worker);
        id
    }

    /// Make a suspended coroutine runnable, it resumes with `result`.
    ///
    /// A coroutine that is still running keeps the result and is requeued
    /// as soon as it switches out to wait. Stale ids are ignored.
    pub fn notify(&self, id: CoroutineId, result: WaitResult) {
        let mut slots = self.slots.borrow_mut();
        let slot = match slots.get_mut(id.0) {
            Some(slot) => slot,
            None => {
                if !self.closing.get() {
                    warn!("notify {:?} which already retired", id);
                }
                return;
            }
        };
        trace!("notify {:?} with {:?}", id, result);
        match slot.state {
            State::Suspended => {
                slot.state = State::Runnable;
                slot.pending = Some(result);
                self.run_queue.borrow_mut().push_back(id);
            }
            State::Running => slot.pending = Some(result),
            State::Runnable => warn!("notify {:?} which is already runnable", id),
        }
    }

    /// Resume runnable coroutines until the run queue is empty or the swap
    /// cap is hit. Returns the net change of live coroutines.
    pub fn run(&self) -> isize {
        let mut swaps = 0;
        while swaps < self.max_swaps {
            let id = match self.run_queue.borrow_mut().pop_front() {
                Some(id) => id,
                None => break,
            };
            self.resume(id);
            swaps += 1;
        }
        self.delta.replace(0)
    }

    fn resume(&self, id: CoroutineId) {
        let mut co = {
            let mut slots = self.slots.borrow_mut();
            let slot = match slots.get_mut(id.0) {
                Some(slot) => slot,
                None => return,
            };
            debug_assert_eq!(slot.state, State::Runnable);
            debug_assert_eq!(slot.local.id, id);
            let mut co = match slot.co.take() {
                Some(co) => co,
                None => unreachable!("{:?} is runnable without a context", id),
            };
            slot.state = State::Running;
            co.set_para(slot.pending.take().unwrap_or(WaitResult::Success));
            co
        };

        co.prefetch();
        self.swaps.set(self.swaps.get() + 1);
        self.running.set(Some(id));
        let ret = co.resume();
        self.running.set(None);

        match ret {
            Some(Switch::Yield) => self.park(id, co, true),
            Some(Switch::Wait) => self.park(id, co, false),
            Some(Switch::Exit) | None => self.retire(id, co),
        }
    }

    fn park(&self, id: CoroutineId, co: CoroutineImpl, requeue: bool) {
        let mut slots = self.slots.borrow_mut();
        let slot = match slots.get_mut(id.0) {
            Some(slot) => slot,
            None => unreachable!("{:?} vanished while running", id),
        };
        slot.co = Some(co);
        // a wakeup delivered while it was still running
        if requeue || slot.pending.is_some() {
            slot.state = State::Runnable;
            self.run_queue.borrow_mut().push_back(id);
        } else {
            slot.state = State::Suspended;
        }
    }

    // the coroutine's stack is no longer in use once we are back here
    fn retire(&self, id: CoroutineId, mut co: CoroutineImpl) {
        let slot = match self.slots.borrow_mut().remove(id.0) {
            Some(slot) => slot,
            None => unreachable!("{:?} vanished while running", id),
        };
        let panic = co.get_panic_data();

        let (size, used) = co.stack_usage();
        if used == size {
            fatal!("{:?} stack overflow detected, size={}", id, size);
        }
        // show the actual used stack size in debug log
        if size & 1 == 1 {
            debug!("{:?} stack size = {}, used size = {}", id, size, used);
        }
        self.pool.put(co);
        drop(slot.local);

        self.retired.set(self.retired.get() + 1);
        self.delta.set(self.delta.get() - 1);
        trace!("retire {:?}", id);

        match panic.as_deref() {
            Some(p) if is_cancel_panic(p) => debug!("{:?} cancelled", id),
            Some(_) => error!("{:?} on {:?} panicked", id, self.worker),
            None => {}
        }
        if let Some(on_exit) = slot.on_exit {
            on_exit(panic);
        }
    }

    pub fn add_timer(&self, deadline: Instant, callback: Rc<dyn TimerCallback>) -> TimerToken {
        self.timers.borrow_mut().add_timer(deadline, callback)
    }

    pub fn remove_timer(&self, token: TimerToken) -> bool {
        // dropped outside the borrow, the callback may own timers itself
        let removed = self.timers.borrow_mut().remove_timer(token);
        removed.is_some()
    }

    pub fn update_timer(&self, token: TimerToken, deadline: Instant) -> bool {
        self.timers.borrow_mut().update_timer(token, deadline)
    }

    /// fire every elapsed timer, in deadline order
    fn fire_timers(&self) -> usize {
        let expired = self.timers.borrow_mut().expire(Instant::now());
        let n = expired.len();
        for callback in expired {
            callback.on_timer();
        }
        n
    }

    fn next_timeout(&self) -> Option<Duration> {
        self.timers.borrow().next_timeout(Instant::now())
    }

    pub fn add_signal(&self, signal: Rc<SignalInner>) -> Key {
        self.signals.borrow_mut().insert(signal)
    }

    pub fn remove_signal(&self, key: Key) {
        let removed = self.signals.borrow_mut().remove(key);
        drop(removed);
    }

    fn pulse_signal(&self, key: Key, result: WaitResult) {
        let signal = self.signals.borrow().get(key).cloned();
        match signal {
            Some(signal) => {
                signal.resolve(result);
            }
            None => trace!("pulse for a dropped signal"),
        }
    }

    /// handle every queued message, returns `true` once shutdown was requested
    fn drain_mailbox(&self) -> bool {
        let mut shutdown = false;
        while let Some(msg) = unsafe { self.shared.pop_message(self.worker) } {
            match msg {
                Message::Spawn(f) => f(self),
                Message::Pulse(key, result) => self.pulse_signal(key, result),
                Message::Shutdown => shutdown = true,
            }
        }
        shutdown
    }

    /// The worker loop: mailbox, timers, run queue, then poll for fds.
    pub fn run_loop(&self) {
        loop {
            if self.drain_mailbox() {
                break;
            }
            self.fire_timers();
            let delta = self.run();
            self.shared.account(delta);

            let timeout = if self.has_runnable() {
                Some(Duration::ZERO)
            } else {
                self.next_timeout()
            };
            if let Err(e) = self.selector.select(timeout) {
                error!("{:?} failed to poll: {}", self.worker, e);
                break;
            }
        }
        self.shutdown();
    }

    /// Unwind every coroutine still alive and release the pooled stacks.
    pub fn shutdown(&self) {
        self.closing.set(true);
        let mut cancelled = 0;
        loop {
            // unwinding coroutines may still spawn or touch the dispatcher
            let slots = self.slots.borrow_mut().take_all();
            if slots.is_empty() {
                break;
            }
            self.run_queue.borrow_mut().clear();
            cancelled += slots.len();
            drop(slots);
        }
        if cancelled > 0 {
            debug!("{:?} cancelled {} coroutines at shutdown", self.worker, cancelled);
        }

        let timers = self.timers.borrow_mut().clear();
        drop(timers);
        self.selector.clear();
        let signals = self.signals.borrow_mut().take_all();
        drop(signals);
        self.pool.clear();
        debug!(
            "{:?} exit, spawned={}, retired={}",
            self.worker,
            self.spawned.get(),
            self.retired.get()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::Event;

    fn dispatcher(max_swaps: usize) -> Rc<Dispatcher> {
        let (shared, mut pollers) = Shared::new(1).unwrap();
        let poller = pollers.pop().unwrap();
        Dispatcher::new(WorkerId(0), shared, Selector::new(poller), 0x1000, 10, max_swaps)
    }

    fn spawn<F: FnOnce(&Context) + 'static>(d: &Dispatcher, f: F) -> CoroutineId {
        let on_exit = Box::new(|_: Option<Box<dyn Any + Send>>| {});
        d.spawn(Box::new(f), on_exit, Vec::new(), true, false)
    }

    #[test]
    fn run_is_capped() {
        let d = dispatcher(3);
        let resumed = Rc::new(Cell::new(0));
        for _ in 0..5 {
            let resumed = resumed.clone();
            spawn(&d, move |cx| {
                resumed.set(resumed.get() + 1);
                cx.yield_now();
                resumed.set(resumed.get() + 1);
            });
        }

        // each run resumes at most three, the delta is spawned minus retired
        assert_eq!(d.run(), 5);
        assert_eq!(resumed.get(), 3);
        assert_eq!(d.stats().runnable, 5);
        assert_eq!(d.run(), -1);
        assert_eq!(resumed.get(), 6);
        assert_eq!(d.run(), -3);
        assert_eq!(resumed.get(), 9);
        assert_eq!(d.run(), -1);
        assert_eq!(resumed.get(), 10);
        assert_eq!(d.run(), 0);

        let stats = d.stats();
        assert_eq!((stats.spawned, stats.retired, stats.outstanding), (5, 5, 0));
        assert_eq!(stats.swaps, 10);
        assert_eq!(stats.pooled, 5);
    }

    #[test]
    fn run_reports_net_change() {
        let d = dispatcher(100);
        let gate = Rc::new(Event::new());
        let g = gate.clone();
        spawn(&d, move |cx| {
            for _ in 0..2 {
                let g = g.clone();
                cx.spawn(move |cx| cx.wait(&*g).unwrap());
            }
        });

        // the parent retired, its children are parked
        assert_eq!(d.run(), 2);
        assert_eq!(d.stats().outstanding, 2);
        assert_eq!(d.stats().runnable, 0);

        gate.set();
        assert_eq!(d.stats().runnable, 2);
        assert_eq!(d.run(), -2);
        let stats = d.stats();
        assert_eq!((stats.spawned, stats.retired, stats.outstanding), (3, 3, 0));
    }
}
