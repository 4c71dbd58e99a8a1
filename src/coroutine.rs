//! The per coroutine context handed to every coroutine body.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::io;
use std::os::unix::io::BorrowedFd;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::cancel::InterruptorInner;
use crate::coroutine_impl::{switch_out, CoroutineId, Switch};
use crate::dispatcher::{Body, Dispatcher, DispatcherStats, ExitHook};
use crate::io::{FdCallback, FdToken, Interest, TimerCallback};
use crate::join::{make_join_handle, JoinError, JoinHandle, Packet};
use crate::scheduler::{Remote, WorkerId};
use crate::signal::{CrossThreadSignal, SignalSender};
use crate::sync::SingleTimer;
use crate::timeout_list::TimerToken;
use crate::wait::{Registration, Resolvable, WaitError, WaitResult, Waitable, Waiter};

/// failure of [`Context::call_on`]
pub type CallError = JoinError;

/// Wakes one coroutine for one wait.
///
/// The first delivery wins, later ones are refused. Once the wait is over
/// the waiter expires so nothing left behind can wake the coroutine again.
pub(crate) struct CoroutineWaiter {
    dispatcher: Weak<Dispatcher>,
    id: CoroutineId,
    fired: Cell<bool>,
}

impl CoroutineWaiter {
    pub(crate) fn new(cx: &Context) -> Rc<Self> {
        Rc::new(CoroutineWaiter {
            dispatcher: cx.dispatcher.weak(),
            id: cx.id,
            fired: Cell::new(false),
        })
    }

    // bound to no dispatcher, every delivery is refused
    #[cfg(test)]
    pub(crate) fn detached(id: CoroutineId) -> Rc<Self> {
        Rc::new(CoroutineWaiter {
            dispatcher: Weak::new(),
            id,
            fired: Cell::new(false),
        })
    }

    #[inline]
    pub(crate) fn expire(&self) {
        self.fired.set(true);
    }
}

/// Uninterruptible wait of whatever coroutine runs on `dispatcher`.
///
/// For destructors, they have no [`Context`] at hand.
pub(crate) fn wait_running(dispatcher: &Dispatcher, obj: &dyn Waitable) -> Result<(), WaitError> {
    let id = match dispatcher.running() {
        Some(id) => id,
        None => fatal!("{:?} blocking wait outside of a coroutine", dispatcher.worker()),
    };
    if !dispatcher.swap_permitted() {
        fatal!("{:?} switched out while swaps are forbidden", id);
    }
    let waiter = Rc::new(CoroutineWaiter {
        dispatcher: dispatcher.weak(),
        id,
        fired: Cell::new(false),
    });
    let key = match obj.register(waiter.clone() as Waiter) {
        Registration::Ready(result) => {
            waiter.expire();
            return result.into_result();
        }
        Registration::Pending(key) => key,
    };
    let result = switch_out(Switch::Wait);
    obj.deregister(key);
    waiter.expire();
    result.into_result()
}

impl Resolvable for CoroutineWaiter {
    fn resolve(&self, result: WaitResult) -> bool {
        if self.fired.replace(true) {
            return false;
        }
        match self.dispatcher.upgrade() {
            Some(dispatcher) => {
                dispatcher.notify(self.id, result);
                true
            }
            None => false,
        }
    }
}

/// Forbids context switches while alive, see [`Context::no_swap`].
pub struct NoSwapGuard<'a> {
    cx: &'a Context,
}

impl Drop for NoSwapGuard<'_> {
    fn drop(&mut self) {
        self.cx.dispatcher.permit_swap();
    }
}

/// Explicit handle to the running coroutine and the worker it runs on.
///
/// Every coroutine body receives `&Context`. It cannot leave the worker
/// thread.
pub struct Context {
    dispatcher: Rc<Dispatcher>,
    id: CoroutineId,
    // innermost last
    interruptors: RefCell<Vec<Rc<InterruptorInner>>>,
}

impl Context {
    pub(crate) fn new(
        dispatcher: Rc<Dispatcher>,
        id: CoroutineId,
        interruptors: Vec<Rc<InterruptorInner>>,
    ) -> Self {
        Context {
            dispatcher,
            id,
            interruptors: RefCell::new(interruptors),
        }
    }

    #[inline]
    pub(crate) fn dispatcher(&self) -> &Rc<Dispatcher> {
        &self.dispatcher
    }

    #[inline]
    pub fn id(&self) -> CoroutineId {
        self.id
    }

    #[inline]
    pub fn worker(&self) -> WorkerId {
        self.dispatcher.worker()
    }

    /// every worker of the scheduler this coroutine runs in
    pub fn workers(&self) -> impl Iterator<Item = WorkerId> {
        (0..self.dispatcher.shared().workers()).map(WorkerId)
    }

    pub fn stats(&self) -> DispatcherStats {
        self.dispatcher.stats()
    }

    fn spawn_impl<F, T>(&self, f: F, front: bool) -> JoinHandle<T>
    where
        F: FnOnce(&Context) -> T + 'static,
        T: 'static,
    {
        let packet = Rc::new(Packet::new());
        let body_packet = packet.clone();
        let exit_packet = packet.clone();
        let body: Body = Box::new(move |cx| body_packet.set_value(f(cx)));
        let on_exit: ExitHook = Box::new(move |panic| exit_packet.finish(panic));
        let interruptors = self.interruptors.borrow().clone();
        let id = self
            .dispatcher
            .spawn(body, on_exit, interruptors, true, front);
        make_join_handle(id, packet)
    }

    /// Spawn a coroutine on this worker, it runs once the spawner switches out.
    ///
    /// The child starts under the interruptors active right now.
    pub fn spawn<F, T>(&self, f: F) -> JoinHandle<T>
    where
        F: FnOnce(&Context) -> T + 'static,
        T: 'static,
    {
        self.spawn_impl(f, false)
    }

    /// Spawn a coroutine and switch to it right away, the caller goes to
    /// the back of the run queue.
    pub fn spawn_now<F, T>(&self, f: F) -> JoinHandle<T>
    where
        F: FnOnce(&Context) -> T + 'static,
        T: 'static,
    {
        let handle = self.spawn_impl(f, true);
        self.yield_now();
        handle
    }

    /// go to the back of the run queue
    pub fn yield_now(&self) {
        self.assert_can_switch();
        switch_out(Switch::Yield);
    }

    fn assert_can_switch(&self) {
        if !self.dispatcher.swap_permitted() {
            fatal!("{:?} switched out while swaps are forbidden", self.id);
        }
        debug_assert_eq!(self.dispatcher.running(), Some(self.id));
    }

    /// Leave the run queue until a registered waiter notifies this coroutine.
    pub(crate) fn suspend(&self) -> WaitResult {
        // a destructor running during unwinding can not switch out
        if thread::panicking() {
            return WaitResult::ObjectLost;
        }
        self.assert_can_switch();
        switch_out(Switch::Wait)
    }

    /// innermost interruptor that is still alive
    pub(crate) fn current_interruptor(&self) -> Option<Rc<InterruptorInner>> {
        self.interruptors
            .borrow()
            .iter()
            .rev()
            .find(|i| !i.is_destroyed())
            .cloned()
    }

    pub(crate) fn push_interruptor(&self, interruptor: Rc<InterruptorInner>) {
        self.interruptors.borrow_mut().push(interruptor);
    }

    pub(crate) fn pop_interruptor(&self) -> Option<Rc<InterruptorInner>> {
        self.interruptors.borrow_mut().pop()
    }

    pub(crate) fn take_interruptors(&self) -> Vec<Rc<InterruptorInner>> {
        std::mem::take(&mut *self.interruptors.borrow_mut())
    }

    pub(crate) fn restore_interruptors(&self, saved: Vec<Rc<InterruptorInner>>) -> Vec<Rc<InterruptorInner>> {
        std::mem::replace(&mut *self.interruptors.borrow_mut(), saved)
    }

    /// has the innermost live interruptor been triggered
    pub fn is_interrupted(&self) -> bool {
        self.current_interruptor()
            .map_or(false, |i| i.is_triggered())
    }

    fn wait_impl(&self, obj: &dyn Waitable, interruptible: bool) -> Result<(), WaitError> {
        let interruptor = if interruptible {
            self.current_interruptor()
        } else {
            None
        };
        if interruptor.as_ref().map_or(false, |i| i.is_triggered()) {
            return Err(WaitError::Interrupted);
        }

        let waiter = CoroutineWaiter::new(self);
        let key = match obj.register(waiter.clone() as Waiter) {
            Registration::Ready(result) => {
                waiter.expire();
                return result.into_result();
            }
            Registration::Pending(key) => key,
        };
        let interrupt_key = match &interruptor {
            Some(i) => match i.register(waiter.clone() as Waiter) {
                Registration::Ready(result) => {
                    // delivered before we switch out, the switch returns at once
                    waiter.resolve(result);
                    None
                }
                Registration::Pending(key) => Some(key),
            },
            None => None,
        };

        let result = self.suspend();

        obj.deregister(key);
        if let (Some(i), Some(key)) = (&interruptor, interrupt_key) {
            i.deregister(key);
        }
        waiter.expire();
        result.into_result()
    }

    /// Block until `obj` resolves.
    ///
    /// Returns right away when the object is already signalled. The wait is
    /// also registered with the innermost interruptor, if that fires first
    /// the wait fails with [`WaitError::Interrupted`].
    pub fn wait(&self, obj: &dyn Waitable) -> Result<(), WaitError> {
        self.wait_impl(obj, true)
    }

    /// like [`wait`](Context::wait) but deaf to the interruptor chain
    pub fn wait_uninterruptible(&self, obj: &dyn Waitable) -> Result<(), WaitError> {
        self.wait_impl(obj, false)
    }

    pub fn sleep(&self, dur: Duration) -> Result<(), WaitError> {
        let timer = SingleTimer::new(self, dur);
        self.wait(&timer)
    }

    /// Forbid context switches until the guard drops. Any attempt to switch
    /// out meanwhile aborts the process.
    pub fn no_swap(&self) -> NoSwapGuard<'_> {
        self.dispatcher.forbid_swap();
        NoSwapGuard { cx: self }
    }

    pub fn remote(&self, worker: WorkerId) -> Remote {
        assert!(
            worker.0 < self.dispatcher.shared().workers(),
            "no such worker {:?}",
            worker
        );
        Remote::new(self.dispatcher.shared().clone(), worker)
    }

    /// A signal waitable here and pulsed from any thread through the sender.
    pub fn cross_thread_signal(&self) -> (CrossThreadSignal, SignalSender) {
        CrossThreadSignal::new(&self.dispatcher)
    }

    /// Run `f` as a coroutine on `worker` and wait for its value.
    ///
    /// If this wait is interrupted the remote coroutine still runs to the
    /// end, its value is dropped.
    pub fn call_on<F, T>(&self, worker: WorkerId, f: F) -> Result<T, CallError>
    where
        F: FnOnce(&Context) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (signal, sender) = self.cross_thread_signal();
        let slot = Arc::new(Mutex::new(None));
        let body_slot = slot.clone();
        let exit_slot = slot.clone();
        self.remote(worker).post_spawn(
            move |cx| *body_slot.lock() = Some(Ok(f(cx))),
            move |panic| {
                if let Some(panic) = panic {
                    *exit_slot.lock() = Some(Err(panic));
                }
                sender.pulse();
            },
        );
        self.wait(&signal)?;
        let ret = slot.lock().take();
        match ret {
            Some(Ok(v)) => Ok(v),
            Some(Err(panic)) => Err(JoinError::Panicked(panic)),
            None => Err(JoinError::ObjectLost),
        }
    }

    /// register `callback` for readiness of `fd` on this worker's selector
    pub fn add_file_wait(
        &self,
        fd: BorrowedFd<'_>,
        interest: Interest,
        callback: Rc<dyn FdCallback>,
    ) -> io::Result<FdToken> {
        self.dispatcher.selector().add_file_wait(fd, interest, callback)
    }

    /// remove the registration `token` of `fd`, before `fd` is closed
    pub fn remove_file_wait(&self, fd: BorrowedFd<'_>, token: FdToken) -> io::Result<()> {
        self.dispatcher.selector().remove_file_wait(fd, token)
    }

    /// register `callback` to fire once `deadline` passed
    pub fn add_timer(&self, deadline: Instant, callback: Rc<dyn TimerCallback>) -> TimerToken {
        self.dispatcher.add_timer(deadline, callback)
    }

    /// `false` if the timer already fired or was removed
    pub fn remove_timer(&self, token: TimerToken) -> bool {
        self.dispatcher.remove_timer(token)
    }

    pub fn update_timer(&self, token: TimerToken, deadline: Instant) -> bool {
        self.dispatcher.update_timer(token, deadline)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("worker", &self.worker())
            .finish()
    }
}
