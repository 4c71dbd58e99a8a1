use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use coil_queue::Key;

use crate::dispatcher::Dispatcher;
use crate::scheduler::{Message, Shared, WorkerId};
use crate::wait::{Registration, Resolvable, WaitKey, WaitList, WaitResult, Waitable, Waiter};

/// The worker side of a cross thread signal. Fires once and stays fired.
pub(crate) struct SignalInner {
    state: Cell<Option<WaitResult>>,
    waiters: WaitList,
}

impl SignalInner {
    fn new() -> Self {
        SignalInner {
            state: Cell::new(None),
            waiters: WaitList::new(),
        }
    }
}

impl Resolvable for SignalInner {
    fn resolve(&self, result: WaitResult) -> bool {
        if self.state.get().is_some() {
            return false;
        }
        self.state.set(Some(result));
        self.waiters.resolve_all(result);
        true
    }
}

impl Waitable for SignalInner {
    fn register(&self, waiter: Waiter) -> Registration {
        match self.state.get() {
            Some(result) => Registration::Ready(result),
            None => Registration::Pending(self.waiters.push(waiter, ())),
        }
    }

    fn deregister(&self, key: WaitKey) {
        self.waiters.remove(key);
    }
}

/// A signal waited on by coroutines of one worker and pulsed from
/// anywhere through its [`SignalSender`].
///
/// If the sender is dropped without pulsing, waiters see
/// [`WaitResult::ObjectLost`].
pub struct CrossThreadSignal {
    inner: Rc<SignalInner>,
    dispatcher: Rc<Dispatcher>,
    key: Key,
}

impl CrossThreadSignal {
    pub(crate) fn new(dispatcher: &Rc<Dispatcher>) -> (CrossThreadSignal, SignalSender) {
        let inner = Rc::new(SignalInner::new());
        let key = dispatcher.add_signal(inner.clone());
        let sender = SignalSender {
            shared: dispatcher.shared().clone(),
            worker: dispatcher.worker(),
            key,
            sent: false,
        };
        let signal = CrossThreadSignal {
            inner,
            dispatcher: dispatcher.clone(),
            key,
        };
        (signal, sender)
    }

    /// `Some` with the delivered result once the signal fired
    pub fn state(&self) -> Option<WaitResult> {
        self.inner.state.get()
    }
}

impl Waitable for CrossThreadSignal {
    fn register(&self, waiter: Waiter) -> Registration {
        self.inner.register(waiter)
    }

    fn deregister(&self, key: WaitKey) {
        self.inner.deregister(key)
    }
}

impl Drop for CrossThreadSignal {
    fn drop(&mut self) {
        // a pulse still in flight finds nothing and is dropped
        self.dispatcher.remove_signal(self.key);
    }
}

impl fmt::Debug for CrossThreadSignal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CrossThreadSignal")
            .field("state", &self.state())
            .finish()
    }
}

/// Sending half of a [`CrossThreadSignal`], can move to any thread.
pub struct SignalSender {
    shared: Arc<Shared>,
    worker: WorkerId,
    key: Key,
    sent: bool,
}

impl SignalSender {
    /// fire the signal, its waiters resume with success
    pub fn pulse(mut self) {
        self.send(WaitResult::Success);
    }

    fn send(&mut self, result: WaitResult) {
        self.sent = true;
        self.shared.post(self.worker, Message::Pulse(self.key, result));
    }
}

impl Drop for SignalSender {
    fn drop(&mut self) {
        if !self.sent {
            self.send(WaitResult::ObjectLost);
        }
    }
}

impl fmt::Debug for SignalSender {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SignalSender")
            .field("worker", &self.worker)
            .field("sent", &self.sent)
            .finish()
    }
}
