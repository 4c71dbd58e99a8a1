use std::any::Any;
use std::cell::RefCell;
use std::error::Error;
use std::fmt;
use std::rc::Rc;
use std::thread;

use crate::coroutine::Context;
use crate::coroutine_impl::CoroutineId;
use crate::sync::Event;
use crate::wait::{Registration, WaitError, WaitKey, Waitable, Waiter};

/// Where a coroutine leaves its outcome for the join handle.
pub(crate) struct Packet<T> {
    result: RefCell<Option<thread::Result<T>>>,
    // set once the coroutine retired, returned or panicked
    done: Event,
}

impl<T> Packet<T> {
    pub(crate) fn new() -> Self {
        Packet {
            result: RefCell::new(None),
            done: Event::new(),
        }
    }

    pub(crate) fn set_value(&self, value: T) {
        *self.result.borrow_mut() = Some(Ok(value));
    }

    // the result must be ready before the trigger
    pub(crate) fn finish(&self, panic: Option<Box<dyn Any + Send>>) {
        if let Some(panic) = panic {
            *self.result.borrow_mut() = Some(Err(panic));
        }
        self.done.set();
    }
}

/// Why a join produced no value.
pub enum JoinError {
    /// the joining coroutine was interrupted
    Interrupted,
    /// the coroutine was torn down before it finished
    ObjectLost,
    /// the coroutine panicked, this is the payload
    Panicked(Box<dyn Any + Send>),
}

impl JoinError {
    pub fn is_panic(&self) -> bool {
        matches!(self, JoinError::Panicked(_))
    }

    /// take the panic payload, `None` for the other variants
    pub fn into_panic(self) -> Option<Box<dyn Any + Send>> {
        match self {
            JoinError::Panicked(p) => Some(p),
            _ => None,
        }
    }
}

impl From<WaitError> for JoinError {
    fn from(e: WaitError) -> Self {
        match e {
            WaitError::Interrupted => JoinError::Interrupted,
            WaitError::ObjectLost => JoinError::ObjectLost,
        }
    }
}

impl fmt::Debug for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            JoinError::Interrupted => f.pad("Interrupted"),
            JoinError::ObjectLost => f.pad("ObjectLost"),
            JoinError::Panicked(_) => f.pad("Panicked(..)"),
        }
    }
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            JoinError::Interrupted => f.write_str("join interrupted"),
            JoinError::ObjectLost => f.write_str("coroutine lost before it finished"),
            JoinError::Panicked(_) => f.write_str("coroutine panicked"),
        }
    }
}

impl Error for JoinError {}

/// A join handle to a coroutine on the same worker.
///
/// Dropping the handle detaches the coroutine. The handle is also a
/// [`Waitable`], so it can take part in `wait_any`/`wait_all`.
pub struct JoinHandle<T> {
    id: CoroutineId,
    packet: Rc<Packet<T>>,
}

pub(crate) fn make_join_handle<T>(id: CoroutineId, packet: Rc<Packet<T>>) -> JoinHandle<T> {
    JoinHandle { id, packet }
}

impl<T> JoinHandle<T> {
    /// the coroutine this handle joins
    pub fn id(&self) -> CoroutineId {
        self.id
    }

    pub fn is_done(&self) -> bool {
        self.packet.done.is_set()
    }

    /// Join the coroutine, returning the result it produced.
    pub fn join(self, cx: &Context) -> Result<T, JoinError> {
        cx.wait(&self.packet.done)?;
        let ret = self.packet.result.borrow_mut().take();
        match ret {
            Some(Ok(v)) => Ok(v),
            Some(Err(panic)) => Err(JoinError::Panicked(panic)),
            None => Err(JoinError::ObjectLost),
        }
    }
}

impl<T> Waitable for JoinHandle<T> {
    fn register(&self, waiter: Waiter) -> Registration {
        self.packet.done.register(waiter)
    }

    fn deregister(&self, key: WaitKey) {
        self.packet.done.deregister(key)
    }
}

impl<T> fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("JoinHandle")
            .field("id", &self.id)
            .field("done", &self.is_done())
            .finish()
    }
}
