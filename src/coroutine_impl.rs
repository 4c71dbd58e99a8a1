use std::fmt;
use std::panic;

use coil_queue::Key;
use generator::{co_get_yield, co_yield_with, Error, Generator, Gn};

use crate::wait::WaitResult;

/// /////////////////////////////////////////////////////////////////////////////
/// Coroutine framework types
/// /////////////////////////////////////////////////////////////////////////////

/// What a coroutine asks of its dispatcher when it switches out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Switch {
    /// go to the back of the run queue
    Yield,
    /// leave every queue until somebody notifies it
    Wait,
    /// the body returned, retire the coroutine
    Exit,
}

/// coroutines are static generators
/// the para type is the wait result, the yield type is the switch request
pub(crate) type CoroutineImpl = Generator<'static, WaitResult, Switch>;

/// Identifies a coroutine within its worker.
///
/// Ids are generation checked: once a coroutine retires its id never
/// matches a later coroutine that happens to reuse the slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoroutineId(pub(crate) Key);

impl fmt::Debug for CoroutineId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "co#{:?}", self.0)
    }
}

/// Per coroutine data hung off the generator context, the generator
/// crate uses it to tell coroutine frames from plain generator frames.
pub(crate) struct CoroutineLocal {
    pub(crate) id: CoroutineId,
}

/// The generator requires a `Send` body. A coroutine body never leaves the
/// worker thread that built it, the generator lives and dies in that
/// worker's dispatcher.
pub(crate) struct AssertSend<T>(T);

unsafe impl<T> Send for AssertSend<T> {}

impl<T> AssertSend<T> {
    #[inline]
    pub(crate) fn new(t: T) -> Self {
        AssertSend(t)
    }

    #[inline]
    pub(crate) fn into_inner(self) -> T {
        self.0
    }
}

/// build a fresh generator that must be initialized before it is resumed
pub(crate) fn raw_coroutine(stack_size: usize) -> CoroutineImpl {
    Gn::new_opt(stack_size, move || {
        unreachable!("dummy coroutine should never be called");
    })
}

/// Switch out of the running coroutine and return the result it is
/// resumed with.
///
/// Dropping an unfinished generator resumes it one last time without a
/// result, that turns into a cancel panic which unwinds the coroutine.
#[inline]
pub(crate) fn switch_out(switch: Switch) -> WaitResult {
    co_yield_with(switch);
    match co_get_yield::<WaitResult>() {
        Some(result) => result,
        None => panic::panic_any(Error::Cancel),
    }
}

/// is the panic payload the generator's own cancel unwinding
pub(crate) fn is_cancel_panic(payload: &(dyn std::any::Any + Send)) -> bool {
    matches!(payload.downcast_ref::<Error>(), Some(Error::Cancel))
}
