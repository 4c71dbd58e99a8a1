//! The I/O interface of a worker: fd readiness and timers.
//!
//! Both are callback based and one shot. [`FdWait`] and [`wait_io`] turn
//! fd readiness into something a coroutine can block on.

mod sys;

use std::cell::Cell;
use std::fmt;
use std::io;
use std::ops::BitOr;
use std::os::unix::io::BorrowedFd;
use std::rc::Rc;

use coil_queue::Key;

use crate::coroutine::Context;
use crate::dispatcher::Dispatcher;
use crate::wait::{Registration, WaitKey, WaitList, WaitResult, Waitable, Waiter};

pub use self::sys::Selector;
pub(crate) use self::sys::{Poller, Waker};

/// Readiness kinds of a file descriptor.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interest(u8);

impl Interest {
    pub const NONE: Interest = Interest(0);
    pub const READABLE: Interest = Interest(1);
    pub const WRITABLE: Interest = Interest(1 << 1);
    /// error or hang up, only ever reported, never asked for
    pub const ERROR: Interest = Interest(1 << 2);

    #[inline]
    pub fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn is_readable(self) -> bool {
        self.contains(Interest::READABLE)
    }

    #[inline]
    pub fn is_writable(self) -> bool {
        self.contains(Interest::WRITABLE)
    }

    #[inline]
    pub fn is_error(self) -> bool {
        self.contains(Interest::ERROR)
    }
}

impl BitOr for Interest {
    type Output = Interest;

    #[inline]
    fn bitor(self, other: Interest) -> Interest {
        Interest(self.0 | other.0)
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut sep = "";
        for (flag, name) in [
            (Interest::READABLE, "READABLE"),
            (Interest::WRITABLE, "WRITABLE"),
            (Interest::ERROR, "ERROR"),
        ] {
            if self.contains(flag) {
                write!(f, "{}{}", sep, name)?;
                sep = " | ";
            }
        }
        if sep.is_empty() {
            f.write_str("NONE")?;
        }
        Ok(())
    }
}

/// Handle of an fd registration, see [`Selector::add_file_wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FdToken(pub(crate) Key);

/// Told once a registered fd became ready.
pub trait FdCallback {
    fn on_ready(&self, ready: Interest);
}

/// Fired once a timer's deadline passed.
pub trait TimerCallback {
    fn on_timer(self: Rc<Self>);
}

struct FdWaitInner {
    ready: Cell<Option<Interest>>,
    waiters: WaitList,
}

impl FdCallback for FdWaitInner {
    fn on_ready(&self, ready: Interest) {
        self.ready.set(Some(ready));
        self.waiters.resolve_all(WaitResult::Success);
    }
}

/// A waitable one shot fd registration.
///
/// Resolves every waiter once the fd is ready, and stays resolved.
/// Dropping it removes the registration, the borrow keeps the fd open
/// until then.
pub struct FdWait<'fd> {
    inner: Rc<FdWaitInner>,
    dispatcher: Rc<Dispatcher>,
    fd: BorrowedFd<'fd>,
    token: FdToken,
}

impl<'fd> FdWait<'fd> {
    pub fn new(
        cx: &Context,
        fd: BorrowedFd<'fd>,
        interest: Interest,
    ) -> io::Result<FdWait<'fd>> {
        let inner = Rc::new(FdWaitInner {
            ready: Cell::new(None),
            waiters: WaitList::new(),
        });
        let dispatcher = cx.dispatcher().clone();
        let token = dispatcher
            .selector()
            .add_file_wait(fd, interest, inner.clone())?;
        Ok(FdWait {
            inner,
            dispatcher,
            fd,
            token,
        })
    }

    /// the reported readiness, `None` until the fd became ready
    pub fn readiness(&self) -> Option<Interest> {
        self.inner.ready.get()
    }
}

impl Waitable for FdWait<'_> {
    fn register(&self, waiter: Waiter) -> Registration {
        if self.inner.ready.get().is_some() {
            return Registration::Ready(WaitResult::Success);
        }
        Registration::Pending(self.inner.waiters.push(waiter, ()))
    }

    fn deregister(&self, key: WaitKey) {
        self.inner.waiters.remove(key);
    }
}

impl Drop for FdWait<'_> {
    fn drop(&mut self) {
        let selector = self.dispatcher.selector();
        if let Err(e) = selector.remove_file_wait(self.fd, self.token) {
            // the worker already cleared its selector at shutdown
            trace!("remove fd wait failed: {}", e);
        }
    }
}

impl fmt::Debug for FdWait<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FdWait")
            .field("fd", &self.fd)
            .field("token", &self.token)
            .field("ready", &self.readiness())
            .finish()
    }
}

/// block the coroutine until `fd` is ready for `interest`
pub fn wait_io(cx: &Context, fd: BorrowedFd<'_>, interest: Interest) -> io::Result<Interest> {
    let wait = FdWait::new(cx, fd, interest)?;
    cx.wait(&wait)?;
    Ok(wait.readiness().unwrap_or(interest))
}

/// Retry `f` as long as it reports `ErrorKind::Interrupted`.
pub fn retry<F, T>(mut f: F) -> io::Result<T>
where
    F: FnMut() -> io::Result<T>,
{
    loop {
        match f() {
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            ret => return ret,
        }
    }
}

/// Run a non blocking operation as if it were blocking.
///
/// `f` is retried on `Interrupted`, on `WouldBlock` the coroutine waits for
/// the fd to become ready first. `fd` must be in non blocking mode.
pub fn co_io<F, T>(cx: &Context, fd: BorrowedFd<'_>, interest: Interest, mut f: F) -> io::Result<T>
where
    F: FnMut() -> io::Result<T>,
{
    loop {
        match retry(&mut f) {
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                wait_io(cx, fd, interest)?;
            }
            ret => return ret,
        }
    }
}
