use std::cell::RefCell;
use std::io;
use std::os::unix::io::{AsRawFd, BorrowedFd, RawFd};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use coil_queue::{Arena, Key};
use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
use nix::sys::eventfd::{EfdFlags, EventFd};
use smallvec::SmallVec;

use crate::io::{FdCallback, FdToken, Interest};

// epoll user data of the wakeup eventfd, registration keys never reach it
const WAKE_TOKEN: u64 = u64::MAX;
const EVENTS_CAPACITY: usize = 256;

const NANOS_PER_MILLI: u128 = 1_000_000;

// covert interested event into system EpollFlags
#[inline]
fn interest_to_epoll_kind(interest: Interest) -> EpollFlags {
    let mut kind = EpollFlags::EPOLLONESHOT;

    if interest.is_readable() {
        kind.insert(EpollFlags::EPOLLIN | EpollFlags::EPOLLRDHUP);
    }

    if interest.is_writable() {
        kind.insert(EpollFlags::EPOLLOUT);
    }
    kind
}

#[inline]
fn epoll_kind_to_readiness(kind: EpollFlags) -> Interest {
    let mut ready = Interest::NONE;
    if kind.intersects(EpollFlags::EPOLLIN | EpollFlags::EPOLLRDHUP) {
        ready = ready | Interest::READABLE;
    }
    if kind.contains(EpollFlags::EPOLLOUT) {
        ready = ready | Interest::WRITABLE;
    }
    // a broken fd wakes everybody so the next syscall reports the error
    if kind.intersects(EpollFlags::EPOLLERR | EpollFlags::EPOLLHUP) {
        ready = ready | Interest::READABLE | Interest::WRITABLE | Interest::ERROR;
    }
    ready
}

// round up so a sub millisecond timeout does not turn into a busy poll
#[inline]
fn dur_to_timeout(dur: Option<Duration>) -> EpollTimeout {
    match dur {
        None => EpollTimeout::NONE,
        Some(dur) => {
            let ms = (dur.as_nanos() + NANOS_PER_MILLI - 1) / NANOS_PER_MILLI;
            EpollTimeout::try_from(ms).unwrap_or(EpollTimeout::MAX)
        }
    }
}

/// Cross thread wakeup of one worker's poll loop.
#[derive(Debug)]
pub(crate) struct Waker {
    fd: EventFd,
}

impl Waker {
    pub fn new() -> io::Result<Self> {
        let fd = EventFd::from_value_and_flags(0, EfdFlags::EFD_CLOEXEC | EfdFlags::EFD_NONBLOCK)?;
        Ok(Waker { fd })
    }

    /// this will post an os event so that we can wakeup the event loop
    pub fn wake(&self) {
        match self.fd.write(1) {
            // the counter is saturated, a wakeup is already pending
            Ok(_) | Err(Errno::EAGAIN) => {}
            Err(e) => error!("failed to wake worker: {}", e),
        }
    }

    fn reset(&self) {
        // EAGAIN means someone else drained it already
        let _ = self.fd.read();
    }
}

/// The OS half of a selector, built on the caller's thread and moved into
/// the worker.
pub(crate) struct Poller {
    epoll: Epoll,
    waker: Arc<Waker>,
}

impl Poller {
    pub fn new(waker: Arc<Waker>) -> io::Result<Self> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)?;
        epoll.add(&waker.fd, EpollEvent::new(EpollFlags::EPOLLIN, WAKE_TOKEN))?;
        Ok(Poller { epoll, waker })
    }
}

struct FdEntry {
    fd: RawFd,
    callback: Rc<dyn FdCallback>,
}

/// Per worker readiness selector.
///
/// Registrations are one shot: a registered fd reports readiness once,
/// after that it stays silent until it is removed and added again.
pub struct Selector {
    poller: Poller,
    entries: RefCell<Arena<FdEntry>>,
    events: RefCell<Vec<EpollEvent>>,
}

impl Selector {
    pub(crate) fn new(poller: Poller) -> Self {
        Selector {
            poller,
            entries: RefCell::new(Arena::new()),
            events: RefCell::new(vec![EpollEvent::empty(); EVENTS_CAPACITY]),
        }
    }

    /// Register `callback` to be told once `fd` is ready for `interest`.
    ///
    /// One registration per fd per worker, adding the same fd again
    /// reports the OS error.
    pub fn add_file_wait(
        &self,
        fd: BorrowedFd<'_>,
        interest: Interest,
        callback: Rc<dyn FdCallback>,
    ) -> io::Result<FdToken> {
        let raw = fd.as_raw_fd();
        let key = self.entries.borrow_mut().insert(FdEntry { fd: raw, callback });
        let ev = EpollEvent::new(interest_to_epoll_kind(interest), key.to_bits());
        if let Err(e) = self.poller.epoll.add(fd, ev) {
            self.entries.borrow_mut().remove(key);
            return Err(e.into());
        }
        trace!("add fd wait, fd={}, interest={:?}", raw, interest);
        Ok(FdToken(key))
    }

    /// Remove the registration `token` of `fd`.
    ///
    /// Taking the fd proves it is still open, a closed fd number may
    /// already belong to another registration.
    pub fn remove_file_wait(&self, fd: BorrowedFd<'_>, token: FdToken) -> io::Result<()> {
        let mut entries = self.entries.borrow_mut();
        match entries.get(token.0) {
            Some(entry) if entry.fd == fd.as_raw_fd() => {}
            Some(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "fd token registered for another fd",
                ))
            }
            None => return Err(io::Error::new(io::ErrorKind::NotFound, "unknown fd token")),
        }
        let entry = entries.remove(token.0);
        drop(entries);
        drop(entry);
        trace!("remove fd wait, fd={}", fd.as_raw_fd());
        match self.poller.epoll.delete(fd) {
            Ok(()) | Err(Errno::ENOENT) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    #[inline]
    pub fn registered(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Wait for readiness at most `timeout`, `None` blocks until something
    /// happens. Ready callbacks run before this returns, the count of fired
    /// registrations is returned.
    pub(crate) fn select(&self, timeout: Option<Duration>) -> io::Result<usize> {
        let mut ready: SmallVec<[(Rc<dyn FdCallback>, Interest); 16]> = SmallVec::new();
        {
            let mut events = self.events.borrow_mut();
            let n = match self.poller.epoll.wait(&mut events, dur_to_timeout(timeout)) {
                Ok(n) => n,
                Err(Errno::EINTR) => 0,
                Err(e) => return Err(e.into()),
            };

            let entries = self.entries.borrow();
            for event in events[..n].iter() {
                if event.data() == WAKE_TOKEN {
                    // this is just a wakeup event
                    self.poller.waker.reset();
                    continue;
                }
                match entries.get(Key::from_bits(event.data())) {
                    Some(entry) => ready.push((
                        entry.callback.clone(),
                        epoll_kind_to_readiness(event.events()),
                    )),
                    None => trace!("event for a removed fd wait"),
                }
            }
        }

        let fired = ready.len();
        for (callback, readiness) in ready {
            callback.on_ready(readiness);
        }
        Ok(fired)
    }

    /// Drop every registration, used when the worker shuts down.
    ///
    /// The epoll set itself goes away with the poller, so the fds are left
    /// alone, some of them may be closed already.
    pub(crate) fn clear(&self) {
        let entries = self.entries.borrow_mut().take_all();
        drop(entries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::io::Write;
    use std::os::unix::io::AsFd;
    use std::os::unix::net::UnixStream;

    struct Flag(Cell<Option<Interest>>);

    impl FdCallback for Flag {
        fn on_ready(&self, ready: Interest) {
            self.0.set(Some(ready));
        }
    }

    fn selector() -> Selector {
        let waker = Arc::new(Waker::new().unwrap());
        Selector::new(Poller::new(waker).unwrap())
    }

    #[test]
    fn readable_once() {
        let sel = selector();
        let (a, mut b) = UnixStream::pair().unwrap();
        let flag = Rc::new(Flag(Cell::new(None)));
        let token = sel
            .add_file_wait(a.as_fd(), Interest::READABLE, flag.clone())
            .unwrap();

        assert_eq!(sel.select(Some(Duration::ZERO)).unwrap(), 0);
        b.write_all(b"x").unwrap();
        assert_eq!(sel.select(Some(Duration::from_secs(1))).unwrap(), 1);
        assert!(flag.0.get().unwrap().is_readable());

        // one shot, still readable but not reported again
        assert_eq!(sel.select(Some(Duration::ZERO)).unwrap(), 0);
        sel.remove_file_wait(a.as_fd(), token).unwrap();
        assert_eq!(sel.registered(), 0);
    }

    #[test]
    fn removal_checks_the_fd() {
        let sel = selector();
        let (a, mut b) = UnixStream::pair().unwrap();
        let flag = Rc::new(Flag(Cell::new(None)));
        let token = sel
            .add_file_wait(a.as_fd(), Interest::READABLE, flag.clone())
            .unwrap();

        let err = sel.remove_file_wait(b.as_fd(), token).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        // still registered and still reporting
        assert_eq!(sel.registered(), 1);
        b.write_all(b"x").unwrap();
        assert_eq!(sel.select(Some(Duration::from_secs(1))).unwrap(), 1);
        assert!(flag.0.get().unwrap().is_readable());

        sel.remove_file_wait(a.as_fd(), token).unwrap();
        let err = sel.remove_file_wait(a.as_fd(), token).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn second_registration_fails() {
        let sel = selector();
        let (a, _b) = UnixStream::pair().unwrap();
        let flag = Rc::new(Flag(Cell::new(None)));
        sel.add_file_wait(a.as_fd(), Interest::READABLE, flag.clone())
            .unwrap();
        let err = sel
            .add_file_wait(a.as_fd(), Interest::WRITABLE, flag)
            .unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EEXIST));
        assert_eq!(sel.registered(), 1);
    }

    #[test]
    fn waker_interrupts_select() {
        let waker = Arc::new(Waker::new().unwrap());
        let sel = Selector::new(Poller::new(waker.clone()).unwrap());
        waker.wake();
        waker.wake();
        // returns right away instead of blocking forever
        assert_eq!(sel.select(None).unwrap(), 0);
        assert_eq!(sel.select(Some(Duration::ZERO)).unwrap(), 0);
    }
}
