use std::io::{self, Read, Write};
use std::os::unix::io::AsFd;
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use coil::io::{co_io, wait_io, FdWait, Interest, TimerCallback};
use coil::sync::{PeriodicTimer, SingleTimer};
use coil::{wait_any, Config, Context, Scheduler, WaitError};

fn block_on<F, T>(f: F) -> T
where
    F: FnOnce(&Context) -> T + Send + 'static,
    T: Send + 'static,
{
    let mut config = Config::new();
    config.set_workers(1);
    let sched = Scheduler::new(config).unwrap();
    let worker = sched.workers()[0];
    sched.block_on(worker, f).unwrap()
}

#[test]
fn earliest_deadline_wins() {
    let (index, ticks) = block_on(|cx| {
        let single = SingleTimer::new(cx, Duration::from_millis(10));
        let periodic = PeriodicTimer::new(cx, Duration::from_millis(100));
        let index = wait_any(cx, &[&periodic, &single]).unwrap();
        assert!(single.is_fired());
        (index, periodic.ticks())
    });
    assert_eq!(index, 1);
    assert_eq!(ticks, 0);
}

#[test]
fn sleep_takes_its_time() {
    let elapsed = block_on(|cx| {
        let start = Instant::now();
        cx.sleep(Duration::from_millis(30)).unwrap();
        start.elapsed()
    });
    assert!(elapsed >= Duration::from_millis(30));
}

#[test]
fn periodic_ticks() {
    let ticks = block_on(|cx| {
        let periodic = PeriodicTimer::new(cx, Duration::from_millis(5));
        for _ in 0..3 {
            cx.wait(&periodic).unwrap();
        }
        let ticks = periodic.ticks();
        periodic.cancel();
        assert_eq!(cx.wait(&periodic), Err(WaitError::ObjectLost));
        ticks
    });
    assert_eq!(ticks, 3);
}

#[test]
fn cancelled_timer_loses_waiters() {
    let ret = block_on(|cx| {
        let timer = Rc::new(SingleTimer::new(cx, Duration::from_secs(60)));
        let t = timer.clone();
        cx.spawn(move |_| t.cancel());
        cx.wait(&*timer)
    });
    assert_eq!(ret, Err(WaitError::ObjectLost));
}

#[test]
fn restart_moves_deadline() {
    let elapsed = block_on(|cx| {
        let start = Instant::now();
        let timer = SingleTimer::new(cx, Duration::from_secs(60));
        timer.restart(Duration::from_millis(5));
        cx.wait(&timer).unwrap();
        // fired timers rearm too
        timer.restart(Duration::from_millis(5));
        assert!(!timer.is_fired());
        cx.wait(&timer).unwrap();
        start.elapsed()
    });
    assert!(elapsed < Duration::from_secs(60));
}

#[test]
fn raw_timer_callback() {
    struct Count(std::cell::Cell<usize>);
    impl TimerCallback for Count {
        fn on_timer(self: Rc<Self>) {
            self.0.set(self.0.get() + 1);
        }
    }

    let fired = block_on(|cx| {
        let count = Rc::new(Count(std::cell::Cell::new(0)));
        let now = Instant::now();
        let a = cx.add_timer(now + Duration::from_millis(1), count.clone());
        let b = cx.add_timer(now + Duration::from_secs(60), count.clone());
        assert!(cx.update_timer(b, now + Duration::from_millis(2)));
        let c = cx.add_timer(now + Duration::from_millis(3), count.clone());
        assert!(cx.remove_timer(c));
        cx.sleep(Duration::from_millis(20)).unwrap();
        // already fired
        assert!(!cx.remove_timer(a));
        count.0.get()
    });
    assert_eq!(fired, 2);
}

#[test]
fn fd_readiness() {
    let got = block_on(|cx| {
        let (a, b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        let mut b = b;
        let writer = cx.spawn(move |cx| {
            cx.sleep(Duration::from_millis(5)).unwrap();
            b.write_all(b"ping").unwrap();
        });
        let mut buf = [0u8; 4];
        let mut a_ref = &a;
        let n = co_io(cx, a.as_fd(), Interest::READABLE, || a_ref.read(&mut buf)).unwrap();
        writer.join(cx).unwrap();
        buf[..n].to_vec()
    });
    assert_eq!(got, b"ping");
}

#[test]
fn fd_wait_reports_hangup() {
    let ready = block_on(|cx| {
        let (a, b) = UnixStream::pair().unwrap();
        cx.spawn(move |cx| {
            cx.yield_now();
            drop(b);
        });
        let wait = FdWait::new(cx, a.as_fd(), Interest::READABLE).unwrap();
        cx.wait(&wait).unwrap();
        wait.readiness().unwrap()
    });
    assert!(ready.is_readable());
}

#[test]
fn regular_files_are_refused() {
    let err = block_on(|cx| {
        let file = tempfile::tempfile().unwrap();
        wait_io(cx, file.as_fd(), Interest::READABLE).unwrap_err().raw_os_error()
    });
    assert_eq!(err, Some(libc::EPERM));
}

#[test]
fn signal_from_plain_thread() {
    let ret = block_on(|cx| {
        let (signal, sender) = cx.cross_thread_signal();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            sender.pulse();
        });
        let ret = cx.wait(&signal);
        t.join().unwrap();
        ret
    });
    assert_eq!(ret, Ok(()));
}

#[test]
fn dropped_sender_loses_signal() {
    let ret = block_on(|cx| {
        let (signal, sender) = cx.cross_thread_signal();
        thread::spawn(move || drop(sender)).join().unwrap();
        cx.wait(&signal)
    });
    assert_eq!(ret, Err(WaitError::ObjectLost));
}

#[test]
fn io_error_from_interrupted_wait() {
    let kind = block_on(|cx| {
        let (a, _b) = UnixStream::pair().unwrap();
        let stop = coil::sync::Event::new();
        stop.set();
        let _scope = coil::Interruptor::new(cx, &stop);
        let err: io::Error = wait_io(cx, a.as_fd(), Interest::READABLE).unwrap_err();
        err.kind()
    });
    assert_eq!(kind, io::ErrorKind::Interrupted);
}

#[test]
fn dropped_fd_wait_frees_the_fd() {
    let ready = block_on(|cx| {
        let (a, mut b) = UnixStream::pair().unwrap();
        let first = FdWait::new(cx, a.as_fd(), Interest::READABLE).unwrap();
        // one registration per fd
        assert!(FdWait::new(cx, a.as_fd(), Interest::READABLE).is_err());
        drop(first);
        let second = FdWait::new(cx, a.as_fd(), Interest::READABLE).unwrap();
        b.write_all(b"x").unwrap();
        cx.wait(&second).unwrap();
        second.readiness().unwrap()
    });
    assert!(ready.is_readable());
}
