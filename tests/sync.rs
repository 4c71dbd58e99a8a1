use std::cell::{Cell, RefCell};
use std::rc::Rc;

use coil::sync::{Event, Mutex, ResetMode, Semaphore, WakeMode};
use coil::{
    wait_all, wait_any, Config, Context, Drainer, Interruptor, InterruptorClear, Scheduler,
    WaitError,
};

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

// spawn `n` waiters on `ev` that count their wakeups
fn waiters(cx: &Context, ev: &Rc<Event>, n: usize) -> Rc<Cell<usize>> {
    let woken = Rc::new(Cell::new(0));
    for _ in 0..n {
        let ev = ev.clone();
        let woken = woken.clone();
        cx.spawn(move |cx| {
            cx.wait(&*ev).unwrap();
            woken.set(woken.get() + 1);
        });
    }
    woken
}

#[test]
fn event_wake_all_vs_one() {
    let (all, one) = block_on(|cx| {
        let ev = Rc::new(Event::new());
        let woken_all = waiters(cx, &ev, 3);
        cx.yield_now();
        ev.set();
        cx.yield_now();

        let auto = Rc::new(Event::auto_reset());
        let woken_one = waiters(cx, &auto, 3);
        cx.yield_now();
        auto.set();
        cx.yield_now();
        let one = woken_one.get();
        // release the rest so the run can end
        auto.set();
        auto.set();
        (woken_all.get(), one)
    });
    assert_eq!(all, 3);
    assert_eq!(one, 1);
}

#[test]
fn event_reset_wakes_nobody() {
    let woken = block_on(|cx| {
        let ev = Rc::new(Event::with_mode(WakeMode::All, ResetMode::Manual));
        ev.set();
        ev.reset();
        let woken = waiters(cx, &ev, 2);
        cx.yield_now();
        let before = woken.get();
        ev.set();
        cx.yield_now();
        (before, woken.get())
    });
    assert_eq!(woken, (0, 2));
}

#[test]
fn semaphore_limits_concurrency() {
    let peak = block_on(|cx| {
        let sem = Rc::new(Semaphore::new(2));
        let inside = Rc::new(Cell::new(0));
        let peak = Rc::new(Cell::new(0));
        let handles: Vec<_> = (0..6)
            .map(|_| {
                let (sem, inside, peak) = (sem.clone(), inside.clone(), peak.clone());
                cx.spawn(move |cx| {
                    let _acq = sem.acquire(cx, 1).unwrap();
                    inside.set(inside.get() + 1);
                    peak.set(peak.get().max(inside.get()));
                    cx.yield_now();
                    cx.yield_now();
                    inside.set(inside.get() - 1);
                })
            })
            .collect();
        for h in handles {
            h.join(cx).unwrap();
        }
        assert_eq!(sem.available(), 2);
        peak.get()
    });
    assert_eq!(peak, 2);
}

#[test]
fn mutex_is_fifo() {
    let order = block_on(|cx| {
        let m = Rc::new(Mutex::new(Vec::new()));
        let guard = m.lock(cx).unwrap();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let m = m.clone();
                cx.spawn(move |cx| {
                    let mut v = m.lock(cx).unwrap();
                    cx.yield_now();
                    v.push(i);
                })
            })
            .collect();
        cx.yield_now();
        assert!(m.is_locked());
        drop(guard);
        for h in handles {
            h.join(cx).unwrap();
        }
        let v = m.lock(cx).unwrap().clone();
        v
    });
    assert_eq!(order, vec![0, 1, 2, 3]);
}

#[test]
fn drainer_waits_for_locks() {
    let log = block_on(|cx| {
        let log = Rc::new(RefCell::new(Vec::new()));
        let drainer = Drainer::new(cx);
        let lock = drainer.lock();
        let l = log.clone();
        cx.spawn(move |cx| {
            // held work winds down once draining begins
            let _ = cx.wait(lock.drain_signal());
            l.borrow_mut().push("signalled");
            cx.yield_now();
            l.borrow_mut().push("released");
            drop(lock);
        });
        cx.yield_now();
        drainer.drain(cx).unwrap();
        log.borrow_mut().push("drained");
        assert!(drainer.lock().is_noop());
        let v = log.borrow().clone();
        v
    });
    assert_eq!(log, vec!["signalled", "released", "drained"]);
}

#[test]
fn dropping_drainer_waits_for_locks() {
    let log = block_on(|cx| {
        let log = Rc::new(RefCell::new(Vec::new()));
        let drainer = Drainer::new(cx);
        let lock = drainer.lock();
        let l = log.clone();
        cx.spawn(move |cx| {
            cx.yield_now();
            cx.yield_now();
            l.borrow_mut().push("released");
            drop(lock);
        });
        drop(drainer);
        log.borrow_mut().push("destroyed");
        let v = log.borrow().clone();
        v
    });
    assert_eq!(log, vec!["released", "destroyed"]);
}

#[test]
fn interruptor_fails_waits() {
    let ret = block_on(|cx| {
        let stop = Rc::new(Event::new());
        let never = Event::new();
        let s = stop.clone();
        cx.spawn(move |_| s.set());
        let scope = Interruptor::new(cx, &*stop);
        let ret = cx.wait(&never);
        assert!(scope.is_triggered());
        assert!(cx.is_interrupted());
        // fails right away from now on
        let again = cx.wait(&never);
        drop(scope);
        assert!(!cx.is_interrupted());
        (ret, again)
    });
    assert_eq!(ret, (Err(WaitError::Interrupted), Err(WaitError::Interrupted)));
}

#[test]
fn wait_all_fails_fast() {
    let ret = block_on(|cx| {
        let a = Rc::new(Event::new());
        let b = Event::new();
        let stop = Rc::new(Event::new());
        let (a2, stop2) = (a.clone(), stop.clone());
        cx.spawn(move |cx| {
            a2.set();
            cx.yield_now();
            stop2.set();
        });
        let _scope = Interruptor::new(cx, &*stop);
        wait_all(cx, &[&*a, &b])
    });
    assert_eq!(ret, Err(WaitError::Interrupted));
}

#[test]
fn wait_any_deregisters_losers() {
    let (index, left) = block_on(|cx| {
        let a = Event::new();
        let b = Rc::new(Event::new());
        let b2 = b.clone();
        cx.spawn(move |_| b2.set());
        let index = wait_any(cx, &[&a, &*b]).unwrap();
        (index, a.waiters())
    });
    assert_eq!(index, 1);
    assert_eq!(left, 0);
}

#[test]
fn wait_any_ready_collapses() {
    let ret = block_on(|cx| {
        let a = Event::new();
        let b = Event::new();
        b.set();
        let before = cx.stats().swaps;
        let index = wait_any(cx, &[&a, &b]);
        let all = wait_all(cx, &[&b]);
        let none = wait_all(cx, &[]);
        // nothing was switched into meanwhile
        assert_eq!(cx.stats().swaps, before);
        assert_eq!(a.waiters(), 0);
        (index, all, none)
    });
    assert_eq!(ret, (Ok(1), Ok(()), Ok(())));
}

#[test]
fn interruptor_clear_shields_waits() {
    let ret = block_on(|cx| {
        let stop = Event::new();
        stop.set();
        let _scope = Interruptor::new(cx, &stop);
        assert!(cx.is_interrupted());
        let shielded = {
            let _clear = InterruptorClear::new(cx);
            assert!(!cx.is_interrupted());
            cx.sleep(std::time::Duration::from_millis(1))
        };
        (shielded, cx.is_interrupted())
    });
    assert_eq!(ret, (Ok(()), true));
}

#[test]
fn nested_interruptor_follows_outer() {
    let ret = block_on(|cx| {
        let outer_src = Rc::new(Event::new());
        let inner_src = Event::new();
        let s = outer_src.clone();
        cx.spawn(move |_| s.set());
        let outer = Interruptor::new(cx, &*outer_src);
        let inner = Interruptor::new(cx, &inner_src);
        let never = Event::new();
        let ret = cx.wait(&never);
        let triggered = (outer.is_triggered(), inner.is_triggered());
        drop(inner);
        drop(outer);
        (ret, triggered)
    });
    assert_eq!(ret, (Err(WaitError::Interrupted), (true, true)));
}

#[test]
fn child_inherits_interruptor() {
    let ret = block_on(|cx| {
        let stop = Rc::new(Event::new());
        let scope = Interruptor::new(cx, &*stop);
        let child = cx.spawn(|cx| {
            let never = Event::new();
            cx.wait(&never)
        });
        cx.yield_now();
        stop.set();
        // the join itself must not be interrupted
        drop(scope);
        child.join(cx).map_err(|_| ())
    });
    assert_eq!(ret, Ok(Err(WaitError::Interrupted)));
}
