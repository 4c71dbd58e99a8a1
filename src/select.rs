//! Block on several waitables at once.

use std::cell::Cell;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::coroutine::{Context, CoroutineWaiter};
use crate::wait::{Registration, Resolvable, WaitError, WaitKey, WaitResult, Waitable, Waiter};

// proxy index of the interruptor registration
const INTERRUPTOR: usize = usize::MAX;

/// Collects the proxies' reports and wakes the coroutine once the
/// combined wait is decided.
struct MultiWaiter {
    needed: Cell<usize>,
    outcome: Cell<Option<(WaitResult, usize)>>,
    // set once the coroutine is about to suspend
    armed: Cell<bool>,
    waiter: Rc<CoroutineWaiter>,
}

impl MultiWaiter {
    #[inline]
    fn is_done(&self) -> bool {
        self.outcome.get().is_some()
    }

    fn report(&self, index: usize, result: WaitResult) -> bool {
        if self.is_done() {
            return false;
        }
        if result.is_success() {
            let needed = self.needed.get() - 1;
            self.needed.set(needed);
            if needed > 0 {
                return true;
            }
        }
        // any failure decides the whole wait
        self.outcome.set(Some((result, index)));
        if self.armed.get() {
            self.waiter.resolve(result);
        }
        true
    }
}

struct Proxy {
    ctl: Rc<MultiWaiter>,
    index: usize,
    fired: Cell<bool>,
}

impl Proxy {
    fn new(ctl: &Rc<MultiWaiter>, index: usize) -> Rc<Proxy> {
        Rc::new(Proxy {
            ctl: ctl.clone(),
            index,
            fired: Cell::new(false),
        })
    }
}

impl Resolvable for Proxy {
    fn resolve(&self, result: WaitResult) -> bool {
        if self.fired.replace(true) {
            return false;
        }
        self.ctl.report(self.index, result)
    }
}

fn register(obj: &dyn Waitable, proxy: Rc<Proxy>) -> Option<WaitKey> {
    match obj.register(proxy.clone() as Waiter) {
        Registration::Ready(result) => {
            proxy.resolve(result);
            None
        }
        Registration::Pending(key) => Some(key),
    }
}

fn multi_wait(cx: &Context, objects: &[&dyn Waitable], needed: usize) -> Result<usize, WaitError> {
    let interruptor = cx.current_interruptor();
    if interruptor.as_ref().map_or(false, |i| i.is_triggered()) {
        return Err(WaitError::Interrupted);
    }

    let ctl = Rc::new(MultiWaiter {
        needed: Cell::new(needed),
        outcome: Cell::new(None),
        armed: Cell::new(false),
        waiter: CoroutineWaiter::new(cx),
    });

    let mut keys: SmallVec<[(usize, WaitKey); 8]> = SmallVec::new();
    for (index, obj) in objects.iter().enumerate() {
        if ctl.is_done() {
            break;
        }
        if let Some(key) = register(*obj, Proxy::new(&ctl, index)) {
            keys.push((index, key));
        }
    }
    let mut interrupt_key = None;
    if let Some(i) = interruptor.as_ref().filter(|_| !ctl.is_done()) {
        interrupt_key = register(&**i, Proxy::new(&ctl, INTERRUPTOR));
    }

    let mut woke = WaitResult::Success;
    if !ctl.is_done() {
        ctl.armed.set(true);
        woke = cx.suspend();
    }

    // late completions must not reach a finished wait
    for (index, key) in keys {
        objects[index].deregister(key);
    }
    if let (Some(i), Some(key)) = (interruptor.as_ref(), interrupt_key) {
        i.deregister(key);
    }
    ctl.waiter.expire();

    match ctl.outcome.get() {
        Some((result, index)) => result.into_result().map(|()| index),
        None => Err(match woke {
            WaitResult::Interrupted => WaitError::Interrupted,
            _ => WaitError::ObjectLost,
        }),
    }
}

/// Wait until any of `objects` resolves, returns the index of the first one.
///
/// The others are deregistered before this returns. A failure of any
/// object, or of the current interruptor, fails the whole wait.
pub fn wait_any(cx: &Context, objects: &[&dyn Waitable]) -> Result<usize, WaitError> {
    assert!(!objects.is_empty(), "wait_any on nothing");
    multi_wait(cx, objects, 1)
}

/// Wait until every one of `objects` resolved.
///
/// Fails fast: the first `Interrupted` or `ObjectLost` ends the wait even
/// if the rest would have succeeded.
pub fn wait_all(cx: &Context, objects: &[&dyn Waitable]) -> Result<(), WaitError> {
    if objects.is_empty() {
        return Ok(());
    }
    multi_wait(cx, objects, objects.len()).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coroutine_impl::CoroutineId;

    fn ctl(needed: usize) -> Rc<MultiWaiter> {
        Rc::new(MultiWaiter {
            needed: Cell::new(needed),
            outcome: Cell::new(None),
            armed: Cell::new(false),
            waiter: CoroutineWaiter::detached(CoroutineId(coil_queue::Key::from_bits(0))),
        })
    }

    #[test]
    fn all_counts_down() {
        let ctl = ctl(2);
        let a = Proxy::new(&ctl, 0);
        let b = Proxy::new(&ctl, 1);
        assert!(a.resolve(WaitResult::Success));
        assert!(!ctl.is_done());
        // a proxy fires once
        assert!(!a.resolve(WaitResult::Success));
        assert!(b.resolve(WaitResult::Success));
        assert_eq!(ctl.outcome.get(), Some((WaitResult::Success, 1)));
    }

    #[test]
    fn failure_is_fail_fast() {
        let ctl = ctl(3);
        Proxy::new(&ctl, 0).resolve(WaitResult::Success);
        Proxy::new(&ctl, 1).resolve(WaitResult::Interrupted);
        assert_eq!(ctl.outcome.get(), Some((WaitResult::Interrupted, 1)));
        // refused, the wait is decided
        assert!(!Proxy::new(&ctl, 2).resolve(WaitResult::Success));
    }
}
