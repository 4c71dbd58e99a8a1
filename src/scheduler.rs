use std::any::Any;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};
use std::sync::Arc;
use std::thread;

use coil_queue::mpsc::Queue;
use coil_queue::Key;
use crossbeam::sync::WaitGroup;
use crossbeam::utils::CachePadded;
use parking_lot::{Condvar, Mutex};

use crate::config::{Config, ShutdownPolicy};
use crate::coroutine::Context;
use crate::dispatcher::Dispatcher;
use crate::io::{Poller, Selector, Waker};
use crate::wait::WaitResult;

/// Identifies one worker thread of a [`Scheduler`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub(crate) usize);

impl WorkerId {
    #[inline]
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Debug for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "worker#{}", self.0)
    }
}

/// Cross thread traffic into a dispatcher.
pub(crate) enum Message {
    Spawn(Box<dyn FnOnce(&Dispatcher) + Send>),
    Pulse(Key, WaitResult),
    Shutdown,
}

struct Mailbox {
    queue: Queue<Message>,
    waker: Arc<Waker>,
}

/// State every worker and every handle can reach.
pub(crate) struct Shared {
    mailboxes: Vec<Mailbox>,
    // coroutines alive across all workers, as far as they have reported
    outstanding: CachePadded<AtomicIsize>,
    killed: AtomicBool,
    idle: Mutex<()>,
    idle_cond: Condvar,
    started: Mutex<bool>,
    start_cond: Condvar,
}

impl Shared {
    /// mailboxes for `n` workers, with the poller each worker selects on
    pub fn new(n: usize) -> io::Result<(Arc<Shared>, Vec<Poller>)> {
        let mut mailboxes = Vec::with_capacity(n);
        let mut pollers = Vec::with_capacity(n);
        for _ in 0..n {
            let waker = Arc::new(Waker::new()?);
            pollers.push(Poller::new(waker.clone())?);
            mailboxes.push(Mailbox {
                queue: Queue::new(),
                waker,
            });
        }

        let shared = Arc::new(Shared {
            mailboxes,
            outstanding: CachePadded::new(AtomicIsize::new(0)),
            killed: AtomicBool::new(false),
            idle: Mutex::new(()),
            idle_cond: Condvar::new(),
            started: Mutex::new(false),
            start_cond: Condvar::new(),
        });
        Ok((shared, pollers))
    }

    #[inline]
    pub fn workers(&self) -> usize {
        self.mailboxes.len()
    }

    pub fn post(&self, worker: WorkerId, msg: Message) {
        let mailbox = &self.mailboxes[worker.0];
        mailbox.queue.push(msg);
        mailbox.waker.wake();
    }

    /// # Safety
    ///
    /// only the worker owning the mailbox may pop from it
    pub unsafe fn pop_message(&self, worker: WorkerId) -> Option<Message> {
        self.mailboxes[worker.0].queue.pop()
    }

    /// count a coroutine that is about to be posted to another worker
    pub fn count_remote(&self) {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
    }

    /// fold one worker's net change into the global count
    pub fn account(&self, delta: isize) {
        if delta == 0 {
            return;
        }
        let now = self.outstanding.fetch_add(delta, Ordering::AcqRel) + delta;
        debug_assert!(now >= 0, "outstanding count went negative");
        if now == 0 {
            let _guard = self.idle.lock();
            self.idle_cond.notify_all();
        }
    }

    fn kill(&self) {
        let _guard = self.idle.lock();
        self.killed.store(true, Ordering::Release);
        self.idle_cond.notify_all();
    }

    fn open_gate(&self) {
        let mut started = self.started.lock();
        if !*started {
            *started = true;
            self.start_cond.notify_all();
        }
    }

    fn wait_gate(&self) {
        let mut started = self.started.lock();
        while !*started {
            self.start_cond.wait(&mut started);
        }
    }
}

/// Handle that ends a run under [`ShutdownPolicy::Kill`].
#[derive(Clone)]
pub struct KillSwitch {
    shared: Arc<Shared>,
}

impl KillSwitch {
    pub fn kill(&self) {
        info!("kill switch flipped");
        self.shared.kill();
    }
}

impl fmt::Debug for KillSwitch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.pad("KillSwitch { .. }")
    }
}

/// Result slot of a coroutine spawned from another thread.
struct RemoteSlot<T> {
    value: Mutex<Option<thread::Result<T>>>,
    done: AtomicBool,
}

impl<T> RemoteSlot<T> {
    fn set(&self, value: thread::Result<T>) {
        *self.value.lock() = Some(value);
        self.done.store(true, Ordering::Release);
    }
}

/// Handle to a coroutine spawned through a [`Remote`].
pub struct RemoteHandle<T> {
    slot: Arc<RemoteSlot<T>>,
}

impl<T> RemoteHandle<T> {
    /// has the coroutine finished (returned or panicked)
    pub fn is_done(&self) -> bool {
        self.slot.done.load(Ordering::Acquire)
    }

    /// take the coroutine's outcome, `None` while it has not finished
    pub fn take(&self) -> Option<thread::Result<T>> {
        self.slot.value.lock().take()
    }
}

impl<T> fmt::Debug for RemoteHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RemoteHandle")
            .field("done", &self.is_done())
            .finish()
    }
}

/// Addressable target for one worker, usable from any thread.
#[derive(Clone)]
pub struct Remote {
    shared: Arc<Shared>,
    worker: WorkerId,
}

impl Remote {
    pub(crate) fn new(shared: Arc<Shared>, worker: WorkerId) -> Self {
        Remote { shared, worker }
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    /// Spawn `f` as a coroutine on the target worker.
    pub fn spawn<F, T>(&self, f: F) -> RemoteHandle<T>
    where
        F: FnOnce(&Context) -> T + Send + 'static,
        T: Send + 'static,
    {
        let slot = Arc::new(RemoteSlot {
            value: Mutex::new(None),
            done: AtomicBool::new(false),
        });
        let body_slot = slot.clone();
        let exit_slot = slot.clone();
        self.post_spawn(
            move |cx| body_slot.set(Ok(f(cx))),
            move |panic| {
                if let Some(panic) = panic {
                    exit_slot.set(Err(panic));
                }
            },
        );
        RemoteHandle { slot }
    }

    /// post a counted spawn, `on_exit` runs on the target once the coroutine retired
    pub(crate) fn post_spawn<B, E>(&self, body: B, on_exit: E)
    where
        B: FnOnce(&Context) + Send + 'static,
        E: FnOnce(Option<Box<dyn Any + Send>>) + Send + 'static,
    {
        self.shared.count_remote();
        self.shared.post(
            self.worker,
            Message::Spawn(Box::new(move |dispatcher: &Dispatcher| {
                dispatcher.spawn(Box::new(body), Box::new(on_exit), Vec::new(), false, false);
            })),
        );
    }
}

impl fmt::Debug for Remote {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Remote").field("worker", &self.worker).finish()
    }
}

/// Owner of the worker threads.
///
/// Each worker runs a dispatcher plus a poll loop over its timers and file
/// descriptors. Coroutines only start once [`run`](Scheduler::run) is first
/// called; dropping the scheduler shuts every worker down and joins it.
pub struct Scheduler {
    shared: Arc<Shared>,
    policy: ShutdownPolicy,
    workers: Vec<WorkerId>,
    threads: Vec<thread::JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(config: Config) -> io::Result<Scheduler> {
        let n = config.get_workers();
        let (shared, pollers) = Shared::new(n)?;

        let cores = if config.get_pin_workers() {
            core_affinity::get_core_ids().unwrap_or_default()
        } else {
            Vec::new()
        };

        let ready = WaitGroup::new();
        let mut threads = Vec::with_capacity(n);
        for (index, poller) in pollers.into_iter().enumerate() {
            let worker_shared = shared.clone();
            let config = config.clone();
            let ready = ready.clone();
            let core = if cores.is_empty() {
                None
            } else {
                Some(cores[index % cores.len()])
            };
            let spawned = thread::Builder::new()
                .name(format!("coil-worker-{}", index))
                .spawn(move || {
                    if let Some(core) = core {
                        if !core_affinity::set_for_current(core) {
                            warn!("failed to pin worker {} to {:?}", index, core);
                        }
                    }
                    let worker = WorkerId(index);
                    let dispatcher = Dispatcher::new(
                        worker,
                        worker_shared.clone(),
                        Selector::new(poller),
                        config.get_stack_size(),
                        config.get_pool_capacity(),
                        config.get_max_swaps_per_loop(),
                    );
                    debug!("{:?} ready", worker);
                    drop(ready);
                    worker_shared.wait_gate();
                    dispatcher.run_loop();
                });
            match spawned {
                Ok(t) => threads.push(t),
                Err(e) => {
                    // let the ones already started see a shutdown
                    for i in 0..threads.len() {
                        shared.post(WorkerId(i), Message::Shutdown);
                    }
                    shared.open_gate();
                    for t in threads {
                        let _ = t.join();
                    }
                    return Err(e);
                }
            }
        }
        ready.wait();
        info!("scheduler started with {} workers", n);

        Ok(Scheduler {
            shared,
            policy: config.get_shutdown_policy(),
            workers: (0..n).map(WorkerId).collect(),
            threads,
        })
    }

    pub fn workers(&self) -> &[WorkerId] {
        &self.workers
    }

    pub fn remote(&self, worker: WorkerId) -> Remote {
        assert!(worker.0 < self.workers.len(), "no such worker {:?}", worker);
        Remote::new(self.shared.clone(), worker)
    }

    pub fn spawn_on<F, T>(&self, worker: WorkerId, f: F) -> RemoteHandle<T>
    where
        F: FnOnce(&Context) -> T + Send + 'static,
        T: Send + 'static,
    {
        self.remote(worker).spawn(f)
    }

    /// spawn a clone of `f` on every worker
    pub fn broadcast<F, T>(&self, f: F) -> Vec<RemoteHandle<T>>
    where
        F: Fn(&Context) -> T + Clone + Send + 'static,
        T: Send + 'static,
    {
        self.workers
            .iter()
            .map(|w| self.spawn_on(*w, f.clone()))
            .collect()
    }

    pub fn kill_switch(&self) -> KillSwitch {
        KillSwitch {
            shared: self.shared.clone(),
        }
    }

    /// coroutines alive across all workers, as last reported
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.load(Ordering::Acquire).max(0) as usize
    }

    /// Let the workers run and block until the run is over.
    ///
    /// Under [`ShutdownPolicy::Eager`] that is when every coroutine on every
    /// worker has completed, under [`ShutdownPolicy::Kill`] when the kill
    /// switch is flipped. Returns the outstanding count seen at that point.
    pub fn run(&self) -> usize {
        self.shared.open_gate();
        let mut guard = self.shared.idle.lock();
        match self.policy {
            ShutdownPolicy::Eager => {
                while self.shared.outstanding.load(Ordering::Acquire) > 0 {
                    self.shared.idle_cond.wait(&mut guard);
                }
            }
            ShutdownPolicy::Kill => {
                while !self.shared.killed.load(Ordering::Acquire) {
                    self.shared.idle_cond.wait(&mut guard);
                }
                // re-arm for the next run
                self.shared.killed.store(false, Ordering::Release);
            }
        }
        drop(guard);
        let outstanding = self.outstanding();
        debug!("run returned, outstanding={}", outstanding);
        outstanding
    }

    /// Spawn `f` on `worker`, run, and hand back what it returned.
    pub fn block_on<F, T>(&self, worker: WorkerId, f: F) -> thread::Result<T>
    where
        F: FnOnce(&Context) -> T + Send + 'static,
        T: Send + 'static,
    {
        let handle = self.spawn_on(worker, f);
        self.run();
        match handle.take() {
            Some(ret) => ret,
            None => Err(Box::new("coroutine did not finish before the run ended")),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for worker in self.workers.iter() {
            self.shared.post(*worker, Message::Shutdown);
        }
        self.shared.open_gate();
        for t in self.threads.drain(..) {
            if t.join().is_err() {
                error!("worker thread panicked");
            }
        }
        info!("scheduler stopped");
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("workers", &self.workers.len())
            .field("policy", &self.policy)
            .finish()
    }
}
