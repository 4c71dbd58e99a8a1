//! # Cooperative Stackful Coroutine Runtime
//!
//! coil runs stackful coroutines on a fixed set of worker threads. Each
//! worker owns a dispatcher that switches between its coroutines
//! cooperatively, a timer list and an fd selector. Coroutines never
//! migrate; work crosses workers through explicit messages.
//!
//! ## Features
//!
//! * Stackful coroutines based on the `generator` crate, with pooled stacks
//! * A uniform wait protocol: every primitive is a [`Waitable`], every wait
//!   ends in success, interruption or the loss of the awaited object
//! * `wait_any` / `wait_all` over heterogeneous waitables
//! * Nested cancellation scopes ([`Interruptor`])
//! * A drain gate for safe teardown of resources with in flight work
//! * Events, semaphores, mutexes, one shot and periodic timers
//! * Fd readiness waits on top of epoll
//! * Spawning on and calling into other workers, with panic capture
//!
//! ```rust
//! use coil::{Config, Scheduler};
//!
//! let mut config = Config::new();
//! config.set_workers(2);
//! let sched = Scheduler::new(config).unwrap();
//! let (a, b) = (sched.workers()[0], sched.workers()[1]);
//! let ret = sched.block_on(a, move |cx| {
//!     let child = cx.spawn(|_| 20);
//!     let remote = cx.call_on(b, |_| 22).unwrap();
//!     child.join(cx).unwrap() + remote
//! });
//! assert_eq!(ret.unwrap(), 42);
//! ```

#[macro_use]
#[doc(hidden)]
extern crate log;

#[macro_use]
mod macros;

mod cancel;
mod config;
mod coroutine;
mod coroutine_impl;
mod dispatcher;
mod drainer;
mod join;
mod pool;
mod scheduler;
mod select;
mod signal;
mod timeout_list;
mod wait;

pub mod io;
pub mod sync;

pub use crate::cancel::{Interruptor, InterruptorClear};
pub use crate::config::{Config, ShutdownPolicy};
pub use crate::coroutine::{CallError, Context, NoSwapGuard};
pub use crate::coroutine_impl::CoroutineId;
pub use crate::dispatcher::DispatcherStats;
pub use crate::drainer::{Drainer, DrainerLock};
pub use crate::join::{JoinError, JoinHandle};
pub use crate::scheduler::{KillSwitch, Remote, RemoteHandle, Scheduler, WorkerId};
pub use crate::select::{wait_all, wait_any};
pub use crate::signal::{CrossThreadSignal, SignalSender};
pub use crate::timeout_list::{TimeoutList, TimerToken};
pub use crate::wait::{
    Registration, Resolvable, WaitError, WaitKey, WaitList, WaitResult, Waitable, Waiter,
};
