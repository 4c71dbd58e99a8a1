//! Synchronization primitives for the coroutines of one worker.
//!
//! None of these are `Send`: they live on the worker that created them and
//! are shared between its coroutines through `Rc`. Use
//! [`CrossThreadSignal`](crate::CrossThreadSignal) or
//! [`Context::call_on`](crate::Context::call_on) to cross workers.

mod event;
mod mutex;
mod semaphore;
mod timer;

pub use self::event::{Event, ResetMode, WakeMode};
pub use self::mutex::{Mutex, MutexGuard};
pub use self::semaphore::{Semaphore, SemaphoreAcq};
pub use self::timer::{PeriodicTimer, SingleTimer};
