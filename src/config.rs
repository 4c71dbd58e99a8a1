//! `coil` configuration interface
//!

// default configs
// default stack size, in usize
const DEFAULT_STACK_SIZE: usize = 0x4000;
const DEFAULT_POOL_CAPACITY: usize = 100;
const DEFAULT_MAX_SWAPS: usize = 100;

/// How [`Scheduler::run`] decides that a run is over.
///
/// [`Scheduler::run`]: crate::Scheduler::run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPolicy {
    /// return once every spawned coroutine on every worker has completed
    Eager,
    /// return once the [`KillSwitch`](crate::KillSwitch) is flipped
    Kill,
}

/// `coil` configuration type
///
/// Passed by value to [`Scheduler::new`](crate::Scheduler::new); each
/// worker copies what it needs, there is no process wide configuration.
#[derive(Debug, Clone)]
pub struct Config {
    workers: usize,
    stack_size: usize,
    pool_capacity: usize,
    max_swaps_per_loop: usize,
    shutdown_policy: ShutdownPolicy,
    pin_workers: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Config {
            workers: num_cpus::get(),
            stack_size: DEFAULT_STACK_SIZE,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            max_swaps_per_loop: DEFAULT_MAX_SWAPS,
            shutdown_policy: ShutdownPolicy::Eager,
            pin_workers: false,
        }
    }

    /// set the worker thread number
    ///
    /// the minimum worker thread is 1, if you pass 0 to it, will use the cpu number
    pub fn set_workers(&mut self, workers: usize) -> &mut Self {
        info!("set workers={:?}", workers);
        self.workers = if workers == 0 { num_cpus::get() } else { workers };
        self
    }

    /// get the worker thread number
    pub fn get_workers(&self) -> usize {
        self.workers
    }

    /// set default coroutine stack size in usize
    ///
    /// if you pass 0 to it, will use internal default.
    /// an odd size turns on stack footprint reporting when a coroutine retires
    pub fn set_stack_size(&mut self, size: usize) -> &mut Self {
        info!("set stack size={:?}", size);
        self.stack_size = if size == 0 { DEFAULT_STACK_SIZE } else { size };
        self
    }

    /// get the default coroutine stack size
    pub fn get_stack_size(&self) -> usize {
        self.stack_size
    }

    /// set the number of retired stacks each worker keeps for reuse
    pub fn set_pool_capacity(&mut self, capacity: usize) -> &mut Self {
        info!("set pool capacity={:?}", capacity);
        self.pool_capacity = capacity;
        self
    }

    /// get the coroutine pool capacity
    pub fn get_pool_capacity(&self) -> usize {
        self.pool_capacity
    }

    /// set how many coroutines a worker resumes before it looks at
    /// its mailbox, timers and file descriptors again
    pub fn set_max_swaps_per_loop(&mut self, swaps: usize) -> &mut Self {
        info!("set max swaps per loop={:?}", swaps);
        self.max_swaps_per_loop = swaps.max(1);
        self
    }

    pub fn get_max_swaps_per_loop(&self) -> usize {
        self.max_swaps_per_loop
    }

    pub fn set_shutdown_policy(&mut self, policy: ShutdownPolicy) -> &mut Self {
        info!("set shutdown policy={:?}", policy);
        self.shutdown_policy = policy;
        self
    }

    pub fn get_shutdown_policy(&self) -> ShutdownPolicy {
        self.shutdown_policy
    }

    /// pin each worker thread to its own core
    pub fn set_pin_workers(&mut self, pin: bool) -> &mut Self {
        info!("set pin workers={:?}", pin);
        self.pin_workers = pin;
        self
    }

    pub fn get_pin_workers(&self) -> bool {
        self.pin_workers
    }
}
