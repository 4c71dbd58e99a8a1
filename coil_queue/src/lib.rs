//! Containers used by the `coil` runtime.
//!
//! * [`arena`]: slab of generation-checked slots
//! * [`list`]: doubly linked list whose links are arena indices
//! * [`mpsc`]: lock-free multi-producer single-consumer queue for cross-thread handoff

pub mod arena;
pub mod list;
pub mod mpsc;

pub use arena::{Arena, Key};
pub use list::List;
