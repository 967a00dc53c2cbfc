//! Thread-compatible synchronization primitives for cooperative tasks.
//!
//! - [`Mutex`]: exclusive ownership with a FIFO wait queue.
//! - [`ConditionVariable`]: wait/signal/broadcast with optional timeouts.
//! - [`Queue`]: unbounded FIFO whose `pop` blocks until an item arrives.
//!
//! Handles are cheap to clone and share state. Every wake is delivered on a
//! later turn of the event loop, never reentrantly.

mod condvar;
mod mutex;
mod queue;

pub use condvar::ConditionVariable;
pub use mutex::Mutex;
pub use queue::Queue;
