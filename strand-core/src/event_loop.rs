//! The event loop interface consumed by the scheduler.
//!
//! The scheduler never drives the loop itself: it only asks for callbacks to
//! run on a later turn. Any single-threaded reactor that can provide next-tick
//! callbacks and cancellable timers can host tasks; [`Reactor`](crate::reactor::Reactor)
//! is the implementation shipped with this crate.

use std::time::Duration;

/// A callback executed on the loop's own execution context.
pub type Callback = Box<dyn FnOnce() + 'static>;

/// Handle to a pending timer, used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl TimerHandle {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Scheduling primitives provided by a single-threaded event loop.
pub trait EventLoop {
    /// Runs `callback` on the next loop turn. Callbacks submitted during the
    /// same turn run in submission order.
    fn next_tick(&self, callback: Callback);

    /// Runs `callback` once `delay` has elapsed.
    fn schedule_after(&self, delay: Duration, callback: Callback) -> TimerHandle;

    /// Cancels a pending timer. Returns false if it already fired or was cancelled.
    fn cancel(&self, timer: TimerHandle) -> bool;

    /// Whether the loop is currently driving execution.
    fn is_running(&self) -> bool;

    /// Monotonic time since the loop was created.
    fn now(&self) -> Duration;
}
