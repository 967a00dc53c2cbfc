//! A reactor and scheduler pair that can drive a root task to completion.
//!
//! # Examples
//!
//! ```rust
//! use strand_core::event_loop::EventLoop;
//! use strand_core::runtime::Builder;
//! use strand_core::time::{sleep, Duration};
//!
//! let runtime = Builder::new().virtual_clock().build();
//! let value = runtime
//!     .block_on(async {
//!         sleep(Duration::from_secs(3600)).await?;
//!         Ok("done")
//!     })
//!     .unwrap();
//! assert_eq!(value, "done");
//! assert_eq!(runtime.reactor().now(), Duration::from_secs(3600));
//! ```

use crate::context::EnterGuard;
use crate::error::{Error, Result};
use crate::event_loop::EventLoop;
use crate::reactor::{ClockMode, Reactor, RunOutcome};
use crate::scheduler::Scheduler;
use crate::task::Task;
use std::any::Any;
use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;
use tracing::debug;

/// Configures a [`Runtime`].
#[derive(Debug, Clone, Default)]
pub struct Builder {
    clock: ClockMode,
    turn_budget: Option<u64>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses simulated time: idle turns jump straight to the next timer.
    pub fn virtual_clock(mut self) -> Self {
        self.clock = ClockMode::Virtual;
        self
    }

    /// Uses wall-clock time (the default).
    pub fn system_clock(mut self) -> Self {
        self.clock = ClockMode::System;
        self
    }

    pub fn clock(mut self, clock: ClockMode) -> Self {
        self.clock = clock;
        self
    }

    /// Caps the number of loop turns a single `block_on` may take.
    pub fn turn_budget(mut self, turns: u64) -> Self {
        self.turn_budget = Some(turns);
        self
    }

    pub fn build(self) -> Runtime {
        let reactor = Rc::new(Reactor::new(self.clock).with_turn_budget(self.turn_budget));
        let scheduler = Scheduler::new(reactor.clone());
        debug!(clock = ?self.clock, turn_budget = ?self.turn_budget, "runtime built");
        Runtime { reactor, scheduler }
    }
}

/// Owns a [`Reactor`] and the [`Scheduler`] running on it.
///
/// Dropping the runtime shuts the scheduler down, killing any task still alive.
pub struct Runtime {
    reactor: Rc<Reactor>,
    scheduler: Scheduler,
}

impl Runtime {
    /// A runtime on the system clock.
    pub fn new() -> Self {
        Builder::new().build()
    }

    pub fn reactor(&self) -> &Rc<Reactor> {
        &self.reactor
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Makes this runtime's scheduler current until the guard is dropped.
    pub fn enter(&self) -> EnterGuard {
        self.scheduler.enter()
    }

    /// Spawns a task without driving the loop.
    pub fn spawn<F, T>(&self, future: F) -> Task
    where
        F: Future<Output = Result<T>> + 'static,
        T: Any,
    {
        let _enter = self.enter();
        self.scheduler.spawn(future)
    }

    /// Spawns `future` as the root task and runs the event loop until it
    /// finishes.
    ///
    /// Fails with [`Error::Stalled`] if the loop runs out of work while the
    /// root task is still suspended, and with [`Error::BudgetExhausted`] if the
    /// turn budget runs out first. An error returned by the root task is
    /// passed through unchanged.
    pub fn block_on<F, T>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + 'static,
        T: 'static,
    {
        let output: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
        let slot = output.clone();

        let _enter = self.enter();
        let root = self.reactor.run_in_turn(|| {
            self.scheduler.spawn(async move {
                let value = future.await?;
                *slot.borrow_mut() = Some(value);
                Ok(())
            })
        });

        match self.reactor.run_until(|| !root.is_alive()) {
            RunOutcome::Done => {}
            RunOutcome::Idle | RunOutcome::Stopped => return Err(Error::Stalled(root.id())),
            RunOutcome::BudgetExhausted => {
                let budget = self.reactor.turn_budget().unwrap_or_default();
                return Err(Error::BudgetExhausted(budget));
            }
        }

        if let Some(error) = root.error() {
            return Err(error);
        }
        let value = output.borrow_mut().take();
        value.ok_or(Error::Killed)
    }

    /// Kills every live task and retires the proxy.
    pub fn shutdown(&self) {
        let _enter = self.enter();
        self.scheduler.shutdown();
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("now", &self.reactor.now())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

/// Runs `future` to completion on a fresh system-clock runtime.
pub fn block_on<F, T>(future: F) -> Result<T>
where
    F: Future<Output = Result<T>> + 'static,
    T: 'static,
{
    Runtime::new().block_on(future)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{stop, Duration};

    #[test]
    fn test_block_on_returns_root_value() {
        let runtime = Builder::new().virtual_clock().build();
        assert_eq!(runtime.block_on(async { Ok(5) }).unwrap(), 5);
    }

    #[test]
    fn test_block_on_reports_stall() {
        let runtime = Builder::new().virtual_clock().build();
        let result = runtime.block_on(async {
            stop().await?;
            Ok(())
        });
        assert!(matches!(result, Err(Error::Stalled(_))));
    }

    #[test]
    fn test_block_on_honours_turn_budget() {
        let runtime = Builder::new().virtual_clock().turn_budget(3).build();
        let result: Result<()> = runtime.block_on(async {
            loop {
                crate::time::pass().await?;
            }
        });
        assert!(matches!(result, Err(Error::BudgetExhausted(3))));
    }

    #[test]
    fn test_block_on_passes_root_error_through() {
        let runtime = Builder::new().virtual_clock().build();
        let result: Result<()> = runtime.block_on(async { Err(Error::msg("nope")) });
        assert_eq!(result.unwrap_err().to_string(), "nope");
    }

    #[test]
    fn test_root_task_starts_inside_a_turn() {
        let runtime = Builder::new().virtual_clock().build();
        let reactor = runtime.reactor().clone();
        let running = runtime.block_on(async move { Ok(reactor.is_running()) });
        assert!(running.unwrap());
        assert!(!runtime.reactor().is_running());
    }

    #[test]
    fn test_system_clock_sleeps_for_real() {
        let runtime = Builder::new().system_clock().build();
        let started = std::time::Instant::now();
        runtime
            .block_on(async { crate::time::sleep(Duration::from_millis(20)).await })
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
