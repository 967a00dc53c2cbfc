//! Sleeping and yielding for the current task.
//!
//! All of these suspend the calling task in the `Sleeping` state, so
//! [`Task::wakeup`](crate::task::Task::wakeup) ends them early.
//!
//! # Examples
//!
//! ```rust
//! use strand_core::runtime::Builder;
//! use strand_core::time::{sleep, Duration};
//!
//! let runtime = Builder::new().virtual_clock().build();
//! let slept = runtime
//!     .block_on(async { sleep(Duration::from_millis(250)).await })
//!     .unwrap();
//! assert_eq!(slept, Duration::from_millis(250));
//! ```

use crate::error::{Error, Result};
use crate::event_loop::{EventLoop, TimerHandle};
use crate::resume::safe_suspend;
use crate::task::{self, Status};
use crate::value::Value;
use std::cell::Cell;
use std::rc::Rc;

pub use std::time::Duration;

/// Cancels the timer it holds when dropped.
pub(crate) struct TimerGuard {
    event_loop: Rc<dyn EventLoop>,
    timer: Cell<Option<TimerHandle>>,
}

impl TimerGuard {
    pub(crate) fn new(event_loop: Rc<dyn EventLoop>) -> Self {
        Self {
            event_loop,
            timer: Cell::new(None),
        }
    }

    pub(crate) fn arm(&self, timer: Option<TimerHandle>) {
        self.timer.set(timer);
    }
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            self.event_loop.cancel(timer);
        }
    }
}

async fn sleep_for(limit: Option<Duration>) -> Result<Duration> {
    let task = task::suspendable()?;
    let event_loop = task.event_loop()?;
    let started = event_loop.now();

    let timer = TimerGuard::new(event_loop.clone());
    safe_suspend(&task, Status::Sleeping, |resumable| {
        if let Some(limit) = limit {
            timer.arm(resumable.fire_after(limit));
        }
    })
    .await?;
    drop(timer);

    Ok(event_loop.now().saturating_sub(started))
}

/// Time elapsed on the current scheduler's event loop.
pub fn now() -> Result<Duration> {
    Ok(task::current()?.event_loop()?.now())
}

/// Suspends the current task for `duration` and returns the time actually
/// slept, which is shorter if the task was woken early.
pub async fn sleep(duration: Duration) -> Result<Duration> {
    sleep_for(Some(duration)).await
}

/// Like [`sleep`] with a duration in seconds. Returns the slept time rounded
/// to whole seconds.
pub async fn sleep_secs(seconds: f64) -> Result<u64> {
    let duration = Duration::try_from_secs_f64(seconds)
        .map_err(|_| Error::TypeMismatch(format!("{seconds} is not a valid number of seconds")))?;
    let slept = sleep(duration).await?;
    Ok(slept.as_secs_f64().round() as u64)
}

/// Sleeps until another task wakes the current one.
pub async fn stop() -> Result<Duration> {
    sleep_for(None).await
}

/// Lets the event loop run a turn before continuing.
pub async fn pass() -> Result<()> {
    let task = task::suspendable()?;
    safe_suspend(&task, Status::Sleeping, |resumable| {
        resumable.fire_next_tick();
    })
    .await?;
    Ok(())
}

/// Suspends until the current task is resumed and returns the delivered value.
///
/// Values that arrived while the task was waiting for something else are
/// returned first, in the order they arrived. A `wakeup` yields `()`.
pub async fn yield_now() -> Result<Value> {
    task::yield_current().await
}
