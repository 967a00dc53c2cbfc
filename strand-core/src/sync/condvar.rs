//! Condition variables with optional timeouts.

use crate::error::Result;
use crate::resume::{safe_suspend, Resumable};
use crate::sync::Mutex;
use crate::task::{self, Status};
use crate::time::TimerGuard;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;
use tracing::trace;

struct Waiter {
    resumable: Resumable,
    signaled: Rc<Cell<bool>>,
}

/// A condition variable for cooperative tasks.
///
/// Waiters are woken in the order they started waiting. If a signal and a
/// timeout race, the signal wins: a waiter removed by `signal` reports
/// `true` even when its timeout fires first in the same turn.
///
/// # Examples
///
/// ```rust
/// use strand_core::runtime::Builder;
/// use strand_core::sync::{ConditionVariable, Mutex};
/// use strand_core::{pass, spawn};
///
/// let runtime = Builder::new().virtual_clock().build();
/// runtime
///     .block_on(async {
///         let mutex = Mutex::new();
///         let cond = ConditionVariable::new();
///
///         let (m, c) = (mutex.clone(), cond.clone());
///         let waiter = spawn(async move {
///             m.lock().await?;
///             let signaled = c.wait(Some(&m), None).await?;
///             m.unlock()?;
///             Ok(signaled)
///         })?;
///
///         pass().await?;
///         cond.signal();
///         let signaled = waiter.value().await?.and_then(|v| v.get::<bool>());
///         assert_eq!(signaled, Some(true));
///         Ok(())
///     })
///     .unwrap();
/// ```
#[derive(Clone, Default)]
pub struct ConditionVariable {
    waiters: Rc<RefCell<VecDeque<Waiter>>>,
}

impl ConditionVariable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Releases `mutex` (if given), sleeps until signaled or until `timeout`
    /// elapses, then re-acquires `mutex`.
    ///
    /// Returns whether the wake came from `signal`/`broadcast`. A `wakeup` or
    /// an expired timeout returns `false`. If the wait fails (kill or raise)
    /// the mutex is not re-acquired.
    pub async fn wait(&self, mutex: Option<&Mutex>, timeout: Option<Duration>) -> Result<bool> {
        self.wait_as(Status::Sleeping, mutex, timeout).await
    }

    pub(crate) async fn wait_as(
        &self,
        status: Status,
        mutex: Option<&Mutex>,
        timeout: Option<Duration>,
    ) -> Result<bool> {
        let task = task::suspendable()?;
        let event_loop = task.event_loop()?;
        if let Some(mutex) = mutex {
            mutex.unlock()?;
        }

        let signaled = Rc::new(Cell::new(false));
        let armed: RefCell<Option<Resumable>> = RefCell::new(None);
        let timer = TimerGuard::new(event_loop.clone());

        let woken = safe_suspend(&task, status, |resumable| {
            self.waiters.borrow_mut().push_back(Waiter {
                resumable: resumable.clone(),
                signaled: signaled.clone(),
            });
            if let Some(timeout) = timeout {
                let waiters = Rc::downgrade(&self.waiters);
                let expired = resumable.clone();
                timer.arm(Some(event_loop.schedule_after(
                    timeout,
                    Box::new(move || {
                        if let Some(waiters) = waiters.upgrade() {
                            waiters
                                .borrow_mut()
                                .retain(|waiter| !waiter.resumable.same_as(&expired));
                        }
                        expired.fire();
                    }),
                )));
            }
            *armed.borrow_mut() = Some(resumable);
        })
        .await;

        drop(timer);
        if let Some(resumable) = armed.borrow_mut().take() {
            self.waiters
                .borrow_mut()
                .retain(|waiter| !waiter.resumable.same_as(&resumable));
        }
        let woken = woken?;
        trace!(task = %task.id(), ?woken, signaled = signaled.get(), "condition wait ended");

        if let Some(mutex) = mutex {
            mutex.lock().await?;
        }
        Ok(signaled.get())
    }

    /// Wakes the longest-waiting task. Does nothing if no task is waiting.
    pub fn signal(&self) {
        loop {
            let Some(waiter) = self.waiters.borrow_mut().pop_front() else {
                return;
            };
            if waiter.resumable.is_pending() {
                waiter.signaled.set(true);
                waiter.resumable.fire_next_tick();
                return;
            }
        }
    }

    /// Wakes every waiting task, in FIFO order.
    pub fn broadcast(&self) {
        let waiters = std::mem::take(&mut *self.waiters.borrow_mut());
        for waiter in waiters {
            if waiter.resumable.is_pending() {
                waiter.signaled.set(true);
                waiter.resumable.fire_next_tick();
            }
        }
    }

    pub fn num_waiting(&self) -> usize {
        self.waiters
            .borrow()
            .iter()
            .filter(|waiter| waiter.resumable.is_pending())
            .count()
    }
}

impl fmt::Debug for ConditionVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionVariable")
            .field("num_waiting", &self.num_waiting())
            .finish()
    }
}
