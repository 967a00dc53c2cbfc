//! Mutual exclusion between tasks.
//!
//! Ownership passes straight to the next waiter on unlock, and a holder that
//! terminates releases the lock through a termination hook.

use crate::error::{Error, Result};
use crate::resume::{safe_suspend, Resumable};
use crate::task::{self, Status, Task};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};
use tracing::trace;

struct Waiter {
    task: Task,
    resumable: Resumable,
}

#[derive(Default)]
struct MutexState {
    owner: RefCell<Option<Task>>,
    waiters: RefCell<VecDeque<Waiter>>,
}

impl MutexState {
    fn hook_key(&self) -> String {
        format!("mutex:{:p}", self as *const Self)
    }

    fn is_owner(&self, task: &Task) -> bool {
        self.owner.borrow().as_ref() == Some(task)
    }

    /// Makes `task` the owner and arranges for release if it terminates first.
    fn acquire(self: &Rc<Self>, task: &Task) {
        *self.owner.borrow_mut() = Some(task.clone());
        let state = Rc::downgrade(self);
        let holder = task.clone();
        task.ensure_hook(self.hook_key(), move || {
            release_if_owner(&state, &holder);
            Ok(())
        });
    }

    /// Clears the owner and hands the lock to the head live waiter.
    fn release(self: &Rc<Self>) {
        let previous = self.owner.borrow_mut().take();
        if let Some(previous) = previous {
            previous.remove_ensure_hook(&self.hook_key());
        }

        loop {
            let Some(waiter) = self.waiters.borrow_mut().pop_front() else {
                return;
            };
            if waiter.resumable.is_pending() && waiter.task.is_alive() {
                trace!(task = %waiter.task.id(), "mutex handed off");
                self.acquire(&waiter.task);
                waiter.resumable.fire_next_tick();
                return;
            }
        }
    }
}

fn release_if_owner(state: &Weak<MutexState>, task: &Task) {
    if let Some(state) = state.upgrade() {
        if state.is_owner(task) {
            trace!(task = %task.id(), "releasing mutex held by terminated task");
            state.release();
        }
    }
}

/// An exclusive lock owned by one task at a time.
///
/// Contending tasks block in FIFO order. Ownership passes directly from the
/// unlocking task to the next waiter, so the mutex never appears free while
/// tasks are waiting. A task that terminates while holding the mutex releases
/// it.
///
/// # Examples
///
/// ```rust
/// use strand_core::runtime::Builder;
/// use strand_core::sync::Mutex;
/// use strand_core::time::{sleep, Duration};
///
/// let runtime = Builder::new().virtual_clock().build();
/// runtime
///     .block_on(async {
///         let mutex = Mutex::new();
///         let total = mutex
///             .synchronize(|| async {
///                 sleep(Duration::from_millis(10)).await?;
///                 Ok(2 + 2)
///             })
///             .await?;
///         assert_eq!(total, 4);
///         assert!(!mutex.is_locked());
///         Ok(())
///     })
///     .unwrap();
/// ```
#[derive(Clone, Default)]
pub struct Mutex {
    state: Rc<MutexState>,
}

impl Mutex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked(&self) -> bool {
        self.state.owner.borrow().is_some()
    }

    /// Whether the current task owns the mutex.
    pub fn is_owned(&self) -> bool {
        task::current().is_ok_and(|task| self.state.is_owner(&task))
    }

    pub fn owner(&self) -> Option<Task> {
        self.state.owner.borrow().clone()
    }

    /// Number of tasks blocked in [`Mutex::lock`].
    pub fn num_waiting(&self) -> usize {
        self.state
            .waiters
            .borrow()
            .iter()
            .filter(|waiter| waiter.resumable.is_pending())
            .count()
    }

    /// Takes the mutex if it is free. Never suspends.
    pub fn try_lock(&self) -> Result<bool> {
        let task = task::current()?;
        if self.is_locked() {
            return Ok(false);
        }
        self.state.acquire(&task);
        Ok(true)
    }

    /// Takes the mutex, blocking until it is free.
    ///
    /// Fails with [`Error::Deadlock`] if the current task already owns it.
    pub async fn lock(&self) -> Result<()> {
        let task = task::current()?;
        if self.state.is_owner(&task) {
            return Err(Error::Deadlock(format!(
                "task {} already owns this mutex",
                task.id()
            )));
        }
        if !self.is_locked() {
            self.state.acquire(&task);
            return Ok(());
        }

        let task = task::suspendable()?;
        loop {
            let woken = safe_suspend(&task, Status::Blocked, |resumable| {
                self.state
                    .waiters
                    .borrow_mut()
                    .push_back(Waiter {
                        task: task.clone(),
                        resumable,
                    });
            })
            .await;

            match woken {
                Ok(_) if self.state.is_owner(&task) => return Ok(()),
                Ok(_) => {
                    if !self.is_locked() {
                        self.state.acquire(&task);
                        return Ok(());
                    }
                }
                Err(error) => {
                    self.state
                        .waiters
                        .borrow_mut()
                        .retain(|waiter| waiter.task != task);
                    // Handed the lock but interrupted before running: pass it on.
                    if self.state.is_owner(&task) {
                        self.state.release();
                    }
                    return Err(error);
                }
            }
        }
    }

    /// Releases the mutex and hands it to the longest-waiting task.
    ///
    /// Fails with [`Error::NotOwner`] if the current task does not own it.
    pub fn unlock(&self) -> Result<()> {
        let task = task::current()?;
        if !self.state.is_owner(&task) {
            return Err(Error::NotOwner(task.id()));
        }
        self.state.release();
        Ok(())
    }

    /// Runs `f` while holding the mutex. The mutex is released on every exit
    /// path, including kill and raise.
    pub async fn synchronize<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let owner = task::current()?;
        self.lock().await?;
        let _guard = Held {
            state: &self.state,
            owner,
        };
        f().await
    }
}

/// Releases the mutex on drop if `owner` still holds it.
struct Held<'a> {
    state: &'a Rc<MutexState>,
    owner: Task,
}

impl Drop for Held<'_> {
    fn drop(&mut self) {
        if self.state.is_owner(&self.owner) {
            self.state.release();
        }
    }
}

impl fmt::Debug for Mutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("owner", &self.owner().map(|task| task.id()))
            .field("num_waiting", &self.num_waiting())
            .finish()
    }
}
