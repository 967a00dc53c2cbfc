//! FIFO queue for handing items between tasks.
//!
//! `push` never blocks. `pop` blocks until an item is handed over, and an item
//! handed to a popper that dies first goes back to the front.

use crate::error::{Error, Result};
use crate::resume::{safe_suspend, Resumable};
use crate::task::{self, Status};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::trace;

type Slot<T> = Rc<RefCell<Option<T>>>;

struct Popper<T> {
    resumable: Resumable,
    slot: Slot<T>,
}

struct QueueState<T> {
    items: RefCell<VecDeque<T>>,
    poppers: RefCell<VecDeque<Popper<T>>>,
}

impl<T> QueueState<T> {
    /// Hands `item` to the longest-waiting popper, or stores it.
    fn offer(&self, item: T, at_front: bool) {
        loop {
            let Some(popper) = self.poppers.borrow_mut().pop_front() else {
                break;
            };
            if popper.resumable.is_pending() && popper.slot.borrow().is_none() {
                *popper.slot.borrow_mut() = Some(item);
                popper.resumable.fire_next_tick();
                return;
            }
        }
        let mut items = self.items.borrow_mut();
        if at_front {
            items.push_front(item);
        } else {
            items.push_back(item);
        }
    }
}

/// Returns an undelivered item to the queue if the popper never took it.
struct Unclaimed<T> {
    state: Weak<QueueState<T>>,
    slot: Slot<T>,
}

impl<T> Drop for Unclaimed<T> {
    fn drop(&mut self) {
        let item = self.slot.borrow_mut().take();
        if let (Some(item), Some(state)) = (item, self.state.upgrade()) {
            trace!("returning unclaimed item to the queue");
            state.offer(item, true);
        }
    }
}

/// An unbounded FIFO queue whose `pop` blocks until an item is available.
///
/// Producers never block. A pushed item goes straight to the task that has
/// been waiting longest; if that task is killed before it runs, the item is
/// put back at the front of the queue.
///
/// # Examples
///
/// ```rust
/// use strand_core::runtime::Builder;
/// use strand_core::spawn;
/// use strand_core::sync::Queue;
///
/// let runtime = Builder::new().virtual_clock().build();
/// runtime
///     .block_on(async {
///         let queue = Queue::new();
///         let consumer = {
///             let queue = queue.clone();
///             spawn(async move { queue.pop(false).await })?
///         };
///         assert_eq!(queue.num_waiting(), 1);
///
///         queue.push("hello");
///         let received = consumer.value().await?.and_then(|v| v.get::<&str>());
///         assert_eq!(received, Some("hello"));
///         Ok(())
///     })
///     .unwrap();
/// ```
pub struct Queue<T> {
    state: Rc<QueueState<T>>,
}

impl<T: 'static> Queue<T> {
    pub fn new() -> Self {
        Self {
            state: Rc::new(QueueState {
                items: RefCell::new(VecDeque::new()),
                poppers: RefCell::new(VecDeque::new()),
            }),
        }
    }

    /// Appends `item`, waking the longest-waiting popper if there is one.
    pub fn push(&self, item: T) {
        self.state.offer(item, false);
    }

    /// Removes and returns the oldest item.
    ///
    /// An empty queue blocks the current task until an item is pushed, or
    /// fails with [`Error::EmptyQueue`] when `non_block` is set.
    pub async fn pop(&self, non_block: bool) -> Result<T> {
        if let Some(item) = self.state.items.borrow_mut().pop_front() {
            return Ok(item);
        }
        if non_block {
            return Err(Error::EmptyQueue);
        }

        let task = task::suspendable()?;
        let unclaimed = Unclaimed {
            state: Rc::downgrade(&self.state),
            slot: Rc::new(RefCell::new(None)),
        };

        loop {
            let armed: RefCell<Option<Resumable>> = RefCell::new(None);
            let woken = safe_suspend(&task, Status::Blocked, |resumable| {
                self.state.poppers.borrow_mut().push_back(Popper {
                    resumable: resumable.clone(),
                    slot: unclaimed.slot.clone(),
                });
                *armed.borrow_mut() = Some(resumable);
            })
            .await;

            if let Some(resumable) = armed.borrow_mut().take() {
                self.state
                    .poppers
                    .borrow_mut()
                    .retain(|popper| !popper.resumable.same_as(&resumable));
            }
            woken?;

            let claimed = unclaimed.slot.borrow_mut().take();
            if let Some(item) = claimed {
                return Ok(item);
            }
            if let Some(item) = self.state.items.borrow_mut().pop_front() {
                return Ok(item);
            }
        }
    }

    /// Removes the oldest item without blocking.
    pub fn try_pop(&self) -> Option<T> {
        self.state.items.borrow_mut().pop_front()
    }

    pub fn len(&self) -> usize {
        self.state.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.items.borrow().is_empty()
    }

    /// Drops every queued item.
    pub fn clear(&self) {
        self.state.items.borrow_mut().clear();
    }

    /// Number of tasks blocked in [`Queue::pop`].
    pub fn num_waiting(&self) -> usize {
        self.state
            .poppers
            .borrow()
            .iter()
            .filter(|popper| popper.resumable.is_pending())
            .count()
    }
}

impl<T: 'static> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T: 'static> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("len", &self.len())
            .field("num_waiting", &self.num_waiting())
            .finish()
    }
}
