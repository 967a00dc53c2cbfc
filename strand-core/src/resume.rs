//! Suspension and resumption of cooperative tasks.
//!
//! A suspended task waits for an entry in its mailbox. Anything may resume it:
//! a timer, a next-tick callback, another task calling [`Task::resume`], or a
//! library simulating I/O. Because those sources are not coordinated, a task
//! may receive a value it was not waiting for. [`suspend_until`] handles that:
//! each suspension generates a unique [`Marker`], arms a signal source with a
//! [`Resumable`] carrying it, and keeps suspending until that marker is
//! delivered. Unexpected values are held in the task's resume buffer and
//! handed, in arrival order, to later explicit reads such as
//! [`yield_now`](crate::time::yield_now).
//!
//! # Examples
//!
//! ```rust
//! use strand_core::resume::{suspend_until, Woken};
//! use strand_core::runtime::Builder;
//! use std::time::Duration;
//!
//! let runtime = Builder::new().virtual_clock().build();
//! let woken = runtime
//!     .block_on(async {
//!         suspend_until(|resumable| {
//!             resumable.fire_after(Duration::from_millis(5));
//!         })
//!         .await
//!     })
//!     .unwrap();
//! assert_eq!(woken, Woken::Signaled);
//! ```

use crate::error::{Error, Result};
use crate::event_loop::TimerHandle;
use crate::task::{self, Status, Task, TaskCell};
use crate::value::Value;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tracing::trace;

/// Identifies one suspension of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Marker(u64);

impl Marker {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// An entry in a task's mailbox.
#[derive(Debug)]
pub(crate) enum Resume {
    Marker(Marker),
    Wakeup,
    Exit,
    Raise(Error),
    Value(Value),
}

/// Resumes received while the task was waiting for something else.
///
/// `head` holds values passed over by the suspension in progress, `tail` the
/// values not yet looked at. An ordinary read moves `head` back in front of
/// `tail` so nothing is lost or reordered.
#[derive(Debug, Default)]
pub(crate) struct ResumeBuffer {
    head: Vec<Resume>,
    tail: VecDeque<Resume>,
}

impl ResumeBuffer {
    pub(crate) fn next(&mut self) -> Option<Resume> {
        for held in self.head.drain(..).rev() {
            self.tail.push_front(held);
        }
        self.tail.pop_front()
    }

    pub(crate) fn hold(&mut self, resume: Resume) {
        self.head.push(resume);
    }

    pub(crate) fn pop_tail(&mut self) -> Option<Resume> {
        self.tail.pop_front()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_empty() && self.tail.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.head.len() + self.tail.len()
    }
}

/// How a suspension ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Woken {
    /// The armed signal source delivered its marker.
    Signaled,
    /// A `wakeup` interrupted a sleeping suspension.
    Interrupted,
}

/// Pending until the task's mailbox holds an entry.
struct Suspend<'a> {
    task: &'a Task,
}

impl Future for Suspend<'_> {
    type Output = Resume;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Resume> {
        let cell = self.task.cell();
        let next = cell.mailbox.borrow_mut().pop_front();
        cell.parked.set(next.is_none());
        match next {
            Some(resume) => Poll::Ready(resume),
            None => Poll::Pending,
        }
    }
}

/// Reads the next resume: buffered values first, then the mailbox.
pub(crate) async fn read(task: &Task) -> Resume {
    if let Some(resume) = take_buffered(task, ResumeBuffer::next) {
        return resume;
    }
    Suspend { task }.await
}

async fn read_tail(task: &Task) -> Resume {
    if let Some(resume) = take_buffered(task, ResumeBuffer::pop_tail) {
        return resume;
    }
    Suspend { task }.await
}

fn take_buffered(task: &Task, take: fn(&mut ResumeBuffer) -> Option<Resume>) -> Option<Resume> {
    let mut slot = task.cell().buffer.borrow_mut();
    let buffer = slot.as_mut()?;
    let resume = take(buffer);
    if buffer.is_empty() {
        *slot = None;
    }
    resume
}

fn hold(task: &Task, resume: Resume) {
    task.cell()
        .buffer
        .borrow_mut()
        .get_or_insert_with(ResumeBuffer::default)
        .hold(resume);
}

/// Marks a task as suspended for as long as it lives.
pub(crate) struct Suspended<'a> {
    task: &'a Task,
}

impl<'a> Suspended<'a> {
    /// Fails if the task is already suspended elsewhere, as when two
    /// suspending operations are raced inside one task.
    pub(crate) fn enter(task: &'a Task, status: Status, marker: Option<Marker>) -> Result<Self> {
        let cell = task.cell();
        if cell.suspended.replace(true) {
            return Err(Error::Deadlock(format!("task {} is already suspended", cell.id)));
        }
        cell.status.set(status);
        cell.awaiting.set(marker);
        trace!(task = %cell.id, %status, ?marker, "task suspended");
        Ok(Self { task })
    }
}

impl Drop for Suspended<'_> {
    fn drop(&mut self) {
        let cell = self.task.cell();
        cell.awaiting.set(None);
        cell.suspended.set(false);
        if matches!(cell.status.get(), Status::Sleeping | Status::Blocked) {
            cell.status.set(Status::Runnable);
        }
    }
}

/// Suspends `task` until the signal source armed by `arm` delivers.
pub(crate) async fn safe_suspend<F>(task: &Task, status: Status, arm: F) -> Result<Woken>
where
    F: FnOnce(Resumable),
{
    task.check_interrupt()?;

    let marker = task.next_marker();
    let _suspended = Suspended::enter(task, status, Some(marker))?;
    arm(Resumable::new(task, marker));

    let mut next = read(task).await;
    loop {
        match next {
            Resume::Marker(delivered) if delivered == marker => {
                trace!(task = %task.id(), ?marker, "task resumed");
                return Ok(Woken::Signaled);
            }
            Resume::Marker(_) => {}
            Resume::Wakeup if status == Status::Sleeping => return Ok(Woken::Interrupted),
            Resume::Wakeup => {}
            Resume::Exit => return Err(Error::Killed),
            Resume::Raise(error) => return Err(error),
            value @ Resume::Value(_) => {
                trace!(task = %task.id(), ?marker, "holding out-of-order resume");
                hold(task, value);
            }
        }
        next = read_tail(task).await;
    }
}

/// Suspends the current task until the [`Resumable`] handed to `arm` fires.
///
/// The task sleeps: [`Task::wakeup`] ends the suspension early with
/// [`Woken::Interrupted`], and `kill`/`raise` make it fail. Values delivered by
/// [`Task::resume`] in the meantime are kept for later reads.
pub async fn suspend_until<F>(arm: F) -> Result<Woken>
where
    F: FnOnce(Resumable),
{
    let task = task::suspendable()?;
    safe_suspend(&task, Status::Sleeping, arm).await
}

/// A one-shot handle that resumes a specific suspension of a task.
///
/// Firing is inert once that suspension is over, so stale timers and
/// duplicate signals never disturb the task.
#[derive(Clone)]
pub struct Resumable {
    task: Weak<TaskCell>,
    marker: Marker,
}

impl Resumable {
    pub(crate) fn new(task: &Task, marker: Marker) -> Self {
        Self {
            task: Rc::downgrade(task.cell_rc()),
            marker,
        }
    }

    pub fn marker(&self) -> Marker {
        self.marker
    }

    pub fn task(&self) -> Option<Task> {
        self.task.upgrade().map(Task::from_cell)
    }

    /// Whether the suspension this handle belongs to is still waiting.
    pub fn is_pending(&self) -> bool {
        self.task
            .upgrade()
            .is_some_and(|cell| cell.awaiting.get() == Some(self.marker))
    }

    /// Resumes the task now. Returns false if the suspension already ended.
    pub fn fire(&self) -> bool {
        let Some(task) = self.task() else {
            return false;
        };
        if task.cell().awaiting.get() != Some(self.marker) {
            return false;
        }
        let queued = task
            .cell()
            .mailbox
            .borrow()
            .iter()
            .any(|resume| matches!(resume, Resume::Marker(m) if *m == self.marker));
        if queued {
            return false;
        }
        task.deliver(Resume::Marker(self.marker));
        true
    }

    /// Fires on the next turn of the task's event loop.
    pub fn fire_next_tick(&self) {
        let Some(event_loop) = self.task().and_then(|task| task.event_loop().ok()) else {
            return;
        };
        let resumable = self.clone();
        event_loop.next_tick(Box::new(move || {
            resumable.fire();
        }));
    }

    /// Fires once `delay` has elapsed on the task's event loop.
    pub fn fire_after(&self, delay: Duration) -> Option<TimerHandle> {
        let event_loop = self.task().and_then(|task| task.event_loop().ok())?;
        let resumable = self.clone();
        Some(event_loop.schedule_after(
            delay,
            Box::new(move || {
                resumable.fire();
            }),
        ))
    }

    pub(crate) fn same_as(&self, other: &Resumable) -> bool {
        self.marker == other.marker && Weak::ptr_eq(&self.task, &other.task)
    }
}

impl fmt::Debug for Resumable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resumable")
            .field("task", &self.task().map(|task| task.id()))
            .field("marker", &self.marker)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(n: i32) -> Resume {
        Resume::Value(Value::new(n))
    }

    fn unwrap_value(resume: Option<Resume>) -> i32 {
        match resume {
            Some(Resume::Value(v)) => v.get::<i32>().unwrap(),
            other => panic!("expected a value, got {other:?}"),
        }
    }

    #[test]
    fn test_buffer_preserves_arrival_order() {
        let mut buffer = ResumeBuffer::default();
        buffer.hold(value(1));
        buffer.hold(value(2));

        assert_eq!(unwrap_value(buffer.next()), 1);
        buffer.hold(value(1));
        buffer.hold(value(3));

        assert_eq!(buffer.len(), 3);
        assert_eq!(unwrap_value(buffer.next()), 1);
        assert_eq!(unwrap_value(buffer.next()), 3);
        assert_eq!(unwrap_value(buffer.next()), 2);
        assert!(buffer.next().is_none());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_pop_tail_skips_values_passed_over() {
        let mut buffer = ResumeBuffer::default();
        buffer.hold(value(1));
        assert_eq!(unwrap_value(buffer.next()), 1);

        buffer.hold(value(1));
        assert!(buffer.pop_tail().is_none());
        assert_eq!(unwrap_value(buffer.next()), 1);
    }
}
