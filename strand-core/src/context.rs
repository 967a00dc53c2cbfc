//! Thread-local record of the scheduler and task currently executing.
//!
//! Every poll of a task body pushes a frame; entering a scheduler from plain
//! code pushes a frame without a task (the root context, answered by the
//! proxy task).

use crate::scheduler::Scheduler;
use crate::task::Task;
use std::cell::RefCell;
use std::marker::PhantomData;

#[derive(Clone)]
pub(crate) struct Frame {
    pub(crate) scheduler: Scheduler,
    pub(crate) task: Option<Task>,
}

thread_local! {
    static FRAMES: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// Pops the frame it pushed when dropped.
#[must_use = "the context is left as soon as the guard is dropped"]
pub struct EnterGuard {
    _not_send: PhantomData<*const ()>,
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        // Dropped outside the borrow: releasing a task may run code that reads the stack.
        let popped = FRAMES.with(|frames| frames.borrow_mut().pop());
        drop(popped);
    }
}

impl std::fmt::Debug for EnterGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EnterGuard")
    }
}

pub(crate) fn enter(frame: Frame) -> EnterGuard {
    FRAMES.with(|frames| frames.borrow_mut().push(frame));
    EnterGuard {
        _not_send: PhantomData,
    }
}

pub(crate) fn frame() -> Option<Frame> {
    FRAMES.with(|frames| frames.borrow().last().cloned())
}
