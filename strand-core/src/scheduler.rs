//! The cooperative scheduler.
//!
//! The scheduler owns the registry of live tasks and a handle to the event
//! loop. It never drives the loop: tasks are polled synchronously whenever
//! something delivers a resume to them, and finished tasks are retired on the
//! spot.

use crate::arena::Arena;
use crate::context::{self, EnterGuard, Frame};
use crate::error::{Error, Result};
use crate::event_loop::EventLoop;
use crate::resume::Resume;
use crate::task::{Body, Outcome, Status, Task, TaskCell, TaskId, TaskKind};
use crate::value::Value;
use futures::task::noop_waker_ref;
use futures::FutureExt;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::task::{Context, Poll};
use tracing::{debug, trace, warn};

pub(crate) struct Shared {
    event_loop: Rc<dyn EventLoop>,
    registry: RefCell<Arena<Task>>,
    proxy: RefCell<Option<Task>>,
}

/// Spawns, runs and retires cooperative tasks on one event loop.
///
/// Cloning a `Scheduler` yields another handle to the same scheduler.
#[derive(Clone)]
pub struct Scheduler {
    shared: Rc<Shared>,
}

impl Scheduler {
    pub fn new(event_loop: Rc<dyn EventLoop>) -> Self {
        Self {
            shared: Rc::new(Shared {
                event_loop,
                registry: RefCell::new(Arena::new()),
                proxy: RefCell::new(None),
            }),
        }
    }

    pub(crate) fn from_shared(shared: Rc<Shared>) -> Self {
        Self { shared }
    }

    pub fn event_loop(&self) -> Rc<dyn EventLoop> {
        self.shared.event_loop.clone()
    }

    /// Makes this scheduler current on this thread until the guard is dropped.
    ///
    /// Code running inside the guard sees the proxy task as `current()`.
    pub fn enter(&self) -> EnterGuard {
        context::enter(Frame {
            scheduler: self.clone(),
            task: None,
        })
    }

    /// Spawns `future` as a task and runs it until it first suspends.
    pub fn spawn<F, T>(&self, future: F) -> Task
    where
        F: Future<Output = Result<T>> + 'static,
        T: Any,
    {
        let task = self.register(TaskKind::Spawned);
        let body: Body = Box::pin(async move { future.await.map(Value::new) });
        *task.cell().body.borrow_mut() = Some(body);
        debug!(task = %task.id(), "task spawned");
        self.poll(&task);
        task
    }

    /// The proxy task standing in for the root context, created on first use.
    pub fn proxy(&self) -> Task {
        if let Some(proxy) = self.proxy_if_created() {
            return proxy;
        }
        let proxy = self.register(TaskKind::Proxy);
        *self.shared.proxy.borrow_mut() = Some(proxy.clone());
        trace!(task = %proxy.id(), "proxy task registered");
        proxy
    }

    pub(crate) fn proxy_if_created(&self) -> Option<Task> {
        self.shared.proxy.borrow().clone()
    }

    /// The live spawned tasks. Proxies are not listed.
    pub fn list(&self) -> Vec<Task> {
        self.shared
            .registry
            .borrow()
            .values()
            .filter(|task| !task.is_proxy())
            .cloned()
            .collect()
    }

    /// Looks up a live task by id.
    pub fn task(&self, id: TaskId) -> Option<Task> {
        self.shared.registry.borrow().get(id.index()).cloned()
    }

    /// Number of live tasks, proxy included.
    pub fn len(&self) -> usize {
        self.shared.registry.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Kills every live task, drops the bodies that survive and retires the proxy.
    pub fn shutdown(&self) {
        let live = self.list();
        if !live.is_empty() {
            debug!(tasks = live.len(), "scheduler shutting down");
        }

        for task in &live {
            if task.is_alive() && !task.cell().running.get() {
                task.cell().kill_requested.set(true);
                task.deliver(Resume::Exit);
            }
        }

        for task in &live {
            if task.is_alive() && !task.cell().running.get() {
                let body = task.cell().body.borrow_mut().take();
                drop(body);
                self.finish(task, Err(Error::Killed));
            }
        }

        let proxy = self.shared.proxy.borrow_mut().take();
        if let Some(proxy) = proxy {
            if proxy.is_alive() {
                self.finish(&proxy, Ok(Value::unit()));
            }
        }
    }

    fn register(&self, kind: TaskKind) -> Task {
        let weak = Rc::downgrade(&self.shared);
        let mut registry = self.shared.registry.borrow_mut();
        let index = registry.insert_with(|index| {
            Task::from_cell(Rc::new(TaskCell::new(TaskId::from(index), kind, weak)))
        });
        registry
            .get(index)
            .cloned()
            .unwrap_or_else(|| unreachable!("slot {index:?} was just filled"))
    }

    /// Runs `task` until it suspends or finishes.
    pub(crate) fn poll(&self, task: &Task) {
        let cell = task.cell();
        if cell.running.get() {
            return;
        }
        let Some(mut body) = cell.body.borrow_mut().take() else {
            return;
        };

        cell.running.set(true);
        let polled = {
            let _frame = context::enter(Frame {
                scheduler: self.clone(),
                task: Some(task.clone()),
            });
            let mut cx = Context::from_waker(noop_waker_ref());
            loop {
                cell.parked.set(false);
                let polled =
                    panic::catch_unwind(AssertUnwindSafe(|| body.poll_unpin(&mut cx)));
                // A resume can land while the body runs; poll again so it is not stranded.
                // Only a body parked on its mailbox can take it.
                let stranded = matches!(polled, Ok(Poll::Pending))
                    && cell.parked.get()
                    && !cell.mailbox.borrow().is_empty();
                if !stranded {
                    break polled;
                }
            }
        };
        cell.running.set(false);

        match polled {
            // Pending on a future this scheduler never wakes: an exit cannot reach
            // the suspension point, so unwind by dropping the body.
            Ok(Poll::Pending) if !cell.parked.get() && self.exit_queued(cell) => {
                debug!(task = %task.id(), "killing task parked outside the scheduler");
                drop(body);
                self.finish(task, Err(Error::Killed));
            }
            Ok(Poll::Pending) => {
                *cell.body.borrow_mut() = Some(body);
            }
            Ok(Poll::Ready(result)) => {
                drop(body);
                self.finish(task, result);
            }
            Err(payload) => {
                drop(body);
                self.finish(task, Err(Error::Panicked(panic_message(payload.as_ref()))));
            }
        }
    }

    fn exit_queued(&self, cell: &TaskCell) -> bool {
        cell.mailbox
            .borrow()
            .iter()
            .any(|resume| matches!(resume, Resume::Exit))
    }

    /// Records the outcome, unregisters the task, runs its hooks and wakes joiners.
    pub(crate) fn finish(&self, task: &Task, result: Result<Value>) {
        let cell = task.cell();
        if !task.is_alive() {
            return;
        }

        let (status, outcome) = match result {
            Ok(value) => (Status::Dead, Outcome::Value(value)),
            Err(Error::Killed) => (Status::Killed, Outcome::Killed),
            Err(error) => (Status::ExceptionRaised, Outcome::Error(error)),
        };
        if let Outcome::Error(error) = &outcome {
            debug!(task = %task.id(), %error, "task failed");
        }
        cell.status.set(status);
        *cell.outcome.borrow_mut() = outcome;
        cell.mailbox.borrow_mut().clear();
        *cell.buffer.borrow_mut() = None;

        let removed = self.shared.registry.borrow_mut().remove(task.id().index());
        drop(removed);
        debug!(task = %task.id(), %status, "task terminated");

        let hooks = std::mem::take(&mut *cell.hooks.borrow_mut());
        for (key, hook) in hooks {
            match panic::catch_unwind(AssertUnwindSafe(hook)) {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    warn!(task = %task.id(), hook = %key, %error, "termination hook failed");
                }
                Err(payload) => {
                    warn!(
                        task = %task.id(),
                        hook = %key,
                        panic = %panic_message(payload.as_ref()),
                        "termination hook panicked"
                    );
                }
            }
        }

        cell.joiners.broadcast();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("live", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::{ClockMode, Reactor};
    use std::cell::Cell;

    fn scheduler() -> (Rc<Reactor>, Scheduler) {
        let reactor = Rc::new(Reactor::new(ClockMode::Virtual));
        let scheduler = Scheduler::new(reactor.clone());
        (reactor, scheduler)
    }

    #[test]
    fn test_spawn_runs_body_immediately() {
        let (_reactor, scheduler) = scheduler();
        let ran = Rc::new(Cell::new(false));

        let flag = ran.clone();
        let task = scheduler.spawn(async move {
            flag.set(true);
            Ok(7)
        });

        assert!(ran.get());
        assert!(!task.is_alive());
        assert_eq!(task.status(), Status::Dead);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_panicking_body_is_captured() {
        let (_reactor, scheduler) = scheduler();

        let task = scheduler.spawn(async {
            if true {
                panic!("boom");
            }
            Ok(())
        });

        assert_eq!(task.status(), Status::ExceptionRaised);
        assert!(matches!(task.error(), Some(Error::Panicked(message)) if message == "boom"));
    }

    #[test]
    fn test_registry_slot_reuse_changes_id() {
        let (_reactor, scheduler) = scheduler();
        let first = scheduler.spawn(async { Ok(()) });
        let second = scheduler.spawn(async { Ok(()) });

        assert_eq!(first.id().index().index(), second.id().index().index());
        assert_ne!(first.id(), second.id());
        assert!(scheduler.task(first.id()).is_none());
    }

    #[test]
    fn test_shutdown_kills_live_tasks_and_retires_proxy() {
        let (reactor, scheduler) = scheduler();
        let _enter = scheduler.enter();

        let sleeper = scheduler.spawn(async {
            crate::time::stop().await?;
            Ok(())
        });
        let proxy = scheduler.proxy();
        assert_eq!(scheduler.list(), vec![sleeper.clone()]);
        assert_eq!(scheduler.len(), 2);

        scheduler.shutdown();

        assert_eq!(sleeper.status(), Status::Killed);
        assert!(!proxy.is_alive());
        assert_eq!(proxy.status(), Status::Dead);
        assert!(scheduler.is_empty());
        assert!(reactor.is_idle());
    }
}
