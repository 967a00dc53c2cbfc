//! Cooperative tasks with a thread-compatible interface.
//!
//! A [`Task`] wraps a body future that runs on the scheduler's event loop.
//! Spawning runs the body immediately until its first suspension point; from
//! then on it is resumed by timers, next-tick callbacks, synchronization
//! primitives or other tasks.
//!
//! # Examples
//!
//! ```rust
//! use strand_core::runtime::Builder;
//! use strand_core::{sleep, spawn};
//! use std::time::Duration;
//!
//! let runtime = Builder::new().virtual_clock().build();
//! let answer = runtime
//!     .block_on(async {
//!         let worker = spawn(async {
//!             sleep(Duration::from_secs(1)).await?;
//!             Ok(42)
//!         })?;
//!         let value = worker.value().await?;
//!         Ok(value.and_then(|v| v.get::<i32>()))
//!     })
//!     .unwrap();
//! assert_eq!(answer, Some(42));
//! ```

use crate::arena::ArenaIndex;
use crate::context;
use crate::error::{Error, Result};
use crate::event_loop::EventLoop;
use crate::resume::{self, Marker, Resume, ResumeBuffer, Suspended};
use crate::scheduler::{Scheduler, Shared};
use crate::sync::ConditionVariable;
use crate::value::Value;
use futures::future::LocalBoxFuture;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};
use std::time::Duration;
use tracing::trace;

/// Identity of a task within its scheduler.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(ArenaIndex);

impl TaskId {
    pub fn index(self) -> ArenaIndex {
        self.0
    }
}

impl From<ArenaIndex> for TaskId {
    fn from(index: ArenaIndex) -> Self {
        Self(index)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}", self.0.index(), self.0.generation())
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({self})")
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Executing, or ready to execute.
    Runnable,
    /// Suspended in `sleep`, `stop`, `pass`, `yield_now` or a condition wait.
    /// `wakeup` interrupts it.
    Sleeping,
    /// Suspended in a mutex lock, queue pop or join. Only `kill` and `raise`
    /// interrupt it.
    Blocked,
    /// The body returned normally.
    Dead,
    /// The body was unwound by `kill`.
    Killed,
    /// The body failed with an error.
    ExceptionRaised,
}

impl Status {
    pub fn is_terminated(self) -> bool {
        matches!(self, Self::Dead | Self::Killed | Self::ExceptionRaised)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Runnable => "runnable",
            Self::Sleeping => "sleeping",
            Self::Blocked => "blocked",
            Self::Dead => "dead",
            Self::Killed => "killed",
            Self::ExceptionRaised => "exception",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskKind {
    Spawned,
    Proxy,
}

pub(crate) type Body = LocalBoxFuture<'static, Result<Value>>;

pub(crate) type Hook = Box<dyn FnOnce() -> Result<()>>;

#[derive(Debug, Clone)]
pub(crate) enum Outcome {
    Pending,
    Value(Value),
    Error(Error),
    Killed,
}

pub(crate) struct TaskCell {
    pub(crate) id: TaskId,
    pub(crate) kind: TaskKind,
    pub(crate) scheduler: Weak<Shared>,
    pub(crate) status: Cell<Status>,
    pub(crate) running: Cell<bool>,
    pub(crate) body: RefCell<Option<Body>>,
    pub(crate) mailbox: RefCell<VecDeque<Resume>>,
    pub(crate) buffer: RefCell<Option<ResumeBuffer>>,
    pub(crate) awaiting: Cell<Option<Marker>>,
    pub(crate) suspended: Cell<bool>,
    pub(crate) parked: Cell<bool>,
    next_marker: Cell<u64>,
    pub(crate) kill_requested: Cell<bool>,
    pub(crate) pending_raise: RefCell<Option<Error>>,
    locals: RefCell<Option<HashMap<String, Value>>>,
    pub(crate) hooks: RefCell<Vec<(String, Hook)>>,
    pub(crate) outcome: RefCell<Outcome>,
    pub(crate) joiners: ConditionVariable,
}

impl TaskCell {
    pub(crate) fn new(id: TaskId, kind: TaskKind, scheduler: Weak<Shared>) -> Self {
        Self {
            id,
            kind,
            scheduler,
            status: Cell::new(Status::Runnable),
            running: Cell::new(false),
            body: RefCell::new(None),
            mailbox: RefCell::new(VecDeque::new()),
            buffer: RefCell::new(None),
            awaiting: Cell::new(None),
            suspended: Cell::new(false),
            parked: Cell::new(false),
            next_marker: Cell::new(0),
            kill_requested: Cell::new(false),
            pending_raise: RefCell::new(None),
            locals: RefCell::new(None),
            hooks: RefCell::new(Vec::new()),
            outcome: RefCell::new(Outcome::Pending),
            joiners: ConditionVariable::new(),
        }
    }
}

/// A handle to a cooperative task. Clones refer to the same task.
#[derive(Clone)]
pub struct Task {
    cell: Rc<TaskCell>,
}

impl Task {
    pub(crate) fn from_cell(cell: Rc<TaskCell>) -> Self {
        Self { cell }
    }

    pub(crate) fn cell(&self) -> &TaskCell {
        &self.cell
    }

    pub(crate) fn cell_rc(&self) -> &Rc<TaskCell> {
        &self.cell
    }

    pub fn id(&self) -> TaskId {
        self.cell.id
    }

    pub fn status(&self) -> Status {
        self.cell.status.get()
    }

    pub fn is_alive(&self) -> bool {
        matches!(*self.cell.outcome.borrow(), Outcome::Pending)
    }

    /// Whether this task stands in for the root context.
    pub fn is_proxy(&self) -> bool {
        self.cell.kind == TaskKind::Proxy
    }

    /// Whether this task owns the executing context.
    pub fn is_current(&self) -> bool {
        context::frame().is_some_and(|frame| match frame.task {
            Some(task) => task == *self,
            None => frame.scheduler.proxy_if_created().is_some_and(|proxy| proxy == *self),
        })
    }

    /// True unless this task is the one executing.
    pub fn is_stopped(&self) -> bool {
        !self.is_current()
    }

    /// Whether `kill` has been requested.
    pub fn is_kill_requested(&self) -> bool {
        self.cell.kill_requested.get()
    }

    /// The error the body failed with, if it did.
    pub fn error(&self) -> Option<Error> {
        match &*self.cell.outcome.borrow() {
            Outcome::Error(error) => Some(error.clone()),
            _ => None,
        }
    }

    /// Waits for the task to terminate.
    ///
    /// Returns the task once it has terminated, or `None` if `timeout` elapsed
    /// first. A task that failed re-raises its error wrapped in
    /// [`Error::CapturedBodyError`]. Joining a terminated task never suspends.
    pub async fn join(&self, timeout: Option<Duration>) -> Result<Option<Task>> {
        if self.is_alive() {
            if self.is_current() {
                return Err(Error::Deadlock(format!("task {} cannot join itself", self.id())));
            }

            let caller = suspendable()?;
            let event_loop = caller.event_loop()?;
            let deadline = timeout.map(|limit| event_loop.now() + limit);

            while self.is_alive() {
                let remaining = match deadline {
                    Some(deadline) => {
                        let now = event_loop.now();
                        if now >= deadline {
                            return Ok(None);
                        }
                        Some(deadline - now)
                    }
                    None => None,
                };
                self.cell
                    .joiners
                    .wait_as(Status::Blocked, None, remaining)
                    .await?;
            }
        }

        match &*self.cell.outcome.borrow() {
            Outcome::Error(error) => Err(Error::CapturedBodyError {
                task: self.id(),
                source: Box::new(error.clone()),
            }),
            _ => Ok(Some(self.clone())),
        }
    }

    /// Joins the task and returns what its body returned (`None` if it was killed).
    pub async fn value(&self) -> Result<Option<Value>> {
        self.join(None).await?;
        Ok(match &*self.cell.outcome.borrow() {
            Outcome::Value(value) => Some(value.clone()),
            _ => None,
        })
    }

    /// Delivers `value` into the suspended task and runs it until it next
    /// suspends or terminates.
    ///
    /// If the task is waiting for something else the value is kept and returned
    /// by a later `yield_now` in that task.
    pub fn resume<T: Any>(&self, value: T) -> Result<()> {
        if !self.is_alive() {
            return Err(Error::DeadTarget(self.id()));
        }
        if self.is_proxy() {
            return Err(Error::NotSuspendable(self.id()));
        }
        if self.cell.running.get() {
            return Err(Error::AlreadyRunning(self.id()));
        }
        self.deliver(Resume::Value(Value::new(value)));
        Ok(())
    }

    /// Wakes a sleeping task; its sleep returns early.
    ///
    /// Does nothing if the task is runnable or blocked.
    pub fn wakeup(&self) -> Result<()> {
        if !self.is_alive() {
            return Err(Error::DeadTarget(self.id()));
        }
        if self.status() == Status::Sleeping && !self.cell.running.get() {
            self.deliver(Resume::Wakeup);
        }
        Ok(())
    }

    /// Alias of [`Task::wakeup`].
    pub fn run(&self) -> Result<()> {
        self.wakeup()
    }

    /// Terminates the task.
    ///
    /// A suspended task is resumed with an exit signal that makes its pending
    /// operation fail with [`Error::Killed`]. Killing the current task returns
    /// `Err(Error::Killed)` for the caller to propagate with `?`. The request is
    /// sticky: every later suspension point of the task fails the same way.
    pub fn kill(&self) -> Result<()> {
        if !self.is_alive() {
            return Ok(());
        }
        self.cell.kill_requested.set(true);
        if self.is_current() {
            return Err(Error::Killed);
        }
        trace!(task = %self.id(), "kill requested");
        if !self.is_proxy() && !self.cell.running.get() {
            self.deliver(Resume::Exit);
        }
        Ok(())
    }

    /// Alias of [`Task::kill`].
    pub fn exit(&self) -> Result<()> {
        self.kill()
    }

    /// Alias of [`Task::kill`].
    pub fn terminate(&self) -> Result<()> {
        self.kill()
    }

    /// Raises `error` inside the task.
    ///
    /// Raising on the current task returns the error. A suspended task's
    /// pending operation fails with it. Raising on a terminated task does
    /// nothing.
    pub fn raise(&self, error: Error) -> Result<()> {
        if !self.is_alive() {
            return Ok(());
        }
        if self.is_current() {
            return Err(error);
        }
        if self.is_proxy() || self.cell.running.get() {
            *self.cell.pending_raise.borrow_mut() = Some(error);
        } else {
            self.deliver(Resume::Raise(error));
        }
        Ok(())
    }

    /// Reads a task-local value.
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        let key = normalize_key(key)?;
        Ok(self
            .cell
            .locals
            .borrow()
            .as_ref()
            .and_then(|locals| locals.get(&key).cloned()))
    }

    /// Stores a task-local value, returning the previous one.
    pub fn set<T: Any>(&self, key: &str, value: T) -> Result<Option<Value>> {
        let key = normalize_key(key)?;
        Ok(self
            .cell
            .locals
            .borrow_mut()
            .get_or_insert_with(HashMap::new)
            .insert(key, Value::new(value)))
    }

    pub fn contains_key(&self, key: &str) -> Result<bool> {
        let key = normalize_key(key)?;
        Ok(self
            .cell
            .locals
            .borrow()
            .as_ref()
            .is_some_and(|locals| locals.contains_key(&key)))
    }

    /// The task-local keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .cell
            .locals
            .borrow()
            .as_ref()
            .map(|locals| locals.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort_unstable();
        keys
    }

    /// Registers `hook` to run when the task terminates.
    ///
    /// Hooks run in registration order. Registering an existing key replaces
    /// its hook but keeps its position.
    pub fn ensure_hook<F>(&self, key: impl Into<String>, hook: F)
    where
        F: FnOnce() -> Result<()> + 'static,
    {
        let key = key.into();
        let mut hooks = self.cell.hooks.borrow_mut();
        match hooks.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => *slot = Box::new(hook),
            None => hooks.push((key, Box::new(hook))),
        }
    }

    /// Removes the hook registered under `key`. Returns false if there was none.
    pub fn remove_ensure_hook(&self, key: &str) -> bool {
        let mut hooks = self.cell.hooks.borrow_mut();
        let before = hooks.len();
        hooks.retain(|(existing, _)| existing != key);
        hooks.len() != before
    }

    pub(crate) fn scheduler(&self) -> Option<Scheduler> {
        self.cell.scheduler.upgrade().map(Scheduler::from_shared)
    }

    pub(crate) fn event_loop(&self) -> Result<Rc<dyn EventLoop>> {
        self.scheduler()
            .map(|scheduler| scheduler.event_loop())
            .ok_or(Error::NoScheduler)
    }

    pub(crate) fn next_marker(&self) -> Marker {
        let raw = self.cell.next_marker.get();
        self.cell.next_marker.set(raw.wrapping_add(1));
        Marker::new(raw)
    }

    /// Fails if a kill or raise is waiting to be observed.
    pub(crate) fn check_interrupt(&self) -> Result<()> {
        if let Some(error) = self.cell.pending_raise.borrow_mut().take() {
            return Err(error);
        }
        if self.cell.kill_requested.get() {
            return Err(Error::Killed);
        }
        Ok(())
    }

    /// Pushes `resume` into the mailbox and runs the task unless it is
    /// already executing further up the stack.
    pub(crate) fn deliver(&self, resume: Resume) {
        self.cell.mailbox.borrow_mut().push_back(resume);
        if self.cell.running.get() {
            return;
        }
        if let Some(scheduler) = self.scheduler() {
            scheduler.poll(self);
        }
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }
}

impl Eq for Task {}

impl Hash for Task {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Rc::as_ptr(&self.cell).hash(state);
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id())
            .field("status", &self.status())
            .field("proxy", &self.is_proxy())
            .finish()
    }
}

/// Strips a leading `:` and rejects empty keys or keys containing whitespace.
fn normalize_key(key: &str) -> Result<String> {
    let normalized = key.strip_prefix(':').unwrap_or(key);
    if normalized.is_empty()
        || normalized
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(Error::InvalidKey(key.to_string()));
    }
    Ok(normalized.to_string())
}

/// Spawns `future` as a task on the current scheduler.
///
/// The body starts running immediately and keeps running until it first
/// suspends; `spawn` itself never suspends.
pub fn spawn<F, T>(future: F) -> Result<Task>
where
    F: Future<Output = Result<T>> + 'static,
    T: Any,
{
    let frame = context::frame().ok_or(Error::NoScheduler)?;
    Ok(frame.scheduler.spawn(future))
}

/// The task owning the executing context.
///
/// Outside any spawned task this is the scheduler's proxy task, created on
/// first use.
pub fn current() -> Result<Task> {
    let frame = context::frame().ok_or(Error::NoScheduler)?;
    Ok(match frame.task {
        Some(task) => task,
        None => frame.scheduler.proxy(),
    })
}

/// The live spawned tasks of the current scheduler.
pub fn list() -> Vec<Task> {
    context::frame()
        .map(|frame| frame.scheduler.list())
        .unwrap_or_default()
}

/// The current task, provided it is able to suspend.
pub(crate) fn suspendable() -> Result<Task> {
    let task = current()?;
    if task.is_proxy() {
        return Err(Error::NotSuspendable(task.id()));
    }
    Ok(task)
}

/// Suspends the current task until something resumes it and returns the
/// delivered value. Values buffered by earlier suspensions come first.
pub(crate) async fn yield_current() -> Result<Value> {
    let task = suspendable()?;
    task.check_interrupt()?;

    let _suspended = Suspended::enter(&task, Status::Sleeping, None)?;
    loop {
        match resume::read(&task).await {
            Resume::Value(value) => return Ok(value),
            Resume::Wakeup => return Ok(Value::unit()),
            Resume::Exit => return Err(Error::Killed),
            Resume::Raise(error) => return Err(error),
            Resume::Marker(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Builder;

    #[test]
    fn test_key_normalization() {
        assert_eq!(normalize_key(":cat").unwrap(), "cat");
        assert_eq!(normalize_key("cat").unwrap(), "cat");
        assert_eq!(normalize_key("::cat").unwrap(), ":cat");
        assert!(matches!(normalize_key(""), Err(Error::InvalidKey(_))));
        assert!(matches!(normalize_key(":"), Err(Error::InvalidKey(_))));
        assert!(matches!(normalize_key("two words"), Err(Error::InvalidKey(_))));
        assert!(matches!(normalize_key("tab\t"), Err(Error::InvalidKey(_))));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(Status::Sleeping.to_string(), "sleeping");
        assert_eq!(Status::ExceptionRaised.to_string(), "exception");
        assert!(Status::Killed.is_terminated());
        assert!(!Status::Blocked.is_terminated());
    }

    #[test]
    fn test_spawn_outside_scheduler_fails() {
        let result = spawn(async { Ok(()) });
        assert!(matches!(result, Err(Error::NoScheduler)));
        assert!(matches!(current(), Err(Error::NoScheduler)));
        assert!(list().is_empty());
    }

    #[test]
    fn test_proxy_is_current_in_root_context() {
        let runtime = Builder::new().virtual_clock().build();
        let _enter = runtime.enter();

        let root = current().unwrap();
        assert!(root.is_proxy());
        assert!(root.is_current());
        assert!(!root.is_stopped());
        assert_eq!(current().unwrap(), root);
        assert!(list().is_empty());
    }

    #[test]
    fn test_proxy_cannot_be_resumed() {
        let runtime = Builder::new().virtual_clock().build();
        let _enter = runtime.enter();

        let root = current().unwrap();
        assert!(matches!(root.resume(1), Err(Error::NotSuspendable(_))));
    }

    #[test]
    fn test_hooks_keep_registration_position() {
        let runtime = Builder::new().virtual_clock().build();
        let _enter = runtime.enter();
        let order = Rc::new(RefCell::new(Vec::new()));

        let task = runtime.spawn(async {
            crate::time::stop().await?;
            Ok(())
        });

        for key in ["a", "b"] {
            let order = order.clone();
            task.ensure_hook(key, move || {
                order.borrow_mut().push(key.to_string());
                Ok(())
            });
        }
        let replaced = order.clone();
        task.ensure_hook("a", move || {
            replaced.borrow_mut().push("a2".to_string());
            Ok(())
        });
        task.ensure_hook("c", || Err(Error::msg("hook failure is logged")));
        assert!(task.remove_ensure_hook("c"));
        assert!(!task.remove_ensure_hook("c"));

        task.kill().unwrap();
        assert_eq!(task.status(), Status::Killed);
        assert_eq!(*order.borrow(), vec!["a2".to_string(), "b".to_string()]);
    }
}
