//! # Backend Dispatch
//!
//! Thread-compatible operations (`spawn`, `sleep`, `pass`) can be served by
//! two backends behind one [`Backend`] trait:
//!
//! - [`CooperativeBackend`]: strand tasks on the scheduler's event loop.
//! - [`NativeBackend`]: Tokio local tasks and timers. Requires a Tokio
//!   runtime with a [`LocalSet`](tokio::task::LocalSet).
//!
//! [`Dispatch`] picks a backend per call. Under
//! [`BackendPreference::Auto`] an injected predicate decides; by default the
//! cooperative backend is used exactly while the scheduler's event loop is
//! running, so the same code works inside and outside the reactor.
//!
//! ## Usage
//!
//! ```
//! use strand_runtime::dispatch::{BackendKind, Dispatch};
//! use strand_core::runtime::Builder;
//! use strand_core::Duration;
//!
//! let runtime = Builder::new().virtual_clock().build();
//! let dispatch = Dispatch::new(runtime.scheduler().clone());
//! assert_eq!(dispatch.kind(), BackendKind::Native);
//!
//! let slept = runtime
//!     .block_on(async move {
//!         assert_eq!(dispatch.kind(), BackendKind::Cooperative);
//!         let slept = dispatch.sleep(Duration::from_millis(30)).await?;
//!         Ok(slept)
//!     })
//!     .unwrap();
//! assert_eq!(slept, Duration::from_millis(30));
//! ```

use crate::config::BackendPreference;
use crate::error::Result;
use async_trait::async_trait;
use futures::future::LocalBoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;
use strand_core::event_loop::EventLoop;
use strand_core::{Scheduler, Task, Value};
use tokio::task::JoinHandle;
use tracing::trace;

/// A type-erased task body.
pub type BoxedBody = LocalBoxFuture<'static, strand_core::Result<Value>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Cooperative,
    Native,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cooperative => "cooperative",
            Self::Native => "native",
        })
    }
}

/// The operations a backend provides to dispatched code.
#[async_trait(?Send)]
pub trait Backend {
    fn kind(&self) -> BackendKind;

    /// Starts `body` as a new task.
    fn spawn(&self, body: BoxedBody) -> Result<Handle>;

    /// Suspends the caller for `duration`; returns the time actually slept.
    async fn sleep(&self, duration: Duration) -> Result<Duration>;

    /// Gives other tasks a chance to run.
    async fn pass(&self) -> Result<()>;
}

/// Serves operations from a strand [`Scheduler`].
///
/// `sleep` and `pass` must be awaited from inside a strand task.
#[derive(Debug, Clone)]
pub struct CooperativeBackend {
    scheduler: Scheduler,
}

impl CooperativeBackend {
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }
}

#[async_trait(?Send)]
impl Backend for CooperativeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cooperative
    }

    fn spawn(&self, body: BoxedBody) -> Result<Handle> {
        let _enter = self.scheduler.enter();
        Ok(Handle::Cooperative(self.scheduler.spawn(body)))
    }

    async fn sleep(&self, duration: Duration) -> Result<Duration> {
        Ok(strand_core::sleep(duration).await?)
    }

    async fn pass(&self) -> Result<()> {
        Ok(strand_core::pass().await?)
    }
}

/// Serves operations from Tokio.
///
/// `spawn` uses [`tokio::task::spawn_local`] and therefore panics outside a
/// [`LocalSet`](tokio::task::LocalSet).
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeBackend;

#[async_trait(?Send)]
impl Backend for NativeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    fn spawn(&self, body: BoxedBody) -> Result<Handle> {
        Ok(Handle::Native(tokio::task::spawn_local(body)))
    }

    async fn sleep(&self, duration: Duration) -> Result<Duration> {
        let started = tokio::time::Instant::now();
        tokio::time::sleep(duration).await;
        Ok(started.elapsed())
    }

    async fn pass(&self) -> Result<()> {
        tokio::task::yield_now().await;
        Ok(())
    }
}

/// A task started through a [`Backend`].
pub enum Handle {
    Cooperative(Task),
    Native(JoinHandle<strand_core::Result<Value>>),
}

impl Handle {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Cooperative(_) => BackendKind::Cooperative,
            Self::Native(_) => BackendKind::Native,
        }
    }

    /// The strand task behind a cooperative handle.
    pub fn task(&self) -> Option<&Task> {
        match self {
            Self::Cooperative(task) => Some(task),
            Self::Native(_) => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        match self {
            Self::Cooperative(task) => !task.is_alive(),
            Self::Native(handle) => handle.is_finished(),
        }
    }

    /// Kills a cooperative task or aborts a native one.
    pub fn abort(&self) -> Result<()> {
        match self {
            Self::Cooperative(task) => task.kill()?,
            Self::Native(handle) => handle.abort(),
        }
        Ok(())
    }

    /// Waits for the task and returns its value.
    ///
    /// Returns `Ok(None)` if the task was killed or aborted. A cooperative
    /// handle must be joined from inside a strand task unless it has already
    /// finished.
    pub async fn join(self) -> Result<Option<Value>> {
        match self {
            Self::Cooperative(task) => Ok(task.value().await?),
            Self::Native(handle) => match handle.await {
                Ok(result) => Ok(Some(result?)),
                Err(error) if error.is_cancelled() => Ok(None),
                Err(error) => Err(error.into()),
            },
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cooperative(task) => f.debug_tuple("Cooperative").field(task).finish(),
            Self::Native(_) => f.debug_tuple("Native").field(&"JoinHandle { .. }").finish(),
        }
    }
}

/// Routes each operation to the cooperative or the native backend.
pub struct Dispatch {
    cooperative: Rc<dyn Backend>,
    native: Rc<dyn Backend>,
    preference: BackendPreference,
    prefer_cooperative: Box<dyn Fn() -> bool>,
}

impl Dispatch {
    /// Dispatch over `scheduler` and Tokio, choosing the cooperative backend
    /// while the scheduler's event loop is running.
    pub fn new(scheduler: Scheduler) -> Self {
        let event_loop = scheduler.event_loop();
        Self::with_backends(
            Rc::new(CooperativeBackend::new(scheduler)),
            Rc::new(NativeBackend),
            move || event_loop.is_running(),
        )
    }

    /// Dispatch over arbitrary backends. `prefer_cooperative` is consulted
    /// on every call under [`BackendPreference::Auto`].
    pub fn with_backends<P>(
        cooperative: Rc<dyn Backend>,
        native: Rc<dyn Backend>,
        prefer_cooperative: P,
    ) -> Self
    where
        P: Fn() -> bool + 'static,
    {
        Self {
            cooperative,
            native,
            preference: BackendPreference::Auto,
            prefer_cooperative: Box::new(prefer_cooperative),
        }
    }

    pub fn with_preference(mut self, preference: BackendPreference) -> Self {
        self.preference = preference;
        self
    }

    /// Replaces the predicate consulted under [`BackendPreference::Auto`].
    pub fn with_predicate<P>(mut self, prefer_cooperative: P) -> Self
    where
        P: Fn() -> bool + 'static,
    {
        self.prefer_cooperative = Box::new(prefer_cooperative);
        self
    }

    pub fn preference(&self) -> BackendPreference {
        self.preference
    }

    /// The backend that would serve an operation issued now.
    pub fn backend(&self) -> Rc<dyn Backend> {
        let cooperative = match self.preference {
            BackendPreference::Cooperative => true,
            BackendPreference::Native => false,
            BackendPreference::Auto => (self.prefer_cooperative)(),
        };
        if cooperative {
            self.cooperative.clone()
        } else {
            self.native.clone()
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.backend().kind()
    }

    /// Starts `future` on the selected backend.
    pub fn spawn<F, T>(&self, future: F) -> Result<Handle>
    where
        F: Future<Output = strand_core::Result<T>> + 'static,
        T: Any,
    {
        let backend = self.backend();
        trace!(backend = %backend.kind(), "dispatching spawn");
        backend.spawn(future.map(|result| result.map(Value::new)).boxed_local())
    }

    pub async fn sleep(&self, duration: Duration) -> Result<Duration> {
        self.backend().sleep(duration).await
    }

    pub async fn pass(&self) -> Result<()> {
        self.backend().pass().await
    }
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatch")
            .field("preference", &self.preference)
            .field("selected", &self.kind())
            .finish()
    }
}
