//! Thread-compatible concurrency for a single-threaded event loop.
//!
//! This crate runs code written against a familiar thread API (spawn/join,
//! sleep/wakeup, mutex, condition variable, blocking queue) as cooperatively
//! scheduled tasks on one event loop, without an OS thread per logical task.
//!
//! # Architecture
//!
//! - [`event_loop`]: the loop interface the scheduler consumes, and
//!   [`reactor`], the loop shipped with the crate (system or virtual clock).
//! - [`scheduler`] and [`task`]: task registry, lifecycle and the
//!   thread-compatible task handle.
//! - [`resume`]: the suspension protocol that copes with resumes arriving out
//!   of order.
//! - [`sync`]: `Mutex`, `ConditionVariable` and `Queue`.
//! - [`time`]: `sleep`, `stop`, `pass` and `yield_now`.
//! - [`runtime`]: a reactor plus scheduler with `block_on`.
//!
//! All tasks share one logical thread: concurrency is interleaving, not
//! parallelism.
//!
//! # Examples
//!
//! ```rust
//! use strand_core::runtime::Builder;
//! use strand_core::sync::Queue;
//! use strand_core::time::{sleep, Duration};
//! use strand_core::spawn;
//!
//! let runtime = Builder::new().virtual_clock().build();
//! let consumed = runtime
//!     .block_on(async {
//!         let queue = Queue::new();
//!
//!         let producer = {
//!             let queue = queue.clone();
//!             spawn(async move {
//!                 for i in 0..5 {
//!                     sleep(Duration::from_millis(10)).await?;
//!                     queue.push(i);
//!                 }
//!                 Ok(())
//!             })?
//!         };
//!
//!         let mut consumed = Vec::new();
//!         for _ in 0..5 {
//!             consumed.push(queue.pop(false).await?);
//!         }
//!         producer.join(None).await?;
//!         Ok(consumed)
//!     })
//!     .unwrap();
//! assert_eq!(consumed, vec![0, 1, 2, 3, 4]);
//! ```

// Entry-point and test macros that run an `async fn` as a root task.
pub use strand_core_macros::{main, test};

pub mod arena;
mod context;
pub mod error;
pub mod event_loop;
pub mod reactor;
pub mod resume;
pub mod runtime;
pub mod scheduler;
pub mod sync;
pub mod task;
pub mod time;
pub mod value;

pub use context::EnterGuard;
pub use error::{Error, Result};
pub use resume::{suspend_until, Resumable, Woken};
pub use runtime::{block_on, Builder, Runtime};
pub use scheduler::Scheduler;
pub use sync::{ConditionVariable, Mutex, Queue};
pub use task::{current, list, spawn, Status, Task, TaskId};
pub use time::{now, pass, sleep, sleep_secs, stop, yield_now, Duration};
pub use value::Value;
