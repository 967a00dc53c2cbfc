//! # Host
//!
//! Bootstraps a process from a [`RuntimeConfig`]: installs logging, builds
//! the reactor and scheduler, and wires a [`Dispatch`] over them.
//!
//! ## Usage
//!
//! ```
//! use strand_runtime::{Host, RuntimeConfig};
//! use strand_core::sync::Queue;
//! use strand_core::Duration;
//!
//! let host = Host::new(RuntimeConfig::builder().virtual_clock().build()?)?;
//! let dispatch = host.dispatch();
//!
//! let total = host.block_on(async move {
//!     let queue = Queue::new();
//!     let producer = {
//!         let (queue, inner) = (queue.clone(), dispatch.clone());
//!         dispatch.spawn(async move {
//!             for i in 1..=3 {
//!                 inner.sleep(Duration::from_millis(5)).await?;
//!                 queue.push(i);
//!             }
//!             Ok(())
//!         })?
//!     };
//!
//!     let mut total = 0;
//!     for _ in 0..3 {
//!         total += queue.pop(false).await?;
//!     }
//!     producer.join().await?;
//!     Ok(total)
//! })?;
//! assert_eq!(total, 6);
//! # Ok::<(), strand_runtime::Error>(())
//! ```

use crate::config::{BackendPreference, RuntimeConfig};
use crate::dispatch::Dispatch;
use crate::error::{Error, Result};
use crate::logging::init_logging;
use std::future::Future;
use std::rc::Rc;
use strand_core::runtime::{Builder, Runtime};
use tracing::{debug, info};

/// A configured runtime with its dispatch layer.
pub struct Host {
    config: RuntimeConfig,
    runtime: Runtime,
    dispatch: Rc<Dispatch>,
}

impl Host {
    /// Validates `config`, installs its logging (if any) and builds the runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid or logging
    /// cannot be installed (for example because a global subscriber already
    /// exists).
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;

        if let Some(logging) = &config.logging {
            init_logging(logging.clone())?;
        }

        let mut builder = Builder::new().clock(config.clock);
        if let Some(turns) = config.turn_budget {
            builder = builder.turn_budget(turns);
        }
        let runtime = builder.build();
        let dispatch = Rc::new(
            Dispatch::new(runtime.scheduler().clone()).with_preference(config.backend),
        );

        info!(
            clock = ?config.clock,
            backend = %config.backend,
            turn_budget = ?config.turn_budget,
            "host started"
        );

        Ok(Self {
            config,
            runtime,
            dispatch,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// A shared handle to the dispatch layer, for moving into task bodies.
    pub fn dispatch(&self) -> Rc<Dispatch> {
        self.dispatch.clone()
    }

    /// Runs `future` to completion.
    ///
    /// With the native backend the future runs on a current-thread Tokio
    /// runtime inside a `LocalSet`; otherwise it runs as the root strand task.
    pub fn block_on<F, T>(&self, future: F) -> Result<T>
    where
        F: Future<Output = strand_core::Result<T>> + 'static,
        T: 'static,
    {
        match self.config.backend {
            BackendPreference::Native => {
                debug!("running root future on tokio");
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(|e| Error::Internal(format!("Failed to build tokio runtime: {e}")))?;
                let local = tokio::task::LocalSet::new();
                Ok(local.block_on(&runtime, future)?)
            }
            BackendPreference::Auto | BackendPreference::Cooperative => {
                debug!("running root future as a strand task");
                Ok(self.runtime.block_on(future)?)
            }
        }
    }

    /// Kills every live strand task.
    pub fn shutdown(&self) {
        self.runtime.shutdown();
        debug!("host shut down");
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("config", &self.config)
            .field("runtime", &self.runtime)
            .field("dispatch", &self.dispatch)
            .finish()
    }
}
