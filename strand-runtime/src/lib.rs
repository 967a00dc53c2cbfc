//! # Strand Runtime
//!
//! Process-level wiring for strand tasks:
//! - Configuration with fail-fast validation ([`config`])
//! - Logging and tracing setup ([`logging`])
//! - Per-call selection between the cooperative scheduler and Tokio ([`dispatch`])
//! - A [`Host`] that ties them together
//!
//! ## Overview
//!
//! `strand-core` provides the tasks and synchronization primitives; this
//! crate decides how a process hosts them. Library code written against
//! [`Dispatch`] runs unchanged on the strand reactor or on a Tokio
//! `LocalSet`.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod logging;

pub use config::{BackendPreference, RuntimeConfig, RuntimeConfigBuilder};
pub use dispatch::{Backend, BackendKind, Dispatch, Handle};
pub use error::{Error, Result};
pub use host::Host;
pub use logging::{init_logging, LogFormat, LogLevel, LoggingConfig};
