//! Workspace facade crate.
//!
//! Re-exports the workspace crates so host applications can depend on
//! `strand-workspace` alone. The `runtime` feature (on by default) adds
//! configuration, logging and backend dispatch from `strand-runtime`.

pub use strand_core::*;

#[cfg(feature = "runtime")]
pub use strand_runtime as host;
