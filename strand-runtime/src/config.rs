//! # Runtime Configuration
//!
//! A `RuntimeConfig` describes how a [`Host`](crate::host::Host) wires a
//! process: which clock the reactor uses, which backend serves
//! thread-compatible operations, an optional turn budget and optional
//! logging.
//!
//! The builder validates eagerly, so an inconsistent configuration fails at
//! `build()` rather than at first use.
//!
//! ## Usage
//!
//! ```
//! use strand_runtime::config::{BackendPreference, RuntimeConfig};
//! use strand_core::reactor::ClockMode;
//!
//! let config = RuntimeConfig::builder()
//!     .clock(ClockMode::Virtual)
//!     .backend(BackendPreference::Cooperative)
//!     .turn_budget(10_000)
//!     .build()?;
//! assert_eq!(config.turn_budget, Some(10_000));
//! # Ok::<(), strand_runtime::Error>(())
//! ```
//!
//! ```should_panic
//! use strand_runtime::config::{BackendPreference, RuntimeConfig};
//! use strand_core::reactor::ClockMode;
//!
//! // Native timers cannot run on simulated time.
//! let config = RuntimeConfig::builder()
//!     .clock(ClockMode::Virtual)
//!     .backend(BackendPreference::Native)
//!     .build()
//!     .expect("Should fail - native backend on a virtual clock");
//! ```

use crate::error::{Error, Result};
use crate::logging::LoggingConfig;
use std::fmt;
use std::str::FromStr;
use strand_core::reactor::ClockMode;

/// Which backend serves thread-compatible operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendPreference {
    /// Cooperative while the reactor is running, native otherwise.
    #[default]
    Auto,
    /// Always the cooperative scheduler.
    Cooperative,
    /// Always native Tokio tasks and timers.
    Native,
}

impl fmt::Display for BackendPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Cooperative => "cooperative",
            Self::Native => "native",
        })
    }
}

impl FromStr for BackendPreference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cooperative" => Ok(Self::Cooperative),
            "native" => Ok(Self::Native),
            other => Err(Error::Config(format!(
                "Unknown backend {other:?}. Expected one of: auto, cooperative, native."
            ))),
        }
    }
}

/// Process-level settings for hosting strand tasks.
///
/// Use [`RuntimeConfigBuilder`] to construct instances.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuntimeConfig {
    /// Clock driving the reactor
    pub clock: ClockMode,

    /// Backend selection policy
    pub backend: BackendPreference,

    /// Maximum loop turns for one `block_on` call
    pub turn_budget: Option<u64>,

    /// Logging to install when the host starts (none if unset)
    pub logging: Option<LoggingConfig>,
}

impl RuntimeConfig {
    /// Creates a new builder for constructing a `RuntimeConfig`.
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - The turn budget, if set, is greater than zero
    /// - The native backend is not combined with the virtual clock
    pub fn validate(&self) -> Result<()> {
        if self.turn_budget == Some(0) {
            return Err(Error::Config(
                "Turn budget must be greater than 0. Leave it unset for no limit.".to_string(),
            ));
        }

        if self.backend == BackendPreference::Native && self.clock == ClockMode::Virtual {
            return Err(Error::Config(
                "Native backend requires the system clock: Tokio timers cannot follow \
                 the reactor's virtual time. Use the cooperative backend or the system clock."
                    .to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for [`RuntimeConfig`].
#[derive(Debug, Default)]
pub struct RuntimeConfigBuilder {
    clock: Option<ClockMode>,
    backend: Option<BackendPreference>,
    turn_budget: Option<u64>,
    logging: Option<LoggingConfig>,
}

impl RuntimeConfigBuilder {
    /// Sets the reactor clock. Defaults to the system clock.
    pub fn clock(mut self, clock: ClockMode) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Shorthand for `clock(ClockMode::Virtual)`.
    pub fn virtual_clock(self) -> Self {
        self.clock(ClockMode::Virtual)
    }

    /// Sets the backend selection policy. Defaults to [`BackendPreference::Auto`].
    pub fn backend(mut self, backend: BackendPreference) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Caps the number of loop turns a single `block_on` may take.
    pub fn turn_budget(mut self, turns: u64) -> Self {
        self.turn_budget = Some(turns);
        self
    }

    /// Installs logging when the host starts.
    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> Result<RuntimeConfig> {
        let config = RuntimeConfig {
            clock: self.clock.unwrap_or_default(),
            backend: self.backend.unwrap_or_default(),
            turn_budget: self.turn_budget,
            logging: self.logging,
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogLevel;

    #[test]
    fn test_builder_defaults() {
        let config = RuntimeConfig::builder().build().unwrap();

        assert_eq!(config.clock, ClockMode::System);
        assert_eq!(config.backend, BackendPreference::Auto);
        assert_eq!(config.turn_budget, None);
        assert!(config.logging.is_none());
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn test_builder_with_all_fields() {
        let config = RuntimeConfig::builder()
            .virtual_clock()
            .backend(BackendPreference::Cooperative)
            .turn_budget(500)
            .logging(LoggingConfig::default().with_level(LogLevel::Trace))
            .build()
            .unwrap();

        assert_eq!(config.clock, ClockMode::Virtual);
        assert_eq!(config.backend, BackendPreference::Cooperative);
        assert_eq!(config.turn_budget, Some(500));
        assert_eq!(config.logging.unwrap().level, LogLevel::Trace);
    }

    #[test]
    fn test_validate_rejects_zero_turn_budget() {
        let result = RuntimeConfig::builder().turn_budget(0).build();

        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("must be greater than 0"));
    }

    #[test]
    fn test_validate_rejects_native_backend_on_virtual_clock() {
        let result = RuntimeConfig::builder()
            .virtual_clock()
            .backend(BackendPreference::Native)
            .build();

        assert!(matches!(result, Err(Error::Config(ref msg)) if msg.contains("system clock")));
    }

    #[test]
    fn test_native_backend_on_system_clock_is_accepted() {
        let config = RuntimeConfig::builder()
            .backend(BackendPreference::Native)
            .build()
            .unwrap();
        assert_eq!(config.backend, BackendPreference::Native);
    }

    #[test]
    fn test_backend_preference_parsing() {
        assert_eq!(
            "Native".parse::<BackendPreference>().unwrap(),
            BackendPreference::Native
        );
        assert_eq!(
            BackendPreference::Cooperative.to_string(),
            "cooperative"
        );
        assert!("threads".parse::<BackendPreference>().is_err());
    }

    #[test]
    fn test_config_is_cloneable() {
        let config = RuntimeConfig::builder().turn_budget(7).build().unwrap();
        let cloned = config.clone();
        assert_eq!(config, cloned);
    }
}
