//! Logging setup for the stencil code generator.
//!
//! Wraps `tracing-subscriber` so every stencil binary configures logging the
//! same way: a [`LogConfig`] (usually the `[logging]` table of
//! `stencil.toml`, adjusted by `-v` flags and the `STENCIL_LOG` variable)
//! is turned into a global subscriber by [`setup_logging`].
//!
//! # Example
//!
//! ```rust,no_run
//! use stencil_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), stencil_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Pretty)
//!     .with_directive("stencil_plugins=debug")
//!     .with_env_override();
//!
//! let _guard = setup_logging(&config)?;
//! tracing::info!("Logging ready");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    FileLogConfig, FileRotation, LOG_ENV_VAR, LogConfig, LogFormat, LogTarget, LoggingGuard,
    setup_default_logging, setup_logging,
};
