//! Commonly used types for `use stencil_telemetry::prelude::*;`.

pub use crate::{TelemetryError, TelemetryResult};

pub use crate::{FileRotation, LogConfig, LogFormat, LogTarget, LoggingGuard};

pub use crate::{setup_default_logging, setup_logging};
