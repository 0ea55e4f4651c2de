//! Observability primitives: correlation identifiers, the metrics registry,
//! and logging initialization.
//!
//! The request pipeline (see [`crate::pipeline`]) wires these into every
//! request; handlers only ever see the `tracing` macros and the registry
//! handle carried in application state.

pub mod correlation;
pub mod logging;
pub mod metrics;

pub use correlation::{CorrelationId, CORRELATION_HEADER};
pub use logging::init_logging;
pub use metrics::{ConfigError, MetricsRegistry};
