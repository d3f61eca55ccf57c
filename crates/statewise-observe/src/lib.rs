//! Observability setup for Statewise: structured logging with optional
//! OpenTelemetry trace export.

pub mod tracing_setup;
