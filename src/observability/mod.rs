//! Observability for the bus client
//!
//! Structured logging, process-wide metrics and the health check HTTP server.

pub mod health;
pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use health::HealthServer;
pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{metrics, MetricsCollector, MetricsSnapshot};

// Span macros for structured logging
pub use logging::{bus_span, connection_span, request_span};
