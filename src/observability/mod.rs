//! Observability: structured logging and process-wide metrics

pub mod logging;
pub mod metrics;

pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{metrics, ConnectMetrics, MetricsSnapshot};

// Span macros for structured logging
pub use logging::{exchange_span, lifecycle_span};
