//! Observability: structured logging, relay counters and warning rate limits

pub mod logging;
pub mod metrics;
pub mod throttle;

pub use logging::{init_default_logging, init_logging, LogFormat, LogSettings};
pub use metrics::{metrics, MetricsSnapshot, RelayMetrics};
pub use throttle::WarnThrottle;

// Span macros for structured logging
pub use logging::{mqtt_span, record_span};
