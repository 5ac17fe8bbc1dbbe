//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pipeline layers produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (retry and breaker counters, call duration histogram)
//!     → tracing.rs (one span per call, tagged with the request ID)
//!
//! Consumers:
//!     → stdout (tracing-subscriber fmt layer)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Layers talk to a `StatsSink`, never to a metrics backend directly
//! - Health and readiness probes are not traced to keep logs quiet

pub mod logging;
pub mod metrics;
pub mod tracing;

pub use self::metrics::{MetricsSink, NoopSink, Stats, StatsSink};
pub use self::tracing::{is_operational_endpoint, ClientSpan};
