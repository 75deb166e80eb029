//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events with structured fields (request_id on every line)
//!     → metrics.rs (counters, gauges, histograms through the metrics facade)
//!
//! Consumers:
//!     → logging.rs subscriber (text or JSON on stdout)
//!     → Prometheus scrape endpoint, when enabled
//! ```

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
