//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Protocol core, server and client produce:
//!     → logging.rs (structured log events with connection/session ids)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout via tracing-subscriber
//!     → Prometheus scrape endpoint (optional)
//! ```

pub mod logging;
pub mod metrics;
