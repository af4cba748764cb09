//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! loaders, facade, dispatcher produce:
//!     → tracing events (structured fields: section, data_id, format)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → logging.rs installs a subscriber (binary only)
//!     → any `metrics` recorder the host application installs
//! ```
//!
//! # Design Decisions
//! - The library never installs a subscriber or recorder itself
//! - Metric updates are no-ops until a recorder exists

pub mod logging;
pub mod metrics;
