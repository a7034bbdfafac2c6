//! Benchmark services for mingo.
//!
//! Register them on [`mingo_core::ContextOptions`] to receive the timing of every
//! executed query:
//!
//! ```ignore
//! use mingo_benchmark::{LoggingBenchmarkService, SummaryBenchmarkService};
//! use mingo_core::ContextOptions;
//! use std::sync::Arc;
//!
//! let summary = Arc::new(SummaryBenchmarkService::new());
//! let options = ContextOptions::new()
//!     .with_benchmark_service(Arc::new(LoggingBenchmarkService::default()))
//!     .with_benchmark_service(summary.clone());
//! ```

mod logging;
mod summary;

pub use logging::LoggingBenchmarkService;
pub use summary::{QueryStats, SummaryBenchmarkService};
