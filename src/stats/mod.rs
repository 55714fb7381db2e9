//! Stream statistics

pub mod metrics;

pub use metrics::{StreamMetrics, StreamStats};
