//! Monitoring
//!
//! Cache effectiveness tracking and text reports.

pub mod performance;

pub use performance::{
    CategoryStats, OperationStats, PerformanceMonitor, PerformanceSnapshot, SessionStats,
};
