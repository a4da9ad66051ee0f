//! Storage adapters.
//!
//! Storage adapters can be layered on stores.

pub mod performance_metrics;
pub mod read_only;
