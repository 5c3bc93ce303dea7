//! Pipeline statistics

pub mod metrics;

pub use metrics::{CallStreamStats, StreamingStats};
