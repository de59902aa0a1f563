/*
[INPUT]:  Public API exports for marketwire-monitor crate
[OUTPUT]: Module declarations and public re-exports
[POS]:    Crate root - library entry point
[UPDATE]: When adding new modules or public exports
*/

pub mod config;
pub mod report;

// Re-export main types for convenience
pub use config::MonitorConfig;
pub use report::{HealthChange, HealthWatch, StreamCounts, StreamTally, summarize};
