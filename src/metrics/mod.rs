pub mod latency;

pub use latency::{CycleLatencyTracker, LatencyStats};
