//! Health scoring, alert rules and alert delivery

pub mod alerts;
pub mod monitor;
pub mod scoring;
pub mod sink;

pub use alerts::{AlertEvaluator, AlertRules};
pub use monitor::{HealthMonitor, HealthReport};
pub use scoring::{linear_credit, HealthScorer};
pub use sink::{AlertDeliveryError, AlertSink, LogAlertSink, MultiAlertSink};
