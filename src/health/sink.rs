use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::models::{Alert, AlertSeverity};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AlertDeliveryError {
    #[error("Alert rejected: {0}")]
    Rejected(String),

    #[error("Alert delivery timed out after {0:?}")]
    Timeout(Duration),
}

/// Destination for health alerts; delivery is best-effort
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, alert: &Alert) -> Result<(), AlertDeliveryError>;

    fn name(&self) -> &str;
}

/// Writes alerts to the tracing pipeline at a level matching their severity
#[derive(Debug, Clone, Default)]
pub struct LogAlertSink;

impl LogAlertSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn notify(&self, alert: &Alert) -> Result<(), AlertDeliveryError> {
        match alert.severity {
            AlertSeverity::Resolved => {
                tracing::info!(
                    code = %alert.code,
                    message = %alert.message,
                    "[ALERT:RESOLVED]"
                );
            }
            AlertSeverity::Warning => {
                tracing::warn!(
                    code = %alert.code,
                    message = %alert.message,
                    "[ALERT:WARNING]"
                );
            }
            AlertSeverity::Critical => {
                tracing::error!(
                    code = %alert.code,
                    message = %alert.message,
                    "[ALERT:CRITICAL]"
                );
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Fans an alert out to several sinks
///
/// Every sink is tried; failures are collected into one error.
#[derive(Default)]
pub struct MultiAlertSink {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl MultiAlertSink {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn add_sink(&mut self, sink: Arc<dyn AlertSink>) {
        self.sinks.push(sink);
    }

    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.add_sink(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl AlertSink for MultiAlertSink {
    async fn notify(&self, alert: &Alert) -> Result<(), AlertDeliveryError> {
        let mut failures = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.notify(alert).await {
                failures.push(format!("{}: {}", sink.name(), e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(AlertDeliveryError::Rejected(failures.join("; ")))
        }
    }

    fn name(&self) -> &str {
        "multi"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AlertCode;
    use crate::testing::RecordingAlertSink;
    use chrono::Utc;

    fn alert() -> Alert {
        Alert::new(
            AlertSeverity::Warning,
            AlertCode::DataStale,
            "stale",
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_log_sink_accepts_every_severity() {
        let sink = LogAlertSink::new();
        for severity in [
            AlertSeverity::Resolved,
            AlertSeverity::Warning,
            AlertSeverity::Critical,
        ] {
            let mut a = alert();
            a.severity = severity;
            assert!(sink.notify(&a).await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_multi_sink_fans_out_past_failures() {
        let failing = Arc::new(RecordingAlertSink::new());
        failing.set_failing(true);
        let healthy = Arc::new(RecordingAlertSink::new());

        let multi = MultiAlertSink::new()
            .with_sink(failing.clone())
            .with_sink(healthy.clone());
        assert_eq!(multi.len(), 2);

        let err = multi.notify(&alert()).await.unwrap_err();
        assert!(matches!(err, AlertDeliveryError::Rejected(_)));
        assert_eq!(healthy.alerts().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_multi_sink_is_ok() {
        let multi = MultiAlertSink::new();
        assert!(multi.is_empty());
        assert!(multi.notify(&alert()).await.is_ok());
    }
}
