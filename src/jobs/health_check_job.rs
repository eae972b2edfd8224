use chrono::Utc;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::health::HealthMonitor;

/// Health sampling job
///
/// Runs every `sample_interval_secs` and feeds the health monitor, which
/// scores the pipeline and delivers any alerts.
pub struct HealthCheckJob {
    monitor: Arc<HealthMonitor>,
}

impl HealthCheckJob {
    pub fn new(monitor: Arc<HealthMonitor>) -> Self {
        Self { monitor }
    }

    /// Register this job with the scheduler
    pub async fn register(self, scheduler: &JobScheduler) -> Result<(), Box<dyn std::error::Error>> {
        let interval = self.monitor.config().sample_interval();
        let monitor = self.monitor.clone();

        let job = Job::new_repeated_async(interval, move |_uuid, _lock| {
            let monitor = monitor.clone();

            Box::pin(async move {
                let score = monitor.sample(Utc::now()).await;
                tracing::debug!("Health check job completed (score {:.1})", score.score);
            })
        })?;

        scheduler.add(job).await?;

        tracing::info!("✅ Health check job registered (every {:?})", interval);

        Ok(())
    }

    /// Take a sample immediately (manual trigger)
    pub async fn run_now(&self) -> f64 {
        self.monitor.sample(Utc::now()).await.score
    }
}
