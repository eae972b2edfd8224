/// Scheduled background jobs
///
/// Contains jobs registered on the shared `JobScheduler`:
/// - Periodic health sampling

pub mod health_check_job;

pub use health_check_job::HealthCheckJob;
