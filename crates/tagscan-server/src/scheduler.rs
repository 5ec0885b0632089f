//! Background job scheduler.
//!
//! Registers the visit sweep, which forgets visits whose tab was closed
//! without a `DELETE` reaching us.

use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use crate::visits::VisitRegistry;

/// Every minute, at second zero.
const SWEEP_SCHEDULE: &str = "0 * * * * *";

/// Builds and starts the background job scheduler.
///
/// Returns the running [`JobScheduler`] handle, which must be kept alive for
/// the lifetime of the process. Dropping it shuts down all scheduled jobs.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if the scheduler cannot be initialised, the
/// sweep job cannot be registered, or the scheduler fails to start.
pub async fn build_scheduler(visits: VisitRegistry) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;
    register_sweep_job(&scheduler, visits).await?;
    scheduler.start().await?;
    Ok(scheduler)
}

async fn register_sweep_job(
    scheduler: &JobScheduler,
    visits: VisitRegistry,
) -> Result<(), JobSchedulerError> {
    let job = Job::new_async(SWEEP_SCHEDULE, move |_uuid, _lock| {
        let visits = visits.clone();
        Box::pin(async move {
            let removed = visits.sweep_expired().await;
            if removed > 0 {
                tracing::info!(removed, "scheduler: swept expired visits");
            }
        })
    })?;

    scheduler.add(job).await?;
    Ok(())
}
