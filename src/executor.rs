use crate::config::HarvesterConfig;
use crate::job::HarvestJob;
use crate::service::HarvestService;
use crate::traits::JobError;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, instrument};

/// Outcome of one job in a batch, keyed by job id.
pub type BatchOutcome = (String, Result<HarvestJob, JobError>);

/// Processes many jobs at once with a cap on how many harvest concurrently.
pub struct JobExecutor {
    semaphore: Arc<Semaphore>,
}

impl JobExecutor {
    pub fn new(concurrency_limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency_limit.max(1))),
        }
    }

    pub fn from_config(config: &HarvesterConfig) -> Self {
        Self::new(config.max_concurrent_jobs)
    }

    /// Processes every id and returns outcomes in input order.
    #[instrument(skip(self, service, job_ids), fields(jobs = job_ids.len()))]
    pub async fn process_batch(
        &self,
        service: Arc<HarvestService>,
        job_ids: Vec<String>,
    ) -> Vec<BatchOutcome> {
        let handles: Vec<_> = job_ids
            .into_iter()
            .map(|job_id| {
                let service = Arc::clone(&service);
                let semaphore = Arc::clone(&self.semaphore);
                let task_id = job_id.clone();
                let handle = tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.map_err(|e| {
                        JobError::Execution(format!("Semaphore error: {}", e))
                    })?;
                    service.process(&task_id).await
                });
                (job_id, handle)
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for (job_id, handle) in handles {
            let outcome = handle
                .await
                .unwrap_or_else(|e| Err(JobError::Execution(e.to_string())));
            outcomes.push((job_id, outcome));
        }

        let failed = outcomes.iter().filter(|(_, r)| r.is_err()).count();
        info!(processed = outcomes.len(), errors = failed, "Finished job batch");
        outcomes
    }

    /// Processes every job currently PENDING.
    pub async fn process_pending(
        &self,
        service: Arc<HarvestService>,
    ) -> Result<Vec<BatchOutcome>, JobError> {
        let job_ids = service
            .pending_jobs()
            .await?
            .into_iter()
            .map(|job| job.job_id().to_string())
            .collect();
        Ok(self.process_batch(service, job_ids).await)
    }
}
