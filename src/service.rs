//! Job orchestration: create, process and query one-shot harvest jobs.

use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::harvest::HarvesterRegistry;
use crate::job::{HarvestJob, JobStatus};
use crate::model::{ConfigMap, HarvestedData, JobResult, SourceType, UnknownSourceType};
use crate::traits::{JobError, JobRepository, NotificationSink, NotifyError};

pub struct HarvestService {
    registry: Arc<HarvesterRegistry>,
    repository: Arc<dyn JobRepository>,
    notifier: Arc<dyn NotificationSink>,
}

impl HarvestService {
    pub fn new(
        registry: Arc<HarvesterRegistry>,
        repository: Arc<dyn JobRepository>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            registry,
            repository,
            notifier,
        }
    }

    /// Persists a new PENDING job. Nothing is stored when the request is
    /// rejected.
    #[instrument(skip(self, config))]
    pub async fn create(
        &self,
        source_type: &str,
        config: ConfigMap,
        job_id: Option<String>,
    ) -> Result<HarvestJob, JobError> {
        let source_type: SourceType = source_type
            .parse()
            .map_err(|e: UnknownSourceType| JobError::InvalidInput(e.to_string()))?;
        if !self.registry.supports(source_type) {
            return Err(JobError::InvalidInput(format!(
                "no harvester registered for source type '{source_type}'"
            )));
        }
        if job_id.as_deref().is_some_and(|id| id.trim().is_empty()) {
            return Err(JobError::InvalidInput("job_id must not be empty".into()));
        }

        let job = self
            .repository
            .save(&HarvestJob::new(source_type, config, job_id))
            .await?;
        info!(job_id = %job.job_id(), %source_type, "Harvest job created");
        notify(self.notifier.job_created(&job).await, job.job_id(), "created");
        Ok(job)
    }

    /// Runs a PENDING job to COMPLETED or FAILED.
    ///
    /// Harvest failures are recorded on the returned job. Errors are only
    /// returned for an unknown id, a job that is not PENDING, or a repository
    /// failure. The job is written back after every transition.
    #[instrument(skip(self))]
    pub async fn process(&self, job_id: &str) -> Result<HarvestJob, JobError> {
        let mut job = self.get_status(job_id).await?;
        if job.status() != JobStatus::Pending {
            return Err(JobError::Conflict(format!(
                "job {job_id} is {}, only pending jobs can be processed",
                job.status()
            )));
        }

        job.start_processing()?;
        let mut job = self.repository.update_if(&job, JobStatus::Pending).await?;
        notify(self.notifier.job_started(&job).await, job_id, "started");
        info!(source_type = %job.source_type(), "Processing harvest job");

        let outcome = match self.dispatch(job.source_type(), job.config().clone()).await {
            Ok(data) => {
                let result = JobResult::from(data);
                info!(
                    rows = result.row_count,
                    columns = result.column_count,
                    "Harvest job completed"
                );
                job.complete(result.clone())?;
                Ok(result)
            }
            Err(message) => {
                error!(error = %message, "Harvest job failed");
                job.fail(message.clone())?;
                Err(message)
            }
        };

        let job = self
            .repository
            .update_if(&job, JobStatus::Processing)
            .await?;
        match outcome {
            Ok(result) => notify(
                self.notifier.job_completed(&job, &result).await,
                job_id,
                "completed",
            ),
            Err(message) => notify(
                self.notifier.job_failed(&job, &message).await,
                job_id,
                "failed",
            ),
        }
        Ok(job)
    }

    pub async fn get_status(&self, job_id: &str) -> Result<HarvestJob, JobError> {
        self.repository
            .find_by_id(job_id)
            .await?
            .ok_or_else(|| JobError::NotFound(format!("job {job_id}")))
    }

    /// All jobs, oldest first.
    pub async fn list_jobs(&self) -> Result<Vec<HarvestJob>, JobError> {
        Ok(self.repository.find_all().await?)
    }

    pub async fn pending_jobs(&self) -> Result<Vec<HarvestJob>, JobError> {
        Ok(self.repository.find_by_status(JobStatus::Pending).await?)
    }

    pub async fn delete(&self, job_id: &str) -> Result<(), JobError> {
        self.repository.delete(job_id).await?;
        info!(job_id, "Harvest job deleted");
        Ok(())
    }

    /// Harvests on a separate task; a panicking harvester becomes a job
    /// failure instead of unwinding through the caller.
    async fn dispatch(
        &self,
        source_type: SourceType,
        config: ConfigMap,
    ) -> Result<HarvestedData, String> {
        let registry = Arc::clone(&self.registry);
        let handle =
            tokio::spawn(async move { registry.dispatch_typed(source_type, &config).await });
        match handle.await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(e) => Err(format!("harvester task aborted: {e}")),
        }
    }
}

fn notify(outcome: Result<(), NotifyError>, job_id: &str, event: &str) {
    if let Err(e) = outcome {
        warn!(job_id, event, error = %e, "Notification dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::{HarvestError, Harvester};
    use crate::memory::InMemoryJobRepository;
    use crate::model::{ColumnType, DataColumn, Row};
    use crate::notify::{BroadcastNotifier, JobNotification};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a fixed three rows over two columns.
    struct StubHarvester {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Harvester for StubHarvester {
        fn source_type(&self) -> SourceType {
            SourceType::File
        }

        async fn harvest(&self, config: &ConfigMap) -> Result<HarvestedData, HarvestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let rows: Vec<Row> = (1..=3)
                .map(|i| {
                    json!({"id": i, "name": format!("row {i}")})
                        .as_object()
                        .cloned()
                        .unwrap()
                })
                .collect();
            let path = config["file_path"].as_str().unwrap_or_default();
            Ok(HarvestedData::new(
                SourceType::File,
                path,
                rows,
                vec![
                    DataColumn::new("id", ColumnType::Number),
                    DataColumn::new("name", ColumnType::String),
                ],
            ))
        }
    }

    struct FailingHarvester;

    #[async_trait]
    impl Harvester for FailingHarvester {
        fn source_type(&self) -> SourceType {
            SourceType::Api
        }

        async fn harvest(&self, _config: &ConfigMap) -> Result<HarvestedData, HarvestError> {
            Err(HarvestError::ExternalSource("HTTP 503 from https://e.com".into()))
        }
    }

    struct PanickingHarvester;

    #[async_trait]
    impl Harvester for PanickingHarvester {
        fn source_type(&self) -> SourceType {
            SourceType::Web
        }

        async fn harvest(&self, _config: &ConfigMap) -> Result<HarvestedData, HarvestError> {
            panic!("selector engine crashed")
        }
    }

    struct BrokenNotifier;

    #[async_trait]
    impl NotificationSink for BrokenNotifier {
        async fn job_created(&self, _job: &HarvestJob) -> Result<(), NotifyError> {
            Err(NotifyError("sink offline".into()))
        }

        async fn job_started(&self, _job: &HarvestJob) -> Result<(), NotifyError> {
            Err(NotifyError("sink offline".into()))
        }

        async fn job_completed(
            &self,
            _job: &HarvestJob,
            _result: &JobResult,
        ) -> Result<(), NotifyError> {
            Err(NotifyError("sink offline".into()))
        }

        async fn job_failed(&self, _job: &HarvestJob, _error: &str) -> Result<(), NotifyError> {
            Err(NotifyError("sink offline".into()))
        }
    }

    fn registry() -> Arc<HarvesterRegistry> {
        Arc::new(
            HarvesterRegistry::new()
                .with(Arc::new(StubHarvester {
                    calls: AtomicUsize::new(0),
                }))
                .with(Arc::new(FailingHarvester))
                .with(Arc::new(PanickingHarvester)),
        )
    }

    fn service_with(
        notifier: Arc<dyn NotificationSink>,
    ) -> (HarvestService, Arc<InMemoryJobRepository>) {
        let repository = Arc::new(InMemoryJobRepository::new());
        let service = HarvestService::new(registry(), repository.clone(), notifier);
        (service, repository)
    }

    fn file_config() -> ConfigMap {
        json!({"file_path": "/tmp/a.csv", "file_type": "csv"})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_then_process_completes_with_counts() {
        let (service, _) = service_with(Arc::new(BroadcastNotifier::new()));

        let job = service.create("file", file_config(), None).await.unwrap();
        assert_eq!(job.status(), JobStatus::Pending);
        assert!(!job.job_id().is_empty());

        let job = service.process(job.job_id()).await.unwrap();
        assert_eq!(job.status(), JobStatus::Completed);
        assert!(job.error().is_none());
        let result = job.result().unwrap();
        assert_eq!((result.row_count, result.column_count), (3, 2));
        assert_eq!(result.data.rows.len(), result.row_count);

        let stored = service.get_status(job.job_id()).await.unwrap();
        assert_eq!(stored, job);
    }

    #[tokio::test]
    async fn test_unknown_source_type_persists_nothing() {
        let (service, repository) = service_with(Arc::new(BroadcastNotifier::new()));
        let err = service.create("ftp", ConfigMap::new(), None).await.unwrap_err();
        assert!(matches!(err, JobError::InvalidInput(_)));
        assert!(repository.is_empty().await);
    }

    #[tokio::test]
    async fn test_dispatch_failure_is_recorded_on_job() {
        let notifier = Arc::new(BroadcastNotifier::new());
        let mut events = notifier.subscribe();
        let (service, _) = service_with(notifier);

        let job = service.create("api", ConfigMap::new(), None).await.unwrap();
        let job = service.process(job.job_id()).await.unwrap();

        assert_eq!(job.status(), JobStatus::Failed);
        assert!(job.result().is_none());
        assert!(job.error().unwrap().contains("HTTP 503"));

        let mut last = None;
        while let Ok(event) = events.try_recv() {
            last = Some(event);
        }
        assert!(matches!(
            last,
            Some(JobNotification::Failed { ref error, .. }) if error.contains("HTTP 503")
        ));
    }

    #[tokio::test]
    async fn test_completed_job_publishes_each_lifecycle_event() {
        let notifier = Arc::new(BroadcastNotifier::new());
        let mut events = notifier.subscribe();
        let (service, _) = service_with(notifier);

        let job = service.create("file", file_config(), None).await.unwrap();
        service.process(job.job_id()).await.unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            assert_eq!(event.job_id(), job.job_id());
            seen.push(event);
        }
        assert_eq!(seen.len(), 3);
        assert!(matches!(seen[0], JobNotification::Created { .. }));
        assert!(matches!(seen[1], JobNotification::Started { .. }));
        assert!(matches!(
            seen[2],
            JobNotification::Completed {
                row_count: 3,
                column_count: 2,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_panicking_harvester_fails_job() {
        let (service, _) = service_with(Arc::new(BroadcastNotifier::new()));
        let job = service.create("web", ConfigMap::new(), None).await.unwrap();
        let job = service.process(job.job_id()).await.unwrap();
        assert_eq!(job.status(), JobStatus::Failed);
        assert!(job.error().unwrap().contains("aborted"));
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let (service, _) = service_with(Arc::new(BroadcastNotifier::new()));
        assert!(matches!(
            service.process("missing").await,
            Err(JobError::NotFound(_))
        ));
        assert!(matches!(
            service.get_status("missing").await,
            Err(JobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reprocessing_terminal_job_conflicts() {
        let (service, _) = service_with(Arc::new(BroadcastNotifier::new()));
        let job = service.create("file", file_config(), None).await.unwrap();
        let first = service.process(job.job_id()).await.unwrap();

        let err = service.process(job.job_id()).await.unwrap_err();
        assert!(matches!(err, JobError::Conflict(_)));
        assert_eq!(service.get_status(job.job_id()).await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_concurrent_process_runs_harvest_once() {
        let repository = Arc::new(InMemoryJobRepository::new());
        let stub = Arc::new(StubHarvester {
            calls: AtomicUsize::new(0),
        });
        let service = Arc::new(HarvestService::new(
            Arc::new(HarvesterRegistry::new().with(stub.clone())),
            repository,
            Arc::new(BroadcastNotifier::new()),
        ));
        let job = service.create("file", file_config(), None).await.unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let service = Arc::clone(&service);
                let job_id = job.job_id().to_string();
                tokio::spawn(async move { service.process(&job_id).await })
            })
            .collect();
        let mut completed = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                completed += 1;
            }
        }

        assert_eq!(completed, 1);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_notifier_failures_never_fail_the_job() {
        let (service, _) = service_with(Arc::new(BrokenNotifier));
        let job = service.create("file", file_config(), None).await.unwrap();
        let job = service.process(job.job_id()).await.unwrap();
        assert_eq!(job.status(), JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_explicit_job_id_and_listing() {
        let (service, _) = service_with(Arc::new(BroadcastNotifier::new()));
        let job = service
            .create("file", file_config(), Some("job-42".into()))
            .await
            .unwrap();
        assert_eq!(job.job_id(), "job-42");

        assert!(matches!(
            service.create("file", file_config(), Some("job-42".into())).await,
            Err(JobError::Conflict(_))
        ));
        assert!(matches!(
            service.create("file", file_config(), Some(" ".into())).await,
            Err(JobError::InvalidInput(_))
        ));

        service.create("api", ConfigMap::new(), None).await.unwrap();
        assert_eq!(service.list_jobs().await.unwrap().len(), 2);
        assert_eq!(service.pending_jobs().await.unwrap().len(), 2);

        service.delete("job-42").await.unwrap();
        assert_eq!(service.list_jobs().await.unwrap().len(), 1);
    }
}
