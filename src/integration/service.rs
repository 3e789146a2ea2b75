//! Integration management and run execution.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::config::HarvesterConfig;
use crate::harvest::HarvesterRegistry;
use crate::integration::model::{DataIntegration, IntegrationUpdate, NewIntegration};
use crate::integration::run::{IntegrationJob, RecordCounters, RunResult, RunStatus};
use crate::model::{ConfigMap, HarvestedData, Row, SourceType};
use crate::traits::{
    DatasetStore, IntegrationJobRepository, IntegrationRepository, JobError, RepositoryError,
};

/// Per-row store errors written to a run's log before the rest are only counted.
const MAX_LOGGED_ROW_ERRORS: usize = 10;

/// Decides whether a run that stored some rows counts as COMPLETED.
///
/// A run always fails when nothing was processed or nothing was stored.
/// With `max_failure_ratio` set it also fails once the failed share of
/// processed records exceeds the ratio.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunPolicy {
    pub max_failure_ratio: Option<f64>,
}

impl RunPolicy {
    pub fn from_config(config: &HarvesterConfig) -> Self {
        Self {
            max_failure_ratio: config.max_failure_ratio,
        }
    }

    pub fn evaluate(&self, counters: &RecordCounters) -> Result<(), String> {
        if counters.processed() == 0 {
            return Err("harvest returned no records".to_string());
        }
        if counters.success() == 0 {
            return Err(format!(
                "all {} records were rejected by the dataset store",
                counters.processed()
            ));
        }
        if let Some(max) = self.max_failure_ratio {
            let ratio = counters.failure_ratio();
            if ratio > max {
                return Err(format!(
                    "{} of {} records rejected, failure ratio {:.2} exceeds {:.2}",
                    counters.failed(),
                    counters.processed(),
                    ratio,
                    max
                ));
            }
        }
        Ok(())
    }
}

pub struct IntegrationService {
    integrations: Arc<dyn IntegrationRepository>,
    runs: Arc<dyn IntegrationJobRepository>,
    registry: Arc<HarvesterRegistry>,
    datasets: Arc<dyn DatasetStore>,
    policy: RunPolicy,
}

impl IntegrationService {
    pub fn new(
        integrations: Arc<dyn IntegrationRepository>,
        runs: Arc<dyn IntegrationJobRepository>,
        registry: Arc<HarvesterRegistry>,
        datasets: Arc<dyn DatasetStore>,
    ) -> Self {
        Self {
            integrations,
            runs,
            registry,
            datasets,
            policy: RunPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RunPolicy) -> Self {
        self.policy = policy;
        self
    }

    // ========================================================================
    // Integration management
    // ========================================================================

    #[instrument(skip(self, new), fields(name = %new.name))]
    pub async fn create_integration(
        &self,
        new: NewIntegration,
        created_by: Option<String>,
    ) -> Result<DataIntegration, JobError> {
        require_non_empty("name", &new.name)?;
        require_non_empty("dataset_id", &new.dataset_id)?;
        self.require_supported(new.harvest_config.source_type)?;

        let integration = self
            .integrations
            .save(&DataIntegration::new(new, created_by))
            .await?;
        info!(integration_id = %integration.id(), "Integration created");
        Ok(integration)
    }

    pub async fn get_integration(&self, id: &str) -> Result<DataIntegration, JobError> {
        self.integrations
            .find_by_id(id)
            .await?
            .ok_or_else(|| JobError::NotFound(format!("integration {id}")))
    }

    pub async fn list_integrations(&self) -> Result<Vec<DataIntegration>, JobError> {
        Ok(self.integrations.find_all().await?)
    }

    #[instrument(skip(self, update))]
    pub async fn update_integration(
        &self,
        id: &str,
        update: IntegrationUpdate,
    ) -> Result<DataIntegration, JobError> {
        if let Some(name) = &update.name {
            require_non_empty("name", name)?;
        }
        if let Some(dataset_id) = &update.dataset_id {
            require_non_empty("dataset_id", dataset_id)?;
        }
        if let Some(spec) = &update.harvest_config {
            self.require_supported(spec.source_type)?;
        }

        let change = move |i: &mut DataIntegration| i.apply_update(update);
        Ok(self.integrations.modify(id, Box::new(change)).await?)
    }

    pub async fn activate(&self, id: &str) -> Result<DataIntegration, JobError> {
        let change = |i: &mut DataIntegration| i.activate();
        let integration = self.integrations.modify(id, Box::new(change)).await?;
        info!(integration_id = %id, "Integration activated");
        Ok(integration)
    }

    pub async fn deactivate(&self, id: &str) -> Result<DataIntegration, JobError> {
        let change = |i: &mut DataIntegration| i.deactivate();
        let integration = self.integrations.modify(id, Box::new(change)).await?;
        info!(integration_id = %id, "Integration deactivated");
        Ok(integration)
    }

    /// Removes the integration. Its run history stays queryable.
    pub async fn delete_integration(&self, id: &str) -> Result<(), JobError> {
        self.integrations.delete(id).await?;
        info!(integration_id = %id, "Integration deleted");
        Ok(())
    }

    // ========================================================================
    // Runs
    // ========================================================================

    /// Records a PENDING run for an ACTIVE integration.
    #[instrument(skip(self))]
    pub async fn start_run(&self, integration_id: &str) -> Result<IntegrationJob, JobError> {
        let integration = self.get_integration(integration_id).await?;
        if !integration.is_active() {
            return Err(JobError::Conflict(format!(
                "integration {integration_id} is {}, only active integrations can run",
                integration.status()
            )));
        }

        let mut run = IntegrationJob::new(integration_id);
        run.log(format!("Run created for integration '{}'", integration.name()));
        let run = self.runs.save(&run).await?;
        info!(run_id = %run.id(), "Integration run created");
        Ok(run)
    }

    /// Executes a PENDING run to a terminal state.
    ///
    /// Harvest and storage failures end up on the returned run; only lookup
    /// and state conflicts are returned as errors. Once the run is stored in
    /// a terminal state the call succeeds even if the integration can no
    /// longer be updated.
    #[instrument(skip(self))]
    pub async fn execute_run(&self, run_id: &str) -> Result<IntegrationJob, JobError> {
        let mut run = self.get_run(run_id).await?;

        let Some(integration) = self.integrations.find_by_id(run.integration_id()).await?
        else {
            run.fail(format!(
                "integration {} no longer exists",
                run.integration_id()
            ))?;
            warn!(run_id, "Integration removed before its run started");
            return Ok(self.runs.update_if(&run, RunStatus::Pending).await?);
        };

        run.start()?;
        let mut run = self.runs.update_if(&run, RunStatus::Pending).await?;

        let outcome = self.harvest_into_dataset(&integration, &mut run).await;
        let work = run.clone();

        let failed = match outcome {
            Ok(result) => {
                let counters = run.counters();
                run.complete(result, counters)?;
                info!(
                    run_id,
                    stored = counters.success(),
                    rejected = counters.failed(),
                    "Integration run completed"
                );
                false
            }
            Err(RunStop::Failed(message)) => {
                run.fail(message)?;
                error!(run_id, error = ?run.error_message(), "Integration run failed");
                true
            }
            Err(RunStop::Cancelled) => return self.keep_cancelled(&work).await,
        };

        let run = match self.runs.update_if(&run, RunStatus::Running).await {
            Ok(run) => run,
            Err(RepositoryError::StaleState { .. }) => return self.keep_cancelled(&work).await,
            Err(e) => return Err(e.into()),
        };

        if let Some(completed_at) = run.completed_at() {
            let change = move |i: &mut DataIntegration| {
                if failed {
                    i.mark_error();
                }
                i.record_run(completed_at);
            };
            match self
                .integrations
                .modify(run.integration_id(), Box::new(change))
                .await
            {
                Ok(_) => {}
                Err(RepositoryError::NotFound(_)) => {
                    warn!(run_id, "Integration removed while its run executed");
                }
                Err(e) => {
                    warn!(run_id, error = %e, "Could not record run outcome on integration");
                }
            }
        }
        Ok(run)
    }

    /// `start_run` followed by `execute_run`.
    pub async fn run_integration(&self, integration_id: &str) -> Result<IntegrationJob, JobError> {
        let run = self.start_run(integration_id).await?;
        self.execute_run(run.id()).await
    }

    /// Cancels a PENDING or RUNNING run. A harvest already in flight is not
    /// interrupted, but no further rows are stored once the cancel lands.
    #[instrument(skip(self))]
    pub async fn cancel_run(&self, run_id: &str) -> Result<IntegrationJob, JobError> {
        let mut run = self.get_run(run_id).await?;
        let expected = run.status();
        run.cancel()?;
        let run = self.runs.update_if(&run, expected).await?;
        info!(run_id, "Integration run cancelled");
        Ok(run)
    }

    pub async fn get_run(&self, run_id: &str) -> Result<IntegrationJob, JobError> {
        self.runs
            .find_by_id(run_id)
            .await?
            .ok_or_else(|| JobError::NotFound(format!("integration run {run_id}")))
    }

    /// Run history of one integration, oldest first.
    pub async fn list_runs(&self, integration_id: &str) -> Result<Vec<IntegrationJob>, JobError> {
        Ok(self.runs.find_by_integration(integration_id).await?)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn require_supported(&self, source_type: SourceType) -> Result<(), JobError> {
        if self.registry.supports(source_type) {
            Ok(())
        } else {
            Err(JobError::InvalidInput(format!(
                "no harvester registered for source type '{source_type}'"
            )))
        }
    }

    /// Whether the stored run was cancelled while this execution worked on it.
    async fn is_cancelled(&self, run_id: &str) -> Result<bool, RepositoryError> {
        Ok(self
            .runs
            .find_by_id(run_id)
            .await?
            .is_some_and(|stored| stored.status() == RunStatus::Cancelled))
    }

    /// Merges the logs and counters of `work` into the stored CANCELLED
    /// record, so the audit trail shows what happened before the cancel.
    async fn keep_cancelled(&self, work: &IntegrationJob) -> Result<IntegrationJob, JobError> {
        let mut stored = self.get_run(work.id()).await?;
        if stored.status() != RunStatus::Cancelled {
            return Err(JobError::Conflict(format!(
                "integration run {} changed to {} while executing",
                work.id(),
                stored.status()
            )));
        }

        stored.absorb_cancelled_work(work);
        match self.runs.update_if(&stored, RunStatus::Cancelled).await {
            Ok(stored) => {
                info!(
                    run_id = %stored.id(),
                    stored = stored.counters().success(),
                    "Integration run stopped by cancel"
                );
                Ok(stored)
            }
            Err(e) => {
                warn!(run_id = %stored.id(), error = %e, "Could not record work of cancelled run");
                Ok(stored)
            }
        }
    }

    /// Harvests the integration's source and appends its rows to the
    /// dataset, checking for a cancel before each row. Counters are kept on
    /// `run` however the harvest ends.
    async fn harvest_into_dataset(
        &self,
        integration: &DataIntegration,
        run: &mut IntegrationJob,
    ) -> Result<RunResult, RunStop> {
        let dataset_id = integration.dataset_id();
        match self.datasets.dataset_exists(dataset_id).await {
            Ok(true) => {}
            Ok(false) => return Err(format!("dataset {dataset_id} not found").into()),
            Err(e) => return Err(e.to_string().into()),
        }

        let spec = integration.harvest_config().clone();
        run.log(format!("Harvesting from {} source", spec.source_type));
        let data = self.dispatch(spec.source_type, spec.config).await?;
        run.log(format!(
            "Harvested {} records with {} columns from {}",
            data.row_count(),
            data.column_count(),
            data.source_identifier
        ));

        let mapping = integration
            .processing_config()
            .map(|p| &p.column_mapping)
            .filter(|m| !m.is_empty());
        let mut counters = RecordCounters::default();
        for (index, row) in data.rows.iter().enumerate() {
            match self.is_cancelled(run.id()).await {
                Ok(false) => {}
                Ok(true) => {
                    run.set_counters(counters);
                    run.log(format!(
                        "Cancel received, stopped after {} of {} records",
                        counters.processed(),
                        data.row_count()
                    ));
                    return Err(RunStop::Cancelled);
                }
                Err(e) => {
                    run.set_counters(counters);
                    return Err(format!("could not check run status: {e}").into());
                }
            }

            let row = match mapping {
                Some(mapping) => map_columns(row, mapping),
                None => row.clone(),
            };
            match self.datasets.append_row(dataset_id, &row).await {
                Ok(()) => counters.record_success(),
                Err(e) => {
                    counters.record_failure();
                    if (counters.failed() as usize) <= MAX_LOGGED_ROW_ERRORS {
                        run.log(format!("Record {index} rejected: {e}"));
                    }
                }
            }
        }
        run.set_counters(counters);
        run.log(format!(
            "Stored {} of {} records in dataset {dataset_id}",
            counters.success(),
            counters.processed()
        ));

        self.policy.evaluate(&counters)?;
        Ok(RunResult {
            source_type: data.source_type,
            source_identifier: data.source_identifier.clone(),
            records_harvested: data.row_count(),
            columns: data.columns.clone(),
            dataset_id: dataset_id.to_string(),
            rows_stored: counters.success(),
            rows_failed: counters.failed(),
        })
    }

    /// Runs the harvester on its own task so a panicking variant ends the
    /// run instead of the caller.
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

/// Why a run's harvest stopped short of a [`RunResult`].
#[derive(Debug)]
enum RunStop {
    Failed(String),
    Cancelled,
}

impl From<String> for RunStop {
    fn from(message: String) -> Self {
        RunStop::Failed(message)
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), JobError> {
    if value.trim().is_empty() {
        Err(JobError::InvalidInput(format!("{field} must not be empty")))
    } else {
        Ok(())
    }
}

/// Renames mapped keys; unmapped keys pass through in their original order.
fn map_columns(row: &Row, mapping: &HashMap<String, String>) -> Row {
    row.iter()
        .map(|(key, value)| {
            let key = mapping.get(key).unwrap_or(key).clone();
            (key, value.clone())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::{HarvestError, Harvester};
    use crate::integration::model::{HarvestSpec, IntegrationStatus, ProcessingConfig};
    use crate::memory::{
        InMemoryIntegrationJobRepository, InMemoryIntegrationRepository, MemoryDatasetStore,
    };
    use crate::model::{ColumnType, DataColumn};
    use crate::traits::DatasetError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;

    struct RowsHarvester(Vec<Row>);

    #[async_trait]
    impl Harvester for RowsHarvester {
        fn source_type(&self) -> SourceType {
            SourceType::Api
        }

        async fn harvest(&self, _config: &ConfigMap) -> Result<HarvestedData, HarvestError> {
            Ok(HarvestedData::new(
                SourceType::Api,
                "https://example.com/items",
                self.0.clone(),
                vec![
                    DataColumn::new("Name", ColumnType::String),
                    DataColumn::new("price", ColumnType::Number),
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
            Err(HarvestError::ExternalSource("connection refused".into()))
        }
    }

    /// Rejects rows whose `price` is negative.
    struct PickyStore;

    #[async_trait]
    impl DatasetStore for PickyStore {
        async fn dataset_exists(&self, _dataset_id: &str) -> Result<bool, DatasetError> {
            Ok(true)
        }

        async fn append_row(&self, _dataset_id: &str, row: &Row) -> Result<(), DatasetError> {
            match row.get("price").and_then(|v| v.as_f64()) {
                Some(p) if p < 0.0 => Err(DatasetError::Rejected("negative price".into())),
                _ => Ok(()),
            }
        }
    }

    /// Signals `entered` when a harvest starts, then waits for `release`.
    struct GatedHarvester {
        rows: Vec<Row>,
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl Harvester for GatedHarvester {
        fn source_type(&self) -> SourceType {
            SourceType::Api
        }

        async fn harvest(&self, _config: &ConfigMap) -> Result<HarvestedData, HarvestError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(HarvestedData::new(
                SourceType::Api,
                "https://example.com/items",
                self.rows.clone(),
                vec![],
            ))
        }
    }

    /// Blocks inside the first `append_row` until released.
    struct GatedStore {
        inner: MemoryDatasetStore,
        gate_armed: AtomicBool,
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl DatasetStore for GatedStore {
        async fn dataset_exists(&self, dataset_id: &str) -> Result<bool, DatasetError> {
            self.inner.dataset_exists(dataset_id).await
        }

        async fn append_row(&self, dataset_id: &str, row: &Row) -> Result<(), DatasetError> {
            if self.gate_armed.swap(false, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.append_row(dataset_id, row).await
        }
    }

    /// Run repository whose lookups start failing once `broken` is set.
    struct FlakyRuns {
        inner: InMemoryIntegrationJobRepository,
        broken: Arc<AtomicBool>,
    }

    #[async_trait]
    impl IntegrationJobRepository for FlakyRuns {
        async fn save(&self, run: &IntegrationJob) -> Result<IntegrationJob, RepositoryError> {
            self.inner.save(run).await
        }

        async fn find_by_id(&self, id: &str) -> Result<Option<IntegrationJob>, RepositoryError> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(RepositoryError::Backend("connection reset".into()));
            }
            self.inner.find_by_id(id).await
        }

        async fn find_by_integration(
            &self,
            integration_id: &str,
        ) -> Result<Vec<IntegrationJob>, RepositoryError> {
            self.inner.find_by_integration(integration_id).await
        }

        async fn update_if(
            &self,
            run: &IntegrationJob,
            expected: RunStatus,
        ) -> Result<IntegrationJob, RepositoryError> {
            self.inner.update_if(run, expected).await
        }
    }

    /// Breaks the shared flag while harvesting.
    struct BreakingHarvester(Arc<AtomicBool>);

    #[async_trait]
    impl Harvester for BreakingHarvester {
        fn source_type(&self) -> SourceType {
            SourceType::Api
        }

        async fn harvest(&self, _config: &ConfigMap) -> Result<HarvestedData, HarvestError> {
            self.0.store(true, Ordering::SeqCst);
            Ok(HarvestedData::new(
                SourceType::Api,
                "https://example.com/items",
                vec![row("a", 1.0)],
                vec![],
            ))
        }
    }

    fn gated_harvester(rows: Vec<Row>) -> (Arc<GatedHarvester>, Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let harvester = Arc::new(GatedHarvester {
            rows,
            entered: entered.clone(),
            release: release.clone(),
        });
        (harvester, entered, release)
    }

    fn spawn_run(
        service: &Arc<IntegrationService>,
        integration_id: &str,
    ) -> tokio::task::JoinHandle<Result<IntegrationJob, JobError>> {
        let service = Arc::clone(service);
        let integration_id = integration_id.to_string();
        tokio::spawn(async move { service.run_integration(&integration_id).await })
    }

    fn row(name: &str, price: f64) -> Row {
        json!({"Name": name, "price": price})
            .as_object()
            .cloned()
            .unwrap()
    }

    fn new_integration() -> NewIntegration {
        NewIntegration {
            name: "items".into(),
            description: String::new(),
            dataset_id: "ds-1".into(),
            harvest_config: HarvestSpec::new(SourceType::Api, ConfigMap::new()),
            processing_config: None,
            is_active: true,
        }
    }

    fn service_with(
        harvester: Arc<dyn Harvester>,
        datasets: Arc<dyn DatasetStore>,
    ) -> IntegrationService {
        IntegrationService::new(
            Arc::new(InMemoryIntegrationRepository::new()),
            Arc::new(InMemoryIntegrationJobRepository::new()),
            Arc::new(HarvesterRegistry::new().with(harvester)),
            datasets,
        )
    }

    async fn memory_store() -> Arc<MemoryDatasetStore> {
        let store = Arc::new(MemoryDatasetStore::new());
        store.create_dataset("ds-1").await;
        store
    }

    #[tokio::test]
    async fn test_fetch_error_fails_run_and_marks_integration_error() {
        let service = service_with(Arc::new(FailingHarvester), memory_store().await);
        let integration = service
            .create_integration(new_integration(), Some("admin".into()))
            .await
            .unwrap();

        let run = service.run_integration(integration.id()).await.unwrap();

        assert_eq!(run.status(), RunStatus::Failed);
        assert!(run.error_message().unwrap().contains("connection refused"));
        assert_eq!(
            run.logs().iter().filter(|l| l.contains("FAILED")).count(),
            1
        );
        assert!(run.completed_at().is_some());

        let integration = service.get_integration(integration.id()).await.unwrap();
        assert_eq!(integration.status(), IntegrationStatus::Error);
        assert!(integration.last_run().is_some());
    }

    #[tokio::test]
    async fn test_successful_run_stores_mapped_rows() {
        let store = memory_store().await;
        let service = service_with(
            Arc::new(RowsHarvester(vec![row("a", 1.0), row("b", 2.0)])),
            store.clone(),
        );
        let mut new = new_integration();
        new.processing_config = Some(ProcessingConfig {
            column_mapping: HashMap::from([("Name".to_string(), "name".to_string())]),
            ..Default::default()
        });
        let integration = service.create_integration(new, None).await.unwrap();

        let run = service.run_integration(integration.id()).await.unwrap();

        assert_eq!(run.status(), RunStatus::Completed);
        assert_eq!(run.counters().success(), 2);
        assert_eq!(run.result().unwrap().records_harvested, 2);
        let rows = store.rows("ds-1").await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], json!("a"));
        assert!(!rows[0].contains_key("Name"));

        let integration = service.get_integration(integration.id()).await.unwrap();
        assert_eq!(integration.status(), IntegrationStatus::Active);
        assert_eq!(integration.last_run(), run.completed_at());
    }

    #[tokio::test]
    async fn test_partial_success_completes_by_default() {
        let service = service_with(
            Arc::new(RowsHarvester(vec![row("a", 1.0), row("b", -1.0)])),
            Arc::new(PickyStore),
        );
        let integration = service
            .create_integration(new_integration(), None)
            .await
            .unwrap();

        let run = service.run_integration(integration.id()).await.unwrap();

        let counters = run.counters();
        assert_eq!(run.status(), RunStatus::Completed);
        assert_eq!((counters.processed(), counters.success(), counters.failed()), (2, 1, 1));
        assert!(counters.success() + counters.failed() <= counters.processed());
    }

    #[tokio::test]
    async fn test_failure_ratio_threshold_fails_run() {
        let service = service_with(
            Arc::new(RowsHarvester(vec![row("a", 1.0), row("b", -1.0)])),
            Arc::new(PickyStore),
        )
        .with_policy(RunPolicy {
            max_failure_ratio: Some(0.25),
        });
        let integration = service
            .create_integration(new_integration(), None)
            .await
            .unwrap();

        let run = service.run_integration(integration.id()).await.unwrap();
        assert_eq!(run.status(), RunStatus::Failed);
        assert!(run.error_message().unwrap().contains("failure ratio"));
    }

    #[tokio::test]
    async fn test_all_rows_rejected_fails_run() {
        let service = service_with(
            Arc::new(RowsHarvester(vec![row("a", -1.0), row("b", -2.0)])),
            Arc::new(PickyStore),
        );
        let integration = service
            .create_integration(new_integration(), None)
            .await
            .unwrap();

        let run = service.run_integration(integration.id()).await.unwrap();
        assert_eq!(run.status(), RunStatus::Failed);
        assert_eq!(run.counters().failed(), 2);
    }

    #[tokio::test]
    async fn test_empty_harvest_fails_run() {
        let service = service_with(Arc::new(RowsHarvester(vec![])), memory_store().await);
        let integration = service
            .create_integration(new_integration(), None)
            .await
            .unwrap();

        let run = service.run_integration(integration.id()).await.unwrap();
        assert_eq!(run.status(), RunStatus::Failed);
        assert_eq!(run.error_message(), Some("harvest returned no records"));
    }

    #[tokio::test]
    async fn test_missing_dataset_fails_run() {
        let service = service_with(
            Arc::new(RowsHarvester(vec![row("a", 1.0)])),
            Arc::new(MemoryDatasetStore::new()),
        );
        let integration = service
            .create_integration(new_integration(), None)
            .await
            .unwrap();

        let run = service.run_integration(integration.id()).await.unwrap();
        assert_eq!(run.status(), RunStatus::Failed);
        assert!(run.error_message().unwrap().contains("ds-1"));
    }

    #[tokio::test]
    async fn test_inactive_integration_cannot_run() {
        let service = service_with(Arc::new(FailingHarvester), memory_store().await);
        let mut new = new_integration();
        new.is_active = false;
        let integration = service.create_integration(new, None).await.unwrap();

        let err = service.start_run(integration.id()).await.unwrap_err();
        assert!(matches!(err, JobError::Conflict(_)));
        assert!(service.list_runs(integration.id()).await.unwrap().is_empty());

        service.activate(integration.id()).await.unwrap();
        assert!(service.start_run(integration.id()).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_pending_run_is_not_executed() {
        let store = memory_store().await;
        let service = service_with(Arc::new(RowsHarvester(vec![row("a", 1.0)])), store.clone());
        let integration = service
            .create_integration(new_integration(), None)
            .await
            .unwrap();

        let run = service.start_run(integration.id()).await.unwrap();
        let cancelled = service.cancel_run(run.id()).await.unwrap();
        assert_eq!(cancelled.status(), RunStatus::Cancelled);
        assert!(cancelled.duration().is_none());

        let err = service.execute_run(run.id()).await.unwrap_err();
        assert!(matches!(err, JobError::Conflict(_)));
        assert!(store.rows("ds-1").await.is_empty());
        assert!(service.cancel_run(run.id()).await.is_err());
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input() {
        let service = service_with(Arc::new(FailingHarvester), memory_store().await);

        let mut blank = new_integration();
        blank.name = "  ".into();
        assert!(matches!(
            service.create_integration(blank, None).await,
            Err(JobError::InvalidInput(_))
        ));

        let mut web = new_integration();
        web.harvest_config = HarvestSpec::new(SourceType::Web, ConfigMap::new());
        assert!(matches!(
            service.create_integration(web, None).await,
            Err(JobError::InvalidInput(_))
        ));
        assert!(service.list_integrations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_and_delete_integration() {
        let service = service_with(Arc::new(FailingHarvester), memory_store().await);
        let integration = service
            .create_integration(new_integration(), None)
            .await
            .unwrap();

        let updated = service
            .update_integration(
                integration.id(),
                IntegrationUpdate {
                    description: Some("nightly".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.description(), "nightly");

        let run = service.run_integration(integration.id()).await.unwrap();
        service.delete_integration(integration.id()).await.unwrap();
        assert!(matches!(
            service.get_integration(integration.id()).await,
            Err(JobError::NotFound(_))
        ));
        assert_eq!(service.list_runs(integration.id()).await.unwrap().len(), 1);
        assert!(service.get_run(run.id()).await.is_ok());
    }

    #[tokio::test]
    async fn test_admin_changes_during_run_are_kept() {
        let (harvester, entered, release) = gated_harvester(vec![row("a", 1.0)]);
        let service = Arc::new(service_with(harvester, memory_store().await));
        let integration = service
            .create_integration(new_integration(), None)
            .await
            .unwrap();
        let id = integration.id();

        let task = spawn_run(&service, id);
        entered.notified().await;
        service.deactivate(id).await.unwrap();
        service
            .update_integration(
                id,
                IntegrationUpdate {
                    name: Some("renamed".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        release.notify_one();

        let run = task.await.unwrap().unwrap();
        assert_eq!(run.status(), RunStatus::Completed);

        let integration = service.get_integration(id).await.unwrap();
        assert_eq!(integration.status(), IntegrationStatus::Inactive);
        assert_eq!(integration.name(), "renamed");
        assert_eq!(integration.last_run(), run.completed_at());
    }

    #[tokio::test]
    async fn test_cancel_during_harvest_stores_nothing() {
        let (harvester, entered, release) = gated_harvester(vec![row("a", 1.0), row("b", 2.0)]);
        let store = memory_store().await;
        let service = Arc::new(service_with(harvester, store.clone()));
        let integration = service
            .create_integration(new_integration(), None)
            .await
            .unwrap();

        let task = spawn_run(&service, integration.id());
        entered.notified().await;
        let running = service.list_runs(integration.id()).await.unwrap().remove(0);
        assert_eq!(running.status(), RunStatus::Running);
        service.cancel_run(running.id()).await.unwrap();
        release.notify_one();

        let run = task.await.unwrap().unwrap();
        assert_eq!(run.status(), RunStatus::Cancelled);
        assert!(store.rows("ds-1").await.is_empty());
        assert_eq!(run.counters().processed(), 0);
        assert!(run.logs().iter().any(|l| l.contains("Harvested 2 records")));
        assert!(run.logs().last().unwrap().ends_with("Run CANCELLED"));
        assert_eq!(service.get_run(run.id()).await.unwrap(), run);

        let integration = service.get_integration(integration.id()).await.unwrap();
        assert_eq!(integration.status(), IntegrationStatus::Active);
        assert!(integration.last_run().is_none());
    }

    #[tokio::test]
    async fn test_cancel_during_store_stops_remaining_rows() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let inner = MemoryDatasetStore::new();
        inner.create_dataset("ds-1").await;
        let store = Arc::new(GatedStore {
            inner,
            gate_armed: AtomicBool::new(true),
            entered: entered.clone(),
            release: release.clone(),
        });
        let service = Arc::new(service_with(
            Arc::new(RowsHarvester(vec![row("a", 1.0), row("b", 2.0), row("c", 3.0)])),
            store.clone(),
        ));
        let integration = service
            .create_integration(new_integration(), None)
            .await
            .unwrap();

        let task = spawn_run(&service, integration.id());
        entered.notified().await;
        let running = service.list_runs(integration.id()).await.unwrap().remove(0);
        service.cancel_run(running.id()).await.unwrap();
        release.notify_one();

        let run = task.await.unwrap().unwrap();
        assert_eq!(run.status(), RunStatus::Cancelled);

        // Only the row already being written when the cancel landed is stored.
        let stored = store.inner.rows("ds-1").await;
        assert_eq!(stored.len(), 1);
        assert_eq!(run.counters().processed(), stored.len() as u64);
        assert_eq!(run.counters().success(), 1);
        assert!(run
            .logs()
            .iter()
            .any(|l| l.contains("stopped after 1 of 3 records")));
        assert_eq!(
            run.logs().iter().filter(|l| l.contains("CANCELLED")).count(),
            1
        );
        assert!(run.result().is_none());
    }

    #[tokio::test]
    async fn test_integration_deleted_during_run_still_returns_run() {
        let (harvester, entered, release) = gated_harvester(vec![row("a", 1.0)]);
        let store = memory_store().await;
        let service = Arc::new(service_with(harvester, store.clone()));
        let integration = service
            .create_integration(new_integration(), None)
            .await
            .unwrap();

        let task = spawn_run(&service, integration.id());
        entered.notified().await;
        service.delete_integration(integration.id()).await.unwrap();
        release.notify_one();

        let run = task.await.unwrap().unwrap();
        assert_eq!(run.status(), RunStatus::Completed);
        assert_eq!(store.rows("ds-1").await.len(), 1);
        assert_eq!(service.list_runs(integration.id()).await.unwrap(), vec![run]);
    }

    #[tokio::test]
    async fn test_status_check_failure_fails_run() {
        let broken = Arc::new(AtomicBool::new(false));
        let store = memory_store().await;
        let service = IntegrationService::new(
            Arc::new(InMemoryIntegrationRepository::new()),
            Arc::new(FlakyRuns {
                inner: InMemoryIntegrationJobRepository::new(),
                broken: broken.clone(),
            }),
            Arc::new(HarvesterRegistry::new().with(Arc::new(BreakingHarvester(broken.clone())))),
            store.clone(),
        );
        let integration = service
            .create_integration(new_integration(), None)
            .await
            .unwrap();

        let run = service.run_integration(integration.id()).await.unwrap();
        assert_eq!(run.status(), RunStatus::Failed);
        assert!(run
            .error_message()
            .unwrap()
            .contains("could not check run status"));
        assert!(store.rows("ds-1").await.is_empty());

        let integration = service.get_integration(integration.id()).await.unwrap();
        assert_eq!(integration.status(), IntegrationStatus::Error);
    }

    #[test]
    fn test_map_columns_keeps_order_and_unmapped_keys() {
        let mapping = HashMap::from([("price".to_string(), "cost".to_string())]);
        let mapped = map_columns(&row("a", 1.0), &mapping);
        let keys: Vec<_> = mapped.keys().cloned().collect();
        assert_eq!(keys, vec!["Name", "cost"]);
    }
}
