//! In-memory repositories and dataset store for testing and development.
//!
//! Everything is lost on drop. Entities are cloned on the way in and on the
//! way out, so callers never hold a reference into stored state.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::integration::{DataIntegration, IntegrationJob, RunStatus};
use crate::job::{HarvestJob, JobStatus};
use crate::model::Row;
use crate::traits::{
    DatasetError, DatasetStore, IntegrationChange, IntegrationJobRepository,
    IntegrationRepository, JobRepository, RepositoryError,
};

/// Id-keyed map shared by the repositories below. Each write holds the lock
/// for the whole check-and-set, which serializes updates per id.
struct Table<T> {
    kind: &'static str,
    rows: RwLock<HashMap<String, T>>,
}

impl<T: Clone> Table<T> {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            rows: RwLock::new(HashMap::new()),
        }
    }

    fn missing(&self, id: &str) -> RepositoryError {
        RepositoryError::NotFound(format!("{} {id}", self.kind))
    }

    async fn insert(&self, id: &str, entity: &T) -> Result<T, RepositoryError> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(id) {
            return Err(RepositoryError::AlreadyExists(format!("{} {id}", self.kind)));
        }
        rows.insert(id.to_string(), entity.clone());
        Ok(entity.clone())
    }

    async fn get(&self, id: &str) -> Option<T> {
        self.rows.read().await.get(id).cloned()
    }

    async fn filtered(&self, keep: impl Fn(&T) -> bool) -> Vec<T> {
        self.rows
            .read()
            .await
            .values()
            .filter(|e| keep(*e))
            .cloned()
            .collect()
    }

    /// Overwrites `id` when `guard` accepts the stored entity.
    async fn replace(
        &self,
        id: &str,
        entity: &T,
        guard: impl Fn(&T) -> Result<(), RepositoryError>,
    ) -> Result<T, RepositoryError> {
        let mut rows = self.rows.write().await;
        let stored = rows.get_mut(id).ok_or_else(|| self.missing(id))?;
        guard(stored)?;
        *stored = entity.clone();
        Ok(entity.clone())
    }

    async fn modify(&self, id: &str, change: impl FnOnce(&mut T)) -> Result<T, RepositoryError> {
        let mut rows = self.rows.write().await;
        let stored = rows.get_mut(id).ok_or_else(|| self.missing(id))?;
        change(stored);
        Ok(stored.clone())
    }

    async fn remove(&self, id: &str) -> Result<(), RepositoryError> {
        self.rows
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| self.missing(id))
    }

    async fn len(&self) -> usize {
        self.rows.read().await.len()
    }
}

fn stale(id: &str, expected: impl ToString, actual: impl ToString) -> RepositoryError {
    RepositoryError::StaleState {
        id: id.to_string(),
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

// ============================================================================
// Jobs
// ============================================================================

pub struct InMemoryJobRepository {
    jobs: Table<HarvestJob>,
}

impl Default for InMemoryJobRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self {
            jobs: Table::new("job"),
        }
    }

    pub async fn len(&self) -> usize {
        self.jobs.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn save(&self, job: &HarvestJob) -> Result<HarvestJob, RepositoryError> {
        self.jobs.insert(job.job_id(), job).await
    }

    async fn find_by_id(&self, job_id: &str) -> Result<Option<HarvestJob>, RepositoryError> {
        Ok(self.jobs.get(job_id).await)
    }

    async fn find_all(&self) -> Result<Vec<HarvestJob>, RepositoryError> {
        let mut jobs = self.jobs.filtered(|_| true).await;
        jobs.sort_by_key(|j| j.created_at());
        Ok(jobs)
    }

    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<HarvestJob>, RepositoryError> {
        let mut jobs = self.jobs.filtered(|j| j.status() == status).await;
        jobs.sort_by_key(|j| j.created_at());
        Ok(jobs)
    }

    async fn update(&self, job: &HarvestJob) -> Result<HarvestJob, RepositoryError> {
        self.jobs.replace(job.job_id(), job, |_| Ok(())).await
    }

    async fn update_if(
        &self,
        job: &HarvestJob,
        expected: JobStatus,
    ) -> Result<HarvestJob, RepositoryError> {
        self.jobs
            .replace(job.job_id(), job, |stored| {
                if stored.status() == expected {
                    Ok(())
                } else {
                    Err(stale(job.job_id(), expected, stored.status()))
                }
            })
            .await
    }

    async fn delete(&self, job_id: &str) -> Result<(), RepositoryError> {
        self.jobs.remove(job_id).await
    }
}

// ============================================================================
// Integrations
// ============================================================================

pub struct InMemoryIntegrationRepository {
    integrations: Table<DataIntegration>,
}

impl Default for InMemoryIntegrationRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryIntegrationRepository {
    pub fn new() -> Self {
        Self {
            integrations: Table::new("integration"),
        }
    }
}

#[async_trait]
impl IntegrationRepository for InMemoryIntegrationRepository {
    async fn save(&self, integration: &DataIntegration) -> Result<DataIntegration, RepositoryError> {
        self.integrations.insert(integration.id(), integration).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<DataIntegration>, RepositoryError> {
        Ok(self.integrations.get(id).await)
    }

    async fn find_all(&self) -> Result<Vec<DataIntegration>, RepositoryError> {
        let mut integrations = self.integrations.filtered(|_| true).await;
        integrations.sort_by_key(|i| i.created_at());
        Ok(integrations)
    }

    async fn modify(
        &self,
        id: &str,
        change: IntegrationChange,
    ) -> Result<DataIntegration, RepositoryError> {
        self.integrations.modify(id, change).await
    }

    async fn delete(&self, id: &str) -> Result<(), RepositoryError> {
        self.integrations.remove(id).await
    }
}

pub struct InMemoryIntegrationJobRepository {
    runs: Table<IntegrationJob>,
}

impl Default for InMemoryIntegrationJobRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryIntegrationJobRepository {
    pub fn new() -> Self {
        Self {
            runs: Table::new("integration run"),
        }
    }
}

#[async_trait]
impl IntegrationJobRepository for InMemoryIntegrationJobRepository {
    async fn save(&self, run: &IntegrationJob) -> Result<IntegrationJob, RepositoryError> {
        self.runs.insert(run.id(), run).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<IntegrationJob>, RepositoryError> {
        Ok(self.runs.get(id).await)
    }

    async fn find_by_integration(
        &self,
        integration_id: &str,
    ) -> Result<Vec<IntegrationJob>, RepositoryError> {
        let mut runs = self
            .runs
            .filtered(|r| r.integration_id() == integration_id)
            .await;
        runs.sort_by_key(|r| r.created_at());
        Ok(runs)
    }

    async fn update_if(
        &self,
        run: &IntegrationJob,
        expected: RunStatus,
    ) -> Result<IntegrationJob, RepositoryError> {
        self.runs
            .replace(run.id(), run, |stored| {
                if stored.status() == expected {
                    Ok(())
                } else {
                    Err(stale(run.id(), expected, stored.status()))
                }
            })
            .await
    }
}

// ============================================================================
// Datasets
// ============================================================================

/// Dataset store keeping appended rows per dataset id. Datasets must be
/// created before rows can be appended.
#[derive(Default)]
pub struct MemoryDatasetStore {
    datasets: RwLock<HashMap<String, Vec<Row>>>,
}

impl MemoryDatasetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create_dataset(&self, dataset_id: impl Into<String>) {
        self.datasets
            .write()
            .await
            .entry(dataset_id.into())
            .or_default();
    }

    /// Copy of the rows appended so far; empty for unknown datasets.
    pub async fn rows(&self, dataset_id: &str) -> Vec<Row> {
        self.datasets
            .read()
            .await
            .get(dataset_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl DatasetStore for MemoryDatasetStore {
    async fn dataset_exists(&self, dataset_id: &str) -> Result<bool, DatasetError> {
        Ok(self.datasets.read().await.contains_key(dataset_id))
    }

    async fn append_row(&self, dataset_id: &str, row: &Row) -> Result<(), DatasetError> {
        self.datasets
            .write()
            .await
            .get_mut(dataset_id)
            .ok_or_else(|| DatasetError::NotFound(dataset_id.to_string()))?
            .push(row.clone());
        Ok(())
    }
}
