//! Collaborator contracts (persistence, notification, dataset store) and the
//! error types that cross them.

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

use crate::integration::{DataIntegration, IntegrationJob, RunStatus};
use crate::job::{HarvestJob, JobStatus};
use crate::model::{JobResult, Row};

// ============================================================================
// Errors
// ============================================================================

/// An event was applied to an entity in a state that does not accept it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot {event} {entity} in state {from}")]
pub struct TransitionError {
    pub entity: &'static str,
    pub from: String,
    pub event: String,
}

impl TransitionError {
    pub fn new(entity: &'static str, from: impl fmt::Display, event: impl Into<String>) -> Self {
        Self {
            entity,
            from: from.to_string(),
            event: event.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    /// Conditional update lost a race: the stored entity moved on
    #[error("{id} is {actual}, expected {expected}")]
    StaleState {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("repository backend error: {0}")]
    Backend(String),
}

#[derive(Error, Debug)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DatasetError {
    #[error("dataset {0} not found")]
    NotFound(String),

    #[error("row rejected: {0}")]
    Rejected(String),

    #[error("dataset store unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced to callers of the services and use cases.
///
/// Failures that happen while a job is being harvested never show up here;
/// they are recorded on the job itself.
#[derive(Error, Debug)]
pub enum JobError {
    /// Malformed request, rejected before any state was created
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Entity is not in a state that allows the requested operation
    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Repository(RepositoryError),

    /// A spawned processing task could not be joined
    #[error("execution error: {0}")]
    Execution(String),
}

impl From<RepositoryError> for JobError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => JobError::NotFound(what),
            e @ (RepositoryError::AlreadyExists(_) | RepositoryError::StaleState { .. }) => {
                JobError::Conflict(e.to_string())
            }
            e @ RepositoryError::Backend(_) => JobError::Repository(e),
        }
    }
}

impl From<TransitionError> for JobError {
    fn from(err: TransitionError) -> Self {
        JobError::Conflict(err.to_string())
    }
}

// ============================================================================
// Repositories
// ============================================================================

/// Persistence for [`HarvestJob`]s.
///
/// Implementations hand out copies: mutating a returned job never changes
/// stored state until it is written back. Updates to a single job id are
/// serialized by the implementation.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Inserts a new job. Fails with `AlreadyExists` on a duplicate id.
    async fn save(&self, job: &HarvestJob) -> Result<HarvestJob, RepositoryError>;

    async fn find_by_id(&self, job_id: &str) -> Result<Option<HarvestJob>, RepositoryError>;

    /// All jobs, oldest first.
    async fn find_all(&self) -> Result<Vec<HarvestJob>, RepositoryError>;

    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<HarvestJob>, RepositoryError>;

    /// Unconditional overwrite of an existing job.
    async fn update(&self, job: &HarvestJob) -> Result<HarvestJob, RepositoryError>;

    /// Overwrites the stored job only if it is still in `expected` status;
    /// otherwise fails with [`RepositoryError::StaleState`].
    async fn update_if(
        &self,
        job: &HarvestJob,
        expected: JobStatus,
    ) -> Result<HarvestJob, RepositoryError>;

    async fn delete(&self, job_id: &str) -> Result<(), RepositoryError>;
}

/// In-place edit of one stored integration.
pub type IntegrationChange = Box<dyn FnOnce(&mut DataIntegration) + Send>;

#[async_trait]
pub trait IntegrationRepository: Send + Sync {
    async fn save(&self, integration: &DataIntegration) -> Result<DataIntegration, RepositoryError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<DataIntegration>, RepositoryError>;

    async fn find_all(&self) -> Result<Vec<DataIntegration>, RepositoryError>;

    /// Applies `change` to the stored integration and returns the result.
    /// Read and write happen under the same per-id serialization, so
    /// concurrent changes to different fields are all kept.
    async fn modify(
        &self,
        id: &str,
        change: IntegrationChange,
    ) -> Result<DataIntegration, RepositoryError>;

    async fn delete(&self, id: &str) -> Result<(), RepositoryError>;
}

/// Run history for integrations. Same copy and per-id serialization
/// contract as [`JobRepository`].
#[async_trait]
pub trait IntegrationJobRepository: Send + Sync {
    async fn save(&self, run: &IntegrationJob) -> Result<IntegrationJob, RepositoryError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<IntegrationJob>, RepositoryError>;

    /// Runs of one integration, oldest first.
    async fn find_by_integration(
        &self,
        integration_id: &str,
    ) -> Result<Vec<IntegrationJob>, RepositoryError>;

    async fn update_if(
        &self,
        run: &IntegrationJob,
        expected: RunStatus,
    ) -> Result<IntegrationJob, RepositoryError>;
}

// ============================================================================
// Side channels
// ============================================================================

/// Best-effort observer of job lifecycle events.
///
/// Errors are logged by the caller and never affect the job.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn job_created(&self, job: &HarvestJob) -> Result<(), NotifyError>;

    async fn job_started(&self, job: &HarvestJob) -> Result<(), NotifyError>;

    async fn job_completed(&self, job: &HarvestJob, result: &JobResult) -> Result<(), NotifyError>;

    async fn job_failed(&self, job: &HarvestJob, error: &str) -> Result<(), NotifyError>;
}

/// Destination dataset store for integration runs. The store owns
/// persistence; runs only hand it rows one at a time.
#[async_trait]
pub trait DatasetStore: Send + Sync {
    async fn dataset_exists(&self, dataset_id: &str) -> Result<bool, DatasetError>;

    async fn append_row(&self, dataset_id: &str, row: &Row) -> Result<(), DatasetError>;
}
