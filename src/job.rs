//! One-shot harvest job and its status machine.
//!
//! ```text
//! PENDING --start--> PROCESSING --complete--> COMPLETED
//!                               \--fail-----> FAILED
//! ```
//!
//! Terminal states accept no further events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::model::{ConfigMap, JobResult, SourceType};
use crate::traits::TransitionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    Start,
    Complete,
    Fail,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// The single transition function; every other combination is rejected.
    pub fn transition(self, event: JobEvent) -> Result<JobStatus, TransitionError> {
        match (self, event) {
            (JobStatus::Pending, JobEvent::Start) => Ok(JobStatus::Processing),
            (JobStatus::Processing, JobEvent::Complete) => Ok(JobStatus::Completed),
            (JobStatus::Processing, JobEvent::Fail) => Ok(JobStatus::Failed),
            (from, event) => Err(TransitionError::new("harvest job", from, event.as_str())),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl JobEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobEvent::Start => "start",
            JobEvent::Complete => "complete",
            JobEvent::Fail => "fail",
        }
    }
}

/// A tracked unit of harvest work.
///
/// Fields are read-only from the outside; state only moves through
/// [`start_processing`](Self::start_processing), [`complete`](Self::complete)
/// and [`fail`](Self::fail). `result` is set only when COMPLETED and `error`
/// only when FAILED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestJob {
    job_id: String,
    source_type: SourceType,
    config: ConfigMap,
    status: JobStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    result: Option<JobResult>,
    error: Option<String>,
}

impl HarvestJob {
    /// New PENDING job; a v4 UUID is generated when `job_id` is `None`.
    pub fn new(source_type: SourceType, config: ConfigMap, job_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            source_type,
            config,
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
            result: None,
            error: None,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn source_type(&self) -> SourceType {
        self.source_type
    }

    pub fn config(&self) -> &ConfigMap {
        &self.config
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn result(&self) -> Option<&JobResult> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn start_processing(&mut self) -> Result<(), TransitionError> {
        self.apply(JobEvent::Start)
    }

    pub fn complete(&mut self, result: JobResult) -> Result<(), TransitionError> {
        self.apply(JobEvent::Complete)?;
        self.result = Some(result);
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        self.apply(JobEvent::Fail)?;
        self.error = Some(error.into());
        Ok(())
    }

    fn apply(&mut self, event: JobEvent) -> Result<(), TransitionError> {
        self.status = self.status.transition(event)?;
        self.updated_at = Utc::now();
        Ok(())
    }
}
