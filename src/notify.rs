//! Notification sinks for job lifecycle events.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::job::HarvestJob;
use crate::model::{JobResult, SourceType};
use crate::traits::{NotificationSink, NotifyError};

/// Reports lifecycle events to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl NotificationSink for TracingNotifier {
    async fn job_created(&self, job: &HarvestJob) -> Result<(), NotifyError> {
        info!(job_id = %job.job_id(), source_type = %job.source_type(), "Job created");
        Ok(())
    }

    async fn job_started(&self, job: &HarvestJob) -> Result<(), NotifyError> {
        info!(job_id = %job.job_id(), "Job started");
        Ok(())
    }

    async fn job_completed(&self, job: &HarvestJob, result: &JobResult) -> Result<(), NotifyError> {
        info!(
            job_id = %job.job_id(),
            rows = result.row_count,
            columns = result.column_count,
            "Job completed"
        );
        Ok(())
    }

    async fn job_failed(&self, job: &HarvestJob, error: &str) -> Result<(), NotifyError> {
        error!(job_id = %job.job_id(), error, "Job failed");
        Ok(())
    }
}

/// Event published by [`BroadcastNotifier`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobNotification {
    Created {
        job_id: String,
        source_type: SourceType,
    },
    Started {
        job_id: String,
    },
    Completed {
        job_id: String,
        row_count: usize,
        column_count: usize,
    },
    Failed {
        job_id: String,
        error: String,
    },
}

impl JobNotification {
    pub fn job_id(&self) -> &str {
        match self {
            JobNotification::Created { job_id, .. }
            | JobNotification::Started { job_id }
            | JobNotification::Completed { job_id, .. }
            | JobNotification::Failed { job_id, .. } => job_id,
        }
    }
}

/// Republishes lifecycle events to in-process subscribers.
///
/// Sending with no subscribers is not an error; slow subscribers see
/// `RecvError::Lagged` on their side.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<JobNotification>,
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastNotifier {
    /// Buffer of 256 events per subscriber.
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sender: broadcast::channel(capacity).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobNotification> {
        self.sender.subscribe()
    }

    fn publish(&self, event: JobNotification) {
        // Err only means nobody is listening
        let _ = self.sender.send(event);
    }
}

#[async_trait]
impl NotificationSink for BroadcastNotifier {
    async fn job_created(&self, job: &HarvestJob) -> Result<(), NotifyError> {
        self.publish(JobNotification::Created {
            job_id: job.job_id().to_string(),
            source_type: job.source_type(),
        });
        Ok(())
    }

    async fn job_started(&self, job: &HarvestJob) -> Result<(), NotifyError> {
        self.publish(JobNotification::Started {
            job_id: job.job_id().to_string(),
        });
        Ok(())
    }

    async fn job_completed(&self, job: &HarvestJob, result: &JobResult) -> Result<(), NotifyError> {
        self.publish(JobNotification::Completed {
            job_id: job.job_id().to_string(),
            row_count: result.row_count,
            column_count: result.column_count,
        });
        Ok(())
    }

    async fn job_failed(&self, job: &HarvestJob, error: &str) -> Result<(), NotifyError> {
        self.publish(JobNotification::Failed {
            job_id: job.job_id().to_string(),
            error: error.to_string(),
        });
        Ok(())
    }
}
