//! One execution record of a [`DataIntegration`](super::DataIntegration).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::model::{DataColumn, SourceType};
use crate::traits::TransitionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEvent {
    Start,
    Complete,
    Fail,
    Cancel,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    pub fn transition(self, event: RunEvent) -> Result<RunStatus, TransitionError> {
        match (self, event) {
            (RunStatus::Pending, RunEvent::Start) => Ok(RunStatus::Running),
            (RunStatus::Running, RunEvent::Complete) => Ok(RunStatus::Completed),
            (RunStatus::Pending | RunStatus::Running, RunEvent::Fail) => Ok(RunStatus::Failed),
            (RunStatus::Pending | RunStatus::Running, RunEvent::Cancel) => Ok(RunStatus::Cancelled),
            (from, event) => Err(TransitionError::new("integration run", from, event.as_str())),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RunEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunEvent::Start => "start",
            RunEvent::Complete => "complete",
            RunEvent::Fail => "fail",
            RunEvent::Cancel => "cancel",
        }
    }
}

/// Per-record outcome tally. Every recorded outcome also counts as processed,
/// so `success + failed <= processed` holds by construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCounters {
    #[serde(rename = "records_processed")]
    processed: u64,
    #[serde(rename = "records_success")]
    success: u64,
    #[serde(rename = "records_failed")]
    failed: u64,
}

impl RecordCounters {
    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn success(&self) -> u64 {
        self.success
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    pub fn record_success(&mut self) {
        self.processed += 1;
        self.success += 1;
    }

    pub fn record_failure(&mut self) {
        self.processed += 1;
        self.failed += 1;
    }

    /// Failed share of processed records; 0.0 when nothing was processed.
    pub fn failure_ratio(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            self.failed as f64 / self.processed as f64
        }
    }
}

/// What a finished run harvested and stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub source_type: SourceType,
    pub source_identifier: String,
    pub records_harvested: usize,
    pub columns: Vec<DataColumn>,
    pub dataset_id: String,
    pub rows_stored: u64,
    pub rows_failed: u64,
}

/// Execution record with an append-only, timestamped log trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationJob {
    id: String,
    integration_id: String,
    status: RunStatus,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    result: Option<RunResult>,
    error_message: Option<String>,
    #[serde(flatten)]
    counters: RecordCounters,
    logs: Vec<String>,
}

impl IntegrationJob {
    pub fn new(integration_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            integration_id: integration_id.into(),
            status: RunStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error_message: None,
            counters: RecordCounters::default(),
            logs: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn integration_id(&self) -> &str {
        &self.integration_id
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn result(&self) -> Option<&RunResult> {
        self.result.as_ref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn counters(&self) -> RecordCounters {
        self.counters
    }

    pub fn logs(&self) -> &[String] {
        &self.logs
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// `completed_at - started_at`; `None` until terminal, and for runs
    /// cancelled before they started.
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    pub fn log(&mut self, message: impl AsRef<str>) {
        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S");
        self.logs.push(format!("[{timestamp}] {}", message.as_ref()));
    }

    pub(crate) fn set_counters(&mut self, counters: RecordCounters) {
        self.counters = counters;
    }

    /// Folds what an execution did before it noticed the cancel into this
    /// stored CANCELLED record. Its log lines go ahead of the cancel line
    /// and its counters replace the empty ones.
    pub(crate) fn absorb_cancelled_work(&mut self, work: &IntegrationJob) {
        let shared = self
            .logs
            .iter()
            .zip(&work.logs)
            .take_while(|(a, b)| a == b)
            .count();
        let tail = self.logs.split_off(shared);
        self.logs.extend(work.logs[shared..].iter().cloned());
        self.logs.extend(tail);
        self.counters = work.counters;
    }

    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.status = self.status.transition(RunEvent::Start)?;
        self.started_at = Some(Utc::now());
        self.log("Run started");
        Ok(())
    }

    pub fn complete(
        &mut self,
        result: RunResult,
        counters: RecordCounters,
    ) -> Result<(), TransitionError> {
        self.finish(RunEvent::Complete)?;
        self.counters = counters;
        self.log(format!(
            "Run COMPLETED: {} processed, {} stored, {} rejected",
            counters.processed(),
            counters.success(),
            counters.failed()
        ));
        self.result = Some(result);
        Ok(())
    }

    pub fn fail(&mut self, error_message: impl Into<String>) -> Result<(), TransitionError> {
        self.finish(RunEvent::Fail)?;
        let error_message = error_message.into();
        self.log(format!("Run FAILED: {error_message}"));
        self.error_message = Some(error_message);
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), TransitionError> {
        self.finish(RunEvent::Cancel)?;
        self.log("Run CANCELLED");
        Ok(())
    }

    fn finish(&mut self, event: RunEvent) -> Result<(), TransitionError> {
        self.status = self.status.transition(event)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result() -> RunResult {
        RunResult {
            source_type: SourceType::File,
            source_identifier: "/tmp/a.csv".into(),
            records_harvested: 3,
            columns: vec![],
            dataset_id: "ds".into(),
            rows_stored: 2,
            rows_failed: 1,
        }
    }

    #[test]
    fn test_counters_invariant_and_ratio() {
        let mut counters = RecordCounters::default();
        assert_eq!(counters.failure_ratio(), 0.0);
        counters.record_success();
        counters.record_success();
        counters.record_failure();
        assert_eq!(counters.processed(), 3);
        assert!(counters.success() + counters.failed() <= counters.processed());
        assert!((counters.failure_ratio() - 1.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_complete_sets_completed_at_and_duration() {
        let mut run = IntegrationJob::new("int-1");
        assert!(run.duration().is_none());

        run.start().unwrap();
        assert!(run.duration().is_none());
        assert!(run.completed_at().is_none());

        let mut counters = RecordCounters::default();
        counters.record_success();
        run.complete(result(), counters).unwrap();

        assert_eq!(run.status(), RunStatus::Completed);
        assert!(run.completed_at().is_some());
        assert!(run.duration().unwrap() >= Duration::zero());
        assert_eq!(run.counters().success(), 1);
        assert!(run.error_message().is_none());
    }

    #[test]
    fn test_fail_logs_exactly_one_failed_line() {
        let mut run = IntegrationJob::new("int-1");
        run.start().unwrap();
        run.fail("connection refused").unwrap();

        assert_eq!(run.error_message(), Some("connection refused"));
        let failed: Vec<_> = run.logs().iter().filter(|l| l.contains("FAILED")).collect();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].starts_with('['));
    }

    #[test]
    fn test_cancel_only_before_terminal() {
        let mut pending = IntegrationJob::new("int-1");
        pending.cancel().unwrap();
        assert_eq!(pending.status(), RunStatus::Cancelled);
        assert!(pending.completed_at().is_some());
        assert!(pending.duration().is_none());

        let mut running = IntegrationJob::new("int-1");
        running.start().unwrap();
        running.cancel().unwrap();
        assert!(running.duration().is_some());

        let mut done = IntegrationJob::new("int-1");
        done.start().unwrap();
        done.complete(result(), RecordCounters::default()).unwrap();
        assert!(done.cancel().is_err());
        assert_eq!(done.status(), RunStatus::Completed);
    }

    #[test]
    fn test_cancelled_record_absorbs_work_before_cancel_line() {
        let mut work = IntegrationJob::new("int-1");
        work.log("Run created");
        work.start().unwrap();

        let mut stored = work.clone();
        stored.cancel().unwrap();

        work.log("Harvested 2 records");
        let mut counters = RecordCounters::default();
        counters.record_success();
        work.set_counters(counters);

        stored.absorb_cancelled_work(&work);
        assert_eq!(stored.status(), RunStatus::Cancelled);
        assert_eq!(stored.counters().processed(), 1);
        assert_eq!(stored.logs().len(), 4);
        assert!(stored.logs()[2].ends_with("Harvested 2 records"));
        assert!(stored.logs()[3].ends_with("Run CANCELLED"));
    }

    #[test]
    fn test_single_running_period() {
        let mut run = IntegrationJob::new("int-1");
        run.start().unwrap();
        assert!(run.start().is_err());
        assert!(run.complete(result(), RecordCounters::default()).is_ok());
        assert!(run.fail("late").is_err());
    }

    #[test]
    fn test_counters_serialize_with_record_prefix() {
        let run = IntegrationJob::new("int-1");
        let json = serde_json::to_value(&run).unwrap();
        assert_eq!(json["records_processed"], 0);
        assert_eq!(json["status"], "pending");
    }
}
